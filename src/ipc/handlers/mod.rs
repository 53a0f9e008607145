pub mod attachments;
pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod fees;
pub mod holidays;
pub mod import;
pub mod marks;
pub mod reports;
pub mod students;
pub mod teacher_attendance;
pub mod teachers;
