use crate::error::{Result, SchoolError};
use crate::ledger::format_money;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentStatus {
    Active,
    Inactive,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Active => "Active",
            StudentStatus::Inactive => "Inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(StudentStatus::Active),
            "inactive" => Some(StudentStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub section: Option<String>,
    pub capacity: u32,
}

impl ClassRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "section": self.section,
            "capacity": self.capacity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudentRecord {
    pub id: String,
    pub student_no: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub class_id: Option<String>,
    pub section: Option<String>,
    pub roll_number: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub parent_email: Option<String>,
    pub address: Option<String>,
    pub admission_date: Option<NaiveDate>,
    pub status: Option<StudentStatus>,
}

impl StudentRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentNo": self.student_no,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "displayName": self.display_name(),
            "email": self.email,
            "dateOfBirth": self.date_of_birth.map(|d| d.to_string()),
            "gender": self.gender,
            "classId": self.class_id,
            "section": self.section,
            "rollNumber": self.roll_number,
            "parentName": self.parent_name,
            "parentPhone": self.parent_phone,
            "parentEmail": self.parent_email,
            "address": self.address,
            "admissionDate": self.admission_date.map(|d| d.to_string()),
            "status": self.status.unwrap_or(StudentStatus::Active).as_str(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TeacherRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub class_id: Option<String>,
    pub section: Option<String>,
    pub is_class_teacher: bool,
    pub salary: Option<Decimal>,
    pub address: Option<String>,
    pub join_date: Option<NaiveDate>,
}

impl TeacherRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "phone": self.phone,
            "classId": self.class_id,
            "section": self.section,
            "isClassTeacher": self.is_class_teacher,
            "salary": self.salary.map(format_money),
            "address": self.address,
            "joinDate": self.join_date.map(|d| d.to_string()),
        })
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn opt_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| crate::calendar::parse_calendar_date(&s))
}

// ---- classes ---------------------------------------------------------------

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn insert_class(
    conn: &Connection,
    name: &str,
    section: Option<&str>,
    capacity: u32,
) -> Result<ClassRecord> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchoolError::validation("class name must not be empty"));
    }
    let record = ClassRecord {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        section: section.map(str::trim).filter(|s| !s.is_empty()).map(String::from),
        capacity,
    };
    conn.execute(
        "INSERT INTO classes(id, name, section, capacity) VALUES(?, ?, ?, ?)",
        (&record.id, &record.name, &record.section, record.capacity),
    )?;
    Ok(record)
}

/// Case-insensitive lookup used by imports; a section narrows the match
/// when given.
pub fn find_class_by_name(
    conn: &Connection,
    name: &str,
    section: Option<&str>,
) -> Result<Option<String>> {
    let found = conn
        .query_row(
            "SELECT id FROM classes
             WHERE lower(name) = lower(?1)
               AND (?2 IS NULL OR lower(coalesce(section, '')) = lower(?2))
             ORDER BY name, id
             LIMIT 1",
            (name.trim(), section.map(str::trim)),
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(found)
}

pub fn list_classes(conn: &Connection) -> Result<Vec<(ClassRecord, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.section, c.capacity,
                (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name, c.section",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                ClassRecord {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    section: r.get(2)?,
                    capacity: r.get(3)?,
                },
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn delete_class(conn: &Connection, class_id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("class"));
    }
    Ok(())
}

// ---- students --------------------------------------------------------------

const STUDENT_COLUMNS: &str = "id, student_no, first_name, last_name, email, date_of_birth, gender,
    class_id, section, roll_number, parent_name, parent_phone, parent_email, address,
    admission_date, status";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRecord> {
    let status: String = r.get(15)?;
    Ok(StudentRecord {
        id: r.get(0)?,
        student_no: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        email: r.get(4)?,
        date_of_birth: opt_date(r.get(5)?),
        gender: r.get(6)?,
        class_id: r.get(7)?,
        section: r.get(8)?,
        roll_number: r.get(9)?,
        parent_name: r.get(10)?,
        parent_phone: r.get(11)?,
        parent_email: r.get(12)?,
        address: r.get(13)?,
        admission_date: opt_date(r.get(14)?),
        status: StudentStatus::parse(&status),
    })
}

fn validate_student(conn: &Connection, s: &StudentRecord) -> Result<()> {
    if s.first_name.trim().is_empty() {
        return Err(SchoolError::validation("firstName is required"));
    }
    if let Some(class_id) = s.class_id.as_deref() {
        if !class_exists(conn, class_id)? {
            return Err(SchoolError::NotFound("class"));
        }
    }
    Ok(())
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRecord>> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
    Ok(conn
        .query_row(&sql, [student_id], student_from_row)
        .optional()?)
}

pub fn list_students(
    conn: &Connection,
    class_id: Option<&str>,
    status: Option<StudentStatus>,
) -> Result<Vec<StudentRecord>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE (?1 IS NULL OR class_id = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY roll_number IS NULL, CAST(roll_number AS INTEGER), roll_number, last_name, first_name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((class_id, status.map(|s| s.as_str())), student_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Inserts `student` under a fresh id, which is written back into the record.
pub fn insert_student(conn: &Connection, student: &mut StudentRecord) -> Result<()> {
    validate_student(conn, student)?;
    student.id = Uuid::new_v4().to_string();
    write_student(conn, student, true)
}

pub fn update_student(conn: &Connection, student: &StudentRecord) -> Result<()> {
    validate_student(conn, student)?;
    write_student(conn, student, false)
}

fn write_student(conn: &Connection, s: &StudentRecord, insert: bool) -> Result<()> {
    let sql = if insert {
        "INSERT INTO students(student_no, first_name, last_name, email, date_of_birth, gender,
            class_id, section, roll_number, parent_name, parent_phone, parent_email, address,
            admission_date, status, updated_at, id)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
    } else {
        "UPDATE students SET student_no = ?1, first_name = ?2, last_name = ?3, email = ?4,
            date_of_birth = ?5, gender = ?6, class_id = ?7, section = ?8, roll_number = ?9,
            parent_name = ?10, parent_phone = ?11, parent_email = ?12, address = ?13,
            admission_date = ?14, status = ?15, updated_at = ?16
         WHERE id = ?17"
    };
    let n = conn.execute(
        sql,
        rusqlite::params![
            s.student_no,
            s.first_name.trim(),
            s.last_name.trim(),
            s.email,
            s.date_of_birth.map(|d| d.to_string()),
            s.gender,
            s.class_id,
            s.section,
            s.roll_number,
            s.parent_name,
            s.parent_phone,
            s.parent_email,
            s.address,
            s.admission_date.map(|d| d.to_string()),
            s.status.unwrap_or(StudentStatus::Active).as_str(),
            Utc::now().to_rfc3339(),
            s.id,
        ],
    )?;
    if n == 0 {
        return Err(SchoolError::NotFound("student"));
    }
    Ok(())
}

/// Refuses while the student owns fees; a fee ledger is only removed through `fees.delete`.
pub fn delete_student(conn: &Connection, student_id: &str) -> Result<()> {
    let fees: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fees WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    if fees > 0 {
        return Err(SchoolError::StudentHasFees { count: fees });
    }
    let n = conn.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("student"));
    }
    Ok(())
}

// ---- teachers --------------------------------------------------------------

pub fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn insert_teacher(conn: &Connection, teacher: &mut TeacherRecord) -> Result<()> {
    if teacher.name.trim().is_empty() || teacher.email.trim().is_empty() {
        return Err(SchoolError::validation("name and email are required"));
    }
    if let Some(class_id) = teacher.class_id.as_deref() {
        if !class_exists(conn, class_id)? {
            return Err(SchoolError::NotFound("class"));
        }
    }
    teacher.id = Uuid::new_v4().to_string();
    teacher.email = teacher.email.trim().to_ascii_lowercase();
    let res = conn.execute(
        "INSERT INTO teachers(id, name, email, phone, class_id, section, is_class_teacher, salary, address, join_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            teacher.id,
            teacher.name.trim(),
            teacher.email,
            teacher.phone,
            teacher.class_id,
            teacher.section,
            teacher.is_class_teacher as i64,
            teacher.salary.map(|d| d.to_string()),
            teacher.address,
            teacher.join_date.map(|d| d.to_string()),
        ],
    );
    match res {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(SchoolError::Duplicate(format!(
            "a teacher with email {} already exists",
            teacher.email
        ))),
        Err(e) => Err(e.into()),
    }
}

pub fn list_teachers(conn: &Connection) -> Result<Vec<TeacherRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, phone, class_id, section, is_class_teacher, salary, address, join_date
         FROM teachers
         ORDER BY name, email",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let salary: Option<String> = r.get(7)?;
            Ok(TeacherRecord {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                phone: r.get(3)?,
                class_id: r.get(4)?,
                section: r.get(5)?,
                is_class_teacher: r.get::<_, i64>(6)? != 0,
                salary: salary.and_then(|s| Decimal::from_str(&s).ok()),
                address: r.get(8)?,
                join_date: opt_date(r.get(9)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn delete_teacher(conn: &Connection, teacher_id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM teachers WHERE id = ?", [teacher_id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("teacher"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::ensure_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn class_lookup_is_case_insensitive_and_section_aware() {
        let conn = conn();
        let a = insert_class(&conn, "Grade 5", Some("A"), 30).expect("class a");
        let b = insert_class(&conn, "Grade 5", Some("B"), 30).expect("class b");
        assert_eq!(
            find_class_by_name(&conn, "grade 5", Some("b")).expect("lookup"),
            Some(b.id.clone())
        );
        assert_eq!(
            find_class_by_name(&conn, "GRADE 5", Some("A")).expect("lookup"),
            Some(a.id)
        );
        assert!(find_class_by_name(&conn, "Grade 6", None)
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn student_requires_existing_class() {
        let conn = conn();
        let mut s = StudentRecord {
            first_name: "Asha".to_string(),
            class_id: Some("missing".to_string()),
            ..Default::default()
        };
        let err = insert_student(&conn, &mut s).expect_err("class missing");
        assert_eq!(err.code(), "not_found");

        let class = insert_class(&conn, "Grade 1", None, 0).expect("class");
        s.class_id = Some(class.id.clone());
        insert_student(&conn, &mut s).expect("insert");
        let loaded = load_student(&conn, &s.id).expect("load").expect("present");
        assert_eq!(loaded.display_name(), "Asha");
        assert_eq!(loaded.status, Some(StudentStatus::Active));

        let listed = list_students(&conn, Some(&class.id), Some(StudentStatus::Active))
            .expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn student_with_fees_cannot_be_deleted() {
        let conn = conn();
        let mut s = StudentRecord {
            first_name: "Ravi".to_string(),
            ..Default::default()
        };
        insert_student(&conn, &mut s).expect("insert");
        conn.execute(
            "INSERT INTO fees(id, student_id, term, amount, paid, status, created_at, updated_at)
             VALUES('fee-1', ?, 'Term 1', '500', '200', 'Partial', 'now', 'now')",
            [&s.id],
        )
        .expect("fee");

        let err = delete_student(&conn, &s.id).expect_err("fees block delete");
        assert_eq!(err.code(), "student_has_fees");
        assert!(load_student(&conn, &s.id).expect("load").is_some());

        conn.execute("DELETE FROM fees WHERE id = 'fee-1'", [])
            .expect("drop fee");
        delete_student(&conn, &s.id).expect("delete");
        assert_eq!(
            delete_student(&conn, &s.id).expect_err("gone").code(),
            "not_found"
        );
    }

    #[test]
    fn teacher_email_is_unique() {
        let conn = conn();
        let mut t = TeacherRecord {
            name: "R. Nair".to_string(),
            email: "Nair@school.test".to_string(),
            ..Default::default()
        };
        insert_teacher(&conn, &mut t).expect("first");
        let mut again = TeacherRecord {
            name: "Someone Else".to_string(),
            email: "nair@school.test".to_string(),
            ..Default::default()
        };
        let err = insert_teacher(&conn, &mut again).expect_err("duplicate");
        assert_eq!(err.code(), "duplicate");
        assert_eq!(list_teachers(&conn).expect("list").len(), 1);
    }
}
