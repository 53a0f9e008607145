use crate::calendar::ensure_working_day;
use crate::error::{Result, SchoolError};
use crate::roster::{class_exists, teacher_exists, StudentStatus};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

/// Errors reported back from a batch; the rest are only counted.
pub const MAX_REPORTED_ERRORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentMark {
    Present,
    Absent,
}

impl StudentMark {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentMark::Present => "Present",
            StudentMark::Absent => "Absent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(StudentMark::Present),
            "absent" => Some(StudentMark::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeacherMark {
    Present,
    Absent,
    Late,
    HalfDay,
    Leave,
}

impl TeacherMark {
    pub fn as_str(self) -> &'static str {
        match self {
            TeacherMark::Present => "Present",
            TeacherMark::Absent => "Absent",
            TeacherMark::Late => "Late",
            TeacherMark::HalfDay => "Half-Day",
            TeacherMark::Leave => "Leave",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "present" => Some(TeacherMark::Present),
            "absent" => Some(TeacherMark::Absent),
            "late" => Some(TeacherMark::Late),
            "halfday" => Some(TeacherMark::HalfDay),
            "leave" => Some(TeacherMark::Leave),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDaySummary {
    pub present: usize,
    pub absent: usize,
    /// Ids in the present list that are not active members of the class.
    pub ignored: Vec<String>,
}

/// Rewrites one class's attendance for `date`: every active student is
/// marked Present when listed in `present_ids` and Absent otherwise.
pub fn mark_class_day(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    present_ids: &[String],
    marked_by: Option<&str>,
) -> Result<ClassDaySummary> {
    ensure_working_day(conn, date)?;
    if !class_exists(conn, class_id)? {
        return Err(SchoolError::NotFound("class"));
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let roster: Vec<String> = {
        let mut stmt = tx.prepare("SELECT id FROM students WHERE class_id = ? AND status = ?")?;
        let ids = stmt
            .query_map((class_id, StudentStatus::Active.as_str()), |r| {
                r.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };
    let members: HashSet<&str> = roster.iter().map(String::as_str).collect();
    let present: HashSet<&str> = present_ids.iter().map(String::as_str).collect();

    let day = date.to_string();
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "DELETE FROM student_attendance WHERE class_id = ? AND date = ?",
        (class_id, &day),
    )?;
    let mut summary = ClassDaySummary {
        present: 0,
        absent: 0,
        ignored: present_ids
            .iter()
            .filter(|id| !members.contains(id.as_str()))
            .cloned()
            .collect(),
    };
    for student_id in &roster {
        let mark = if present.contains(student_id.as_str()) {
            summary.present += 1;
            StudentMark::Present
        } else {
            summary.absent += 1;
            StudentMark::Absent
        };
        upsert_student_row(&tx, student_id, Some(class_id), &day, mark, marked_by, &now)?;
    }
    tx.commit()?;
    info!(
        class_id,
        date = %date,
        present = summary.present,
        absent = summary.absent,
        "class attendance recorded"
    );
    Ok(summary)
}

fn upsert_student_row(
    conn: &Connection,
    student_id: &str,
    class_id: Option<&str>,
    day: &str,
    mark: StudentMark,
    marked_by: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO student_attendance(id, student_id, class_id, date, status, marked_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           class_id = excluded.class_id,
           status = excluded.status,
           marked_by = excluded.marked_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            class_id,
            day,
            mark.as_str(),
            marked_by,
            now,
        ),
    )?;
    Ok(())
}

/// Corrects a single student's mark for one day.
pub fn set_student_mark(
    conn: &Connection,
    student_id: &str,
    date: NaiveDate,
    mark: StudentMark,
    marked_by: Option<&str>,
) -> Result<()> {
    ensure_working_day(conn, date)?;
    let class_id: Option<Option<String>> = conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_id) = class_id else {
        return Err(SchoolError::NotFound("student"));
    };
    upsert_student_row(
        conn,
        student_id,
        class_id.as_deref(),
        &date.to_string(),
        mark,
        marked_by,
        &Utc::now().to_rfc3339(),
    )
}

#[derive(Debug, Clone, Default)]
pub struct TeacherEntry {
    pub teacher_id: String,
    pub status: String,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub saved: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn record_failure(&mut self, message: String) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        }
    }
}

fn upsert_teacher_row(
    conn: &Connection,
    entry: &TeacherEntry,
    mark: TeacherMark,
    day: &str,
    marked_by: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO teacher_attendance(id, teacher_id, date, status, check_in, check_out, notes, marked_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(teacher_id, date) DO UPDATE SET
           status = excluded.status,
           check_in = excluded.check_in,
           check_out = excluded.check_out,
           notes = excluded.notes,
           marked_by = excluded.marked_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &entry.teacher_id,
            day,
            mark.as_str(),
            &entry.check_in,
            &entry.check_out,
            &entry.notes,
            marked_by,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

/// Upserts one row per entry. The date is checked once for the whole batch;
/// individual rows fail independently.
pub fn mark_teachers(
    conn: &Connection,
    date: NaiveDate,
    entries: &[TeacherEntry],
    marked_by: Option<&str>,
) -> Result<BatchOutcome> {
    ensure_working_day(conn, date)?;
    let day = date.to_string();
    let mut outcome = BatchOutcome::default();
    for entry in entries {
        let Some(mark) = TeacherMark::parse(&entry.status) else {
            outcome.record_failure(format!(
                "{}: invalid status '{}'",
                entry.teacher_id, entry.status
            ));
            continue;
        };
        match teacher_exists(conn, &entry.teacher_id) {
            Ok(true) => {}
            Ok(false) => {
                outcome.record_failure(format!("{}: teacher not found", entry.teacher_id));
                continue;
            }
            Err(e) => {
                outcome.record_failure(format!("{}: {}", entry.teacher_id, e));
                continue;
            }
        }
        match upsert_teacher_row(conn, entry, mark, &day, marked_by) {
            Ok(()) => outcome.saved += 1,
            Err(e) => outcome.record_failure(format!("{}: {}", entry.teacher_id, e)),
        }
    }
    info!(
        date = %date,
        saved = outcome.saved,
        failed = outcome.failed,
        "teacher attendance recorded"
    );
    Ok(outcome)
}

pub fn set_teacher_mark(
    conn: &Connection,
    date: NaiveDate,
    entry: &TeacherEntry,
    marked_by: Option<&str>,
) -> Result<TeacherMark> {
    ensure_working_day(conn, date)?;
    let mark = TeacherMark::parse(&entry.status).ok_or_else(|| {
        SchoolError::validation(format!("invalid attendance status: {}", entry.status))
    })?;
    if !teacher_exists(conn, &entry.teacher_id)? {
        return Err(SchoolError::NotFound("teacher"));
    }
    upsert_teacher_row(conn, entry, mark, &date.to_string(), marked_by)?;
    Ok(mark)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentAttendanceRow {
    pub date: NaiveDate,
    pub student_id: String,
    pub student_name: String,
    pub roll_number: Option<String>,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    pub status: String,
    pub marked_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceQuery {
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn date_from(col: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    crate::calendar::parse_calendar_date(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("bad date {raw}").into(),
        )
    })
}

/// Student attendance newest first; `subject_id` filters by student.
pub fn student_report(conn: &Connection, q: &AttendanceQuery) -> Result<Vec<StudentAttendanceRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.date, a.student_id, s.first_name, s.last_name, s.roll_number,
                a.class_id, c.name, a.status, a.marked_by
         FROM student_attendance a
         JOIN students s ON s.id = a.student_id
         LEFT JOIN classes c ON c.id = a.class_id
         WHERE (?1 IS NULL OR a.class_id = ?1)
           AND (?2 IS NULL OR a.student_id = ?2)
           AND (?3 IS NULL OR a.date >= ?3)
           AND (?4 IS NULL OR a.date <= ?4)
         ORDER BY a.date DESC, s.roll_number IS NULL, CAST(s.roll_number AS INTEGER), s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map(
            (
                q.class_id.as_deref(),
                q.subject_id.as_deref(),
                q.from.map(|d| d.to_string()),
                q.to.map(|d| d.to_string()),
            ),
            |r| {
                let first: String = r.get(2)?;
                let last: String = r.get(3)?;
                Ok(StudentAttendanceRow {
                    date: date_from(0, r.get(0)?)?,
                    student_id: r.get(1)?,
                    student_name: format!("{} {}", first, last).trim().to_string(),
                    roll_number: r.get(4)?,
                    class_id: r.get(5)?,
                    class_name: r.get(6)?,
                    status: r.get(7)?,
                    marked_by: r.get(8)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeacherAttendanceRow {
    pub date: NaiveDate,
    pub teacher_id: String,
    pub teacher_name: String,
    pub status: String,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub notes: Option<String>,
    pub marked_by: Option<String>,
}

/// Teacher attendance newest first; `subject_id` filters by teacher.
pub fn teacher_report(conn: &Connection, q: &AttendanceQuery) -> Result<Vec<TeacherAttendanceRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.date, a.teacher_id, t.name, a.status, a.check_in, a.check_out, a.notes, a.marked_by
         FROM teacher_attendance a
         JOIN teachers t ON t.id = a.teacher_id
         WHERE (?1 IS NULL OR a.teacher_id = ?1)
           AND (?2 IS NULL OR a.date >= ?2)
           AND (?3 IS NULL OR a.date <= ?3)
         ORDER BY a.date DESC, t.name",
    )?;
    let rows = stmt
        .query_map(
            (
                q.subject_id.as_deref(),
                q.from.map(|d| d.to_string()),
                q.to.map(|d| d.to_string()),
            ),
            |r| {
                Ok(TeacherAttendanceRow {
                    date: date_from(0, r.get(0)?)?,
                    teacher_id: r.get(1)?,
                    teacher_name: r.get(2)?,
                    status: r.get(3)?,
                    check_in: r.get(4)?,
                    check_out: r.get(5)?,
                    notes: r.get(6)?,
                    marked_by: r.get(7)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{create_holiday, HolidayCategory, NewHoliday};
    use crate::db;
    use crate::roster::{insert_class, insert_student, insert_teacher, StudentRecord, TeacherRecord};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::ensure_schema(&conn).expect("schema");
        conn
    }

    fn student(conn: &Connection, class_id: &str, first: &str, status: StudentStatus) -> String {
        let mut s = StudentRecord {
            first_name: first.to_string(),
            class_id: Some(class_id.to_string()),
            status: Some(status),
            ..Default::default()
        };
        insert_student(conn, &mut s).expect("student");
        s.id
    }

    fn count_rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn class_day_marks_everyone_and_replaces_previous_rows() {
        let conn = conn();
        let class = insert_class(&conn, "Grade 3", None, 0).expect("class");
        let a = student(&conn, &class.id, "Asha", StudentStatus::Active);
        let b = student(&conn, &class.id, "Bilal", StudentStatus::Active);
        let _gone = student(&conn, &class.id, "Chen", StudentStatus::Inactive);

        // 2026-10-19 is a Monday.
        let day = d("2026-10-19");
        let summary = mark_class_day(&conn, &class.id, day, &[a.clone(), "stranger".to_string()], None)
            .expect("mark");
        assert_eq!(summary.present, 1);
        assert_eq!(summary.absent, 1);
        assert_eq!(summary.ignored, vec!["stranger".to_string()]);

        let summary = mark_class_day(&conn, &class.id, day, &[a.clone(), b.clone()], Some("teacher-1"))
            .expect("re-mark");
        assert_eq!((summary.present, summary.absent), (2, 0));
        assert_eq!(count_rows(&conn, "student_attendance"), 2);

        let report = student_report(
            &conn,
            &AttendanceQuery {
                class_id: Some(class.id.clone()),
                ..Default::default()
            },
        )
        .expect("report");
        assert!(report.iter().all(|r| r.status == "Present"));
        assert!(report.iter().all(|r| r.marked_by.as_deref() == Some("teacher-1")));
    }

    #[test]
    fn writes_on_sundays_and_holidays_are_rejected_without_side_effects() {
        let conn = conn();
        let class = insert_class(&conn, "Grade 4", None, 0).expect("class");
        let a = student(&conn, &class.id, "Asha", StudentStatus::Active);
        let mut t = TeacherRecord {
            name: "Ms. Rao".to_string(),
            email: "rao@school.test".to_string(),
            ..Default::default()
        };
        insert_teacher(&conn, &mut t).expect("teacher");

        let sunday = d("2026-10-18");
        let err = mark_class_day(&conn, &class.id, sunday, &[a.clone()], None).expect_err("sunday");
        assert_eq!(err.code(), "non_working_day");

        create_holiday(
            &conn,
            NewHoliday {
                title: "Diwali".to_string(),
                date: d("2026-11-09"),
                description: None,
                category: HolidayCategory::Festival,
                is_recurring: true,
                created_by: None,
            },
        )
        .expect("holiday");
        let err = set_student_mark(&conn, &a, d("2026-11-09"), StudentMark::Present, None)
            .expect_err("holiday");
        assert!(err.to_string().contains("Diwali"));

        let entry = TeacherEntry {
            teacher_id: t.id.clone(),
            status: "Present".to_string(),
            ..Default::default()
        };
        assert!(mark_teachers(&conn, sunday, &[entry.clone()], None).is_err());
        assert!(set_teacher_mark(&conn, d("2026-11-09"), &entry, None).is_err());

        assert_eq!(count_rows(&conn, "student_attendance"), 0);
        assert_eq!(count_rows(&conn, "teacher_attendance"), 0);
    }

    #[test]
    fn teacher_batch_counts_failures_per_row() {
        let conn = conn();
        let mut t = TeacherRecord {
            name: "Mr. Das".to_string(),
            email: "das@school.test".to_string(),
            ..Default::default()
        };
        insert_teacher(&conn, &mut t).expect("teacher");
        let day = d("2026-10-20");
        let entries = vec![
            TeacherEntry {
                teacher_id: t.id.clone(),
                status: "half day".to_string(),
                check_in: Some("09:10".to_string()),
                ..Default::default()
            },
            TeacherEntry {
                teacher_id: "ghost".to_string(),
                status: "Present".to_string(),
                ..Default::default()
            },
            TeacherEntry {
                teacher_id: t.id.clone(),
                status: "Sleeping".to_string(),
                ..Default::default()
            },
        ];
        let outcome = mark_teachers(&conn, day, &entries, Some("admin")).expect("batch");
        assert_eq!(outcome.saved, 1);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.errors.len(), 2);

        let rows = teacher_report(&conn, &AttendanceQuery::default()).expect("report");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "Half-Day");
        assert_eq!(rows[0].check_in.as_deref(), Some("09:10"));
    }

    #[test]
    fn batch_error_list_is_capped() {
        let mut outcome = BatchOutcome::default();
        for i in 0..8 {
            outcome.record_failure(format!("row {i}"));
        }
        assert_eq!(outcome.failed, 8);
        assert_eq!(outcome.errors.len(), MAX_REPORTED_ERRORS);
    }
}
