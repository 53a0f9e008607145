//! Exam marks and teacher remarks.
//!
//! A mark stores the raw score together with the percentage and letter grade
//! derived from it; both are recomputed whenever the score changes.

use crate::error::{Result, SchoolError};
use crate::roster::{load_student, teacher_exists};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    APlus,
    A,
    BPlus,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A+" => Some(Grade::APlus),
            "A" => Some(Grade::A),
            "B+" => Some(Grade::BPlus),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }

    /// Letter grade for an unrounded percentage.
    pub fn for_percentage(pct: Decimal) -> Self {
        let bands = [
            (90, Grade::APlus),
            (80, Grade::A),
            (70, Grade::BPlus),
            (60, Grade::B),
            (50, Grade::C),
            (40, Grade::D),
        ];
        bands
            .into_iter()
            .find(|(floor, _)| pct >= Decimal::from(*floor))
            .map(|(_, g)| g)
            .unwrap_or(Grade::F)
    }
}

/// Validates a score and returns `(percentage rounded to 2 places, grade)`.
pub fn score(obtained: Decimal, max: Decimal) -> Result<(Decimal, Grade)> {
    if max <= Decimal::ZERO {
        return Err(SchoolError::validation("maxMarks must be positive"));
    }
    if obtained < Decimal::ZERO {
        return Err(SchoolError::validation("obtainedMarks cannot be negative"));
    }
    if obtained > max {
        return Err(SchoolError::validation(format!(
            "obtainedMarks {} exceeds maxMarks {}",
            obtained.normalize(),
            max.normalize()
        )));
    }
    let pct = obtained / max * Decimal::ONE_HUNDRED;
    Ok((
        pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        Grade::for_percentage(pct),
    ))
}

/// Marks are plain numbers; trailing zeros are dropped for display.
pub fn format_marks(value: Decimal) -> String {
    value.normalize().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkRecord {
    pub id: String,
    pub student_id: String,
    pub subject: Option<String>,
    pub exam_type: String,
    pub max_marks: Decimal,
    pub obtained_marks: Decimal,
    pub percentage: Decimal,
    pub grade: Grade,
    pub exam_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub entered_by: Option<String>,
    pub created_at: String,
}

impl MarkRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "subject": self.subject,
            "examType": self.exam_type,
            "maxMarks": format_marks(self.max_marks),
            "obtainedMarks": format_marks(self.obtained_marks),
            "percentage": format!("{:.2}", self.percentage),
            "grade": self.grade.as_str(),
            "examDate": self.exam_date.map(|d| d.to_string()),
            "remarks": self.remarks,
            "enteredBy": self.entered_by,
            "createdAt": self.created_at,
        })
    }

    /// Exam date when recorded, otherwise the day the mark was entered.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.exam_date
            .or_else(|| self.created_at.get(..10).and_then(|d| d.parse().ok()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewMark {
    pub student_id: String,
    pub subject: Option<String>,
    pub exam_type: String,
    pub max_marks: Decimal,
    pub obtained_marks: Decimal,
    pub exam_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub entered_by: Option<String>,
}

/// Fields left `None` keep their stored value; `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default)]
pub struct MarkPatch {
    pub subject: Option<Option<String>>,
    pub exam_type: Option<String>,
    pub max_marks: Option<Decimal>,
    pub obtained_marks: Option<Decimal>,
    pub exam_date: Option<Option<NaiveDate>>,
    pub remarks: Option<Option<String>>,
}

const MARK_COLUMNS: &str = "id, student_id, subject, exam_type, max_marks, obtained_marks,
    percentage, grade, exam_date, remarks, entered_by, created_at";

fn decimal_from(col: usize, raw: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn mark_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MarkRecord> {
    let grade: String = r.get(7)?;
    let exam_date: Option<String> = r.get(8)?;
    Ok(MarkRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        subject: r.get(2)?,
        exam_type: r.get(3)?,
        max_marks: decimal_from(4, r.get(4)?)?,
        obtained_marks: decimal_from(5, r.get(5)?)?,
        percentage: decimal_from(6, r.get(6)?)?,
        grade: Grade::parse(&grade).unwrap_or(Grade::F),
        exam_date: exam_date.and_then(|d| d.parse().ok()),
        remarks: r.get(9)?,
        entered_by: r.get(10)?,
        created_at: r.get(11)?,
    })
}

pub fn load_mark(conn: &Connection, mark_id: &str) -> Result<Option<MarkRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MARK_COLUMNS} FROM marks WHERE id = ?"),
            [mark_id],
            mark_from_row,
        )
        .optional()?)
}

pub fn insert_mark(conn: &Connection, input: &NewMark) -> Result<MarkRecord> {
    if input.exam_type.trim().is_empty() {
        return Err(SchoolError::validation("examType is required"));
    }
    if load_student(conn, &input.student_id)?.is_none() {
        return Err(SchoolError::NotFound("student"));
    }
    let (percentage, grade) = score(input.obtained_marks, input.max_marks)?;
    let mark = MarkRecord {
        id: Uuid::new_v4().to_string(),
        student_id: input.student_id.clone(),
        subject: input.subject.clone(),
        exam_type: input.exam_type.trim().to_string(),
        max_marks: input.max_marks,
        obtained_marks: input.obtained_marks,
        percentage,
        grade,
        exam_date: input.exam_date,
        remarks: input.remarks.clone(),
        entered_by: input.entered_by.clone(),
        created_at: Utc::now().to_rfc3339(),
    };
    conn.execute(
        &format!("INSERT INTO marks({MARK_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        (
            &mark.id,
            &mark.student_id,
            mark.subject.as_deref(),
            &mark.exam_type,
            mark.max_marks.to_string(),
            mark.obtained_marks.to_string(),
            mark.percentage.to_string(),
            mark.grade.as_str(),
            mark.exam_date.map(|d| d.to_string()),
            mark.remarks.as_deref(),
            mark.entered_by.as_deref(),
            &mark.created_at,
        ),
    )?;
    Ok(mark)
}

/// Applies `patch` and re-derives percentage and grade from the merged score.
pub fn update_mark(conn: &Connection, mark_id: &str, patch: &MarkPatch) -> Result<MarkRecord> {
    let mut mark = load_mark(conn, mark_id)?.ok_or(SchoolError::NotFound("mark"))?;
    if let Some(subject) = &patch.subject {
        mark.subject = subject.clone();
    }
    if let Some(exam_type) = &patch.exam_type {
        if exam_type.trim().is_empty() {
            return Err(SchoolError::validation("examType is required"));
        }
        mark.exam_type = exam_type.trim().to_string();
    }
    if let Some(max) = patch.max_marks {
        mark.max_marks = max;
    }
    if let Some(obtained) = patch.obtained_marks {
        mark.obtained_marks = obtained;
    }
    if let Some(exam_date) = patch.exam_date {
        mark.exam_date = exam_date;
    }
    if let Some(remarks) = &patch.remarks {
        mark.remarks = remarks.clone();
    }
    let (percentage, grade) = score(mark.obtained_marks, mark.max_marks)?;
    mark.percentage = percentage;
    mark.grade = grade;

    conn.execute(
        "UPDATE marks SET subject = ?, exam_type = ?, max_marks = ?, obtained_marks = ?,
            percentage = ?, grade = ?, exam_date = ?, remarks = ?
         WHERE id = ?",
        (
            mark.subject.as_deref(),
            &mark.exam_type,
            mark.max_marks.to_string(),
            mark.obtained_marks.to_string(),
            mark.percentage.to_string(),
            mark.grade.as_str(),
            mark.exam_date.map(|d| d.to_string()),
            mark.remarks.as_deref(),
            &mark.id,
        ),
    )?;
    Ok(mark)
}

pub fn delete_mark(conn: &Connection, mark_id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM marks WHERE id = ?", [mark_id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("mark"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MarkQuery {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub subject: Option<String>,
    pub exam_type: Option<String>,
}

/// A mark joined with the student labels used by listings and the CSV export.
#[derive(Debug, Clone)]
pub struct MarkRow {
    pub mark: MarkRecord,
    pub student_name: String,
    pub roll_number: Option<String>,
    pub class_name: Option<String>,
}

impl MarkRow {
    pub fn to_json(&self) -> serde_json::Value {
        let mut v = self.mark.to_json();
        v["studentName"] = json!(self.student_name);
        v["rollNumber"] = json!(self.roll_number);
        v["className"] = json!(self.class_name);
        v
    }
}

/// Newest exam first; marks without an exam date sort by entry time.
pub fn list_marks(conn: &Connection, q: &MarkQuery) -> Result<Vec<MarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.student_id, m.subject, m.exam_type, m.max_marks, m.obtained_marks,
                m.percentage, m.grade, m.exam_date, m.remarks, m.entered_by, m.created_at,
                s.first_name, s.last_name, s.roll_number, c.name
         FROM marks m
         JOIN students s ON s.id = m.student_id
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE (?1 IS NULL OR m.student_id = ?1)
           AND (?2 IS NULL OR s.class_id = ?2)
           AND (?3 IS NULL OR lower(m.subject) = lower(?3))
           AND (?4 IS NULL OR lower(m.exam_type) = lower(?4))
         ORDER BY COALESCE(m.exam_date, substr(m.created_at, 1, 10)) DESC, m.created_at DESC",
    )?;
    let rows = stmt
        .query_map(
            (
                q.student_id.as_deref(),
                q.class_id.as_deref(),
                q.subject.as_deref(),
                q.exam_type.as_deref(),
            ),
            |r| {
                let first: String = r.get(12)?;
                let last: String = r.get(13)?;
                Ok(MarkRow {
                    mark: mark_from_row(r)?,
                    student_name: format!("{} {}", first, last).trim().to_string(),
                    roll_number: r.get(14)?,
                    class_name: r.get(15)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Export order: roll number, then newest exam first within a student.
pub fn report_order(rows: &mut [MarkRow]) {
    rows.sort_by(|a, b| {
        let roll = |r: &MarkRow| {
            r.roll_number
                .as_deref()
                .and_then(|n| n.trim().parse::<u64>().ok())
        };
        match (roll(a), roll(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.roll_number.cmp(&b.roll_number),
        }
        .then_with(|| a.student_name.cmp(&b.student_name))
        .then_with(|| b.mark.effective_date().cmp(&a.mark.effective_date()))
    });
}

// ---- remarks ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemarkKind {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl RemarkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RemarkKind::Positive => "Positive",
            RemarkKind::Negative => "Negative",
            RemarkKind::Neutral => "Neutral",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(RemarkKind::Positive),
            "negative" => Some(RemarkKind::Negative),
            "neutral" => Some(RemarkKind::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemarkRecord {
    pub id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub subject: Option<String>,
    pub remark: String,
    pub kind: RemarkKind,
    pub date: Option<NaiveDate>,
    pub created_at: String,
}

impl RemarkRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "teacherId": self.teacher_id,
            "subject": self.subject,
            "remark": self.remark,
            "type": self.kind.as_str(),
            "date": self.date.map(|d| d.to_string()),
            "createdAt": self.created_at,
        })
    }
}

/// Stores a remark; `date` defaults to `today` when absent.
pub fn insert_remark(conn: &Connection, remark: &mut RemarkRecord, today: NaiveDate) -> Result<()> {
    if remark.remark.trim().is_empty() {
        return Err(SchoolError::validation("remark is required"));
    }
    if load_student(conn, &remark.student_id)?.is_none() {
        return Err(SchoolError::NotFound("student"));
    }
    if !teacher_exists(conn, &remark.teacher_id)? {
        return Err(SchoolError::NotFound("teacher"));
    }
    remark.id = Uuid::new_v4().to_string();
    remark.remark = remark.remark.trim().to_string();
    remark.date = Some(remark.date.unwrap_or(today));
    remark.created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO remarks(id, student_id, teacher_id, subject, remark, kind, date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &remark.id,
            &remark.student_id,
            &remark.teacher_id,
            remark.subject.as_deref(),
            &remark.remark,
            remark.kind.as_str(),
            remark.date.map(|d| d.to_string()),
            &remark.created_at,
        ),
    )?;
    Ok(())
}

/// Newest first, optionally narrowed to one student or one teacher.
pub fn list_remarks(
    conn: &Connection,
    student_id: Option<&str>,
    teacher_id: Option<&str>,
) -> Result<Vec<RemarkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, teacher_id, subject, remark, kind, date, created_at
         FROM remarks
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR teacher_id = ?2)
         ORDER BY date DESC, created_at DESC",
    )?;
    let rows = stmt
        .query_map((student_id, teacher_id), |r| {
            let kind: String = r.get(5)?;
            let date: Option<String> = r.get(6)?;
            Ok(RemarkRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                teacher_id: r.get(2)?,
                subject: r.get(3)?,
                remark: r.get(4)?,
                kind: RemarkKind::parse(&kind).unwrap_or_default(),
                date: date.and_then(|d| d.parse().ok()),
                created_at: r.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn delete_remark(conn: &Connection, remark_id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM remarks WHERE id = ?", [remark_id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("remark"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::roster::{insert_class, insert_student, insert_teacher, StudentRecord, TeacherRecord};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::ensure_schema(&conn).expect("schema");
        conn
    }

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal")
    }

    fn student(conn: &Connection, first: &str, roll: &str) -> String {
        let class = insert_class(conn, "Grade 8", None, 0).expect("class");
        let mut s = StudentRecord {
            first_name: first.to_string(),
            class_id: Some(class.id),
            roll_number: Some(roll.to_string()),
            ..Default::default()
        };
        insert_student(conn, &mut s).expect("student");
        s.id
    }

    fn new_mark(student_id: &str, obtained: &str, max: &str) -> NewMark {
        NewMark {
            student_id: student_id.to_string(),
            subject: Some("Science".to_string()),
            exam_type: "Midterm".to_string(),
            max_marks: dec(max),
            obtained_marks: dec(obtained),
            ..Default::default()
        }
    }

    #[test]
    fn grade_bands_are_inclusive_at_the_floor() {
        assert_eq!(Grade::for_percentage(dec("90")), Grade::APlus);
        assert_eq!(Grade::for_percentage(dec("89.99")), Grade::A);
        assert_eq!(Grade::for_percentage(dec("70")), Grade::BPlus);
        assert_eq!(Grade::for_percentage(dec("59.5")), Grade::C);
        assert_eq!(Grade::for_percentage(dec("40")), Grade::D);
        assert_eq!(Grade::for_percentage(dec("39.99")), Grade::F);
    }

    #[test]
    fn score_rounds_percentage_but_grades_the_exact_value() {
        let (pct, grade) = score(dec("2"), dec("3")).expect("score");
        assert_eq!(pct, dec("66.67"));
        assert_eq!(grade, Grade::B);

        // 89.995 displays as 90.00 but has not reached the A+ floor.
        let (pct, grade) = score(dec("17999"), dec("20000")).expect("score");
        assert_eq!(format!("{:.2}", pct), "90.00");
        assert_eq!(grade, Grade::A);
    }

    #[test]
    fn score_rejects_impossible_marks() {
        assert_eq!(score(dec("5"), dec("0")).expect_err("zero max").code(), "bad_params");
        assert_eq!(score(dec("-1"), dec("10")).expect_err("negative").code(), "bad_params");
        assert_eq!(score(dec("11"), dec("10")).expect_err("over max").code(), "bad_params");
    }

    #[test]
    fn update_recomputes_percentage_and_grade() {
        let conn = conn();
        let sid = student(&conn, "Asha", "3");
        let mark = insert_mark(&conn, &new_mark(&sid, "45", "50")).expect("insert");
        assert_eq!(mark.grade, Grade::APlus);
        assert_eq!(format!("{:.2}", mark.percentage), "90.00");

        let updated = update_mark(
            &conn,
            &mark.id,
            &MarkPatch {
                obtained_marks: Some(dec("31")),
                remarks: Some(Some("needs revision".to_string())),
                ..Default::default()
            },
        )
        .expect("update");
        assert_eq!(updated.grade, Grade::B);
        assert_eq!(format!("{:.2}", updated.percentage), "62.00");

        let stored = load_mark(&conn, &mark.id).expect("load").expect("present");
        assert_eq!(stored, updated);

        let err = update_mark(
            &conn,
            &mark.id,
            &MarkPatch {
                max_marks: Some(dec("20")),
                ..Default::default()
            },
        )
        .expect_err("obtained above new max");
        assert_eq!(err.code(), "bad_params");
        assert_eq!(load_mark(&conn, &mark.id).expect("load"), Some(stored));
    }

    #[test]
    fn listing_and_report_ordering() {
        let conn = conn();
        let asha = student(&conn, "Asha", "10");
        let ben = student(&conn, "Ben", "2");
        let mut early = new_mark(&asha, "40", "50");
        early.exam_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        let mut late = new_mark(&asha, "20", "50");
        late.exam_date = NaiveDate::from_ymd_opt(2026, 9, 1);
        let mut bens = new_mark(&ben, "30", "50");
        bens.exam_date = NaiveDate::from_ymd_opt(2026, 5, 1);
        bens.subject = Some("History".to_string());
        for m in [&early, &late, &bens] {
            insert_mark(&conn, m).expect("insert");
        }

        let all = list_marks(&conn, &MarkQuery::default()).expect("list");
        let dates: Vec<_> = all.iter().map(|r| r.mark.exam_date).collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2026, 9, 1),
                NaiveDate::from_ymd_opt(2026, 5, 1),
                NaiveDate::from_ymd_opt(2026, 3, 1),
            ]
        );

        let science = list_marks(
            &conn,
            &MarkQuery {
                subject: Some("science".to_string()),
                ..Default::default()
            },
        )
        .expect("filter");
        assert_eq!(science.len(), 2);

        let mut report = all;
        report_order(&mut report);
        let order: Vec<_> = report
            .iter()
            .map(|r| (r.student_name.as_str(), r.mark.grade))
            .collect();
        assert_eq!(
            order,
            vec![("Ben", Grade::B), ("Asha", Grade::D), ("Asha", Grade::A)]
        );
    }

    #[test]
    fn remarks_default_to_neutral_and_today() {
        let conn = conn();
        let sid = student(&conn, "Asha", "1");
        let mut teacher = TeacherRecord {
            name: "R. Nair".to_string(),
            email: "nair@school.test".to_string(),
            ..Default::default()
        };
        insert_teacher(&conn, &mut teacher).expect("teacher");
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).expect("date");

        let mut remark = RemarkRecord {
            student_id: sid.clone(),
            teacher_id: teacher.id.clone(),
            remark: "  Helped classmates with labs ".to_string(),
            ..Default::default()
        };
        insert_remark(&conn, &mut remark, today).expect("insert");
        assert_eq!(remark.kind, RemarkKind::Neutral);
        assert_eq!(remark.date, Some(today));

        let listed = list_remarks(&conn, None, Some(&teacher.id)).expect("list");
        assert_eq!(listed, vec![remark.clone()]);

        let mut orphan = RemarkRecord {
            student_id: sid,
            teacher_id: "missing".to_string(),
            remark: "x".to_string(),
            ..Default::default()
        };
        let err = insert_remark(&conn, &mut orphan, today).expect_err("teacher missing");
        assert_eq!(err.code(), "not_found");

        delete_remark(&conn, &remark.id).expect("delete");
        assert_eq!(
            delete_remark(&conn, &remark.id).expect_err("gone").code(),
            "not_found"
        );
    }
}
