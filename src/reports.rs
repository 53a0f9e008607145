//! CSV exports for fees, attendance and marks.

use crate::attendance::{StudentAttendanceRow, TeacherAttendanceRow};
use crate::ledger::{format_money, Fee};
use crate::ledger_store::StudentLabel;
use crate::marks::{format_marks, MarkRow};
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

const FEE_HEADERS: [&str; 10] = [
    "Roll No",
    "Student Name",
    "Class",
    "Term",
    "Amount",
    "Paid",
    "Balance",
    "Status",
    "Due Date",
    "Notes",
];
const STUDENT_ATTENDANCE_HEADERS: [&str; 6] =
    ["Date", "Roll No", "Student Name", "Class", "Status", "Marked By"];
const TEACHER_ATTENDANCE_HEADERS: [&str; 6] =
    ["Date", "Teacher", "Status", "Check In", "Check Out", "Notes"];
const MARK_HEADERS: [&str; 10] = [
    "Roll No",
    "Student Name",
    "Subject",
    "Exam Type",
    "Max Marks",
    "Obtained Marks",
    "Percentage",
    "Grade",
    "Date",
    "Remarks",
];

/// Header row is written up front so an empty report is still a valid CSV.
fn writer<W: Write>(out: W, headers: &[&str]) -> csv::Result<csv::Writer<W>> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(headers)?;
    Ok(wtr)
}

#[derive(Serialize)]
struct FeeCsvRow<'a> {
    roll_number: &'a str,
    student_name: &'a str,
    class_name: &'a str,
    term: &'a str,
    amount: String,
    paid: String,
    balance: String,
    status: &'a str,
    due_date: String,
    notes: &'a str,
}

#[derive(Serialize)]
struct StudentAttendanceCsvRow<'a> {
    date: String,
    roll_number: &'a str,
    student_name: &'a str,
    class_name: &'a str,
    status: &'a str,
    marked_by: &'a str,
}

#[derive(Serialize)]
struct TeacherAttendanceCsvRow<'a> {
    date: String,
    teacher_name: &'a str,
    status: &'a str,
    check_in: &'a str,
    check_out: &'a str,
    notes: &'a str,
}

#[derive(Serialize)]
struct MarkCsvRow<'a> {
    roll_number: &'a str,
    student_name: &'a str,
    subject: &'a str,
    exam_type: &'a str,
    max_marks: String,
    obtained_marks: String,
    percentage: String,
    grade: &'a str,
    date: String,
    remarks: &'a str,
}

/// Writes one line per fee and returns the number of data rows.
pub fn write_fees<W: Write>(
    out: W,
    fees: &[Fee],
    labels: &HashMap<String, StudentLabel>,
) -> csv::Result<usize> {
    let mut wtr = writer(out, &FEE_HEADERS)?;
    for fee in fees {
        let label = labels.get(&fee.student_id);
        wtr.serialize(FeeCsvRow {
            roll_number: label.and_then(|l| l.roll_number.as_deref()).unwrap_or(""),
            student_name: label.map(|l| l.name.as_str()).unwrap_or(""),
            class_name: label.and_then(|l| l.class_name.as_deref()).unwrap_or(""),
            term: &fee.term,
            amount: format_money(fee.amount),
            paid: format_money(fee.paid),
            balance: format_money(fee.remaining()),
            status: fee.status.as_str(),
            due_date: fee.due_date.map(|d| d.to_string()).unwrap_or_default(),
            notes: fee.notes.as_deref().unwrap_or(""),
        })?;
    }
    wtr.flush()?;
    Ok(fees.len())
}

pub fn write_student_attendance<W: Write>(
    out: W,
    rows: &[StudentAttendanceRow],
) -> csv::Result<usize> {
    let mut wtr = writer(out, &STUDENT_ATTENDANCE_HEADERS)?;
    for r in rows {
        wtr.serialize(StudentAttendanceCsvRow {
            date: r.date.to_string(),
            roll_number: r.roll_number.as_deref().unwrap_or(""),
            student_name: &r.student_name,
            class_name: r.class_name.as_deref().unwrap_or(""),
            status: &r.status,
            marked_by: r.marked_by.as_deref().unwrap_or(""),
        })?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

pub fn write_teacher_attendance<W: Write>(
    out: W,
    rows: &[TeacherAttendanceRow],
) -> csv::Result<usize> {
    let mut wtr = writer(out, &TEACHER_ATTENDANCE_HEADERS)?;
    for r in rows {
        wtr.serialize(TeacherAttendanceCsvRow {
            date: r.date.to_string(),
            teacher_name: &r.teacher_name,
            status: &r.status,
            check_in: r.check_in.as_deref().unwrap_or(""),
            check_out: r.check_out.as_deref().unwrap_or(""),
            notes: r.notes.as_deref().unwrap_or(""),
        })?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Rows are written in the order given; callers sort with `marks::report_order`.
pub fn write_marks<W: Write>(out: W, rows: &[MarkRow]) -> csv::Result<usize> {
    let mut wtr = writer(out, &MARK_HEADERS)?;
    for r in rows {
        wtr.serialize(MarkCsvRow {
            roll_number: r.roll_number.as_deref().unwrap_or(""),
            student_name: &r.student_name,
            subject: r.mark.subject.as_deref().unwrap_or(""),
            exam_type: &r.mark.exam_type,
            max_marks: format_marks(r.mark.max_marks),
            obtained_marks: format_marks(r.mark.obtained_marks),
            percentage: format!("{:.2}%", r.mark.percentage),
            grade: r.mark.grade.as_str(),
            date: r
                .mark
                .effective_date()
                .map(|d| d.to_string())
                .unwrap_or_default(),
            remarks: r.mark.remarks.as_deref().unwrap_or(""),
        })?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FeeStatus;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn fee_rows_carry_labels_and_balance() {
        let fee = Fee {
            id: "fee-1".to_string(),
            student_id: "stu-1".to_string(),
            term: "Term 1, 2026".to_string(),
            amount: Decimal::new(100000, 2),
            paid: Decimal::new(25050, 2),
            status: FeeStatus::Partial,
            due_date: NaiveDate::from_ymd_opt(2026, 11, 1),
            notes: None,
            payments: Vec::new(),
            installments: Vec::new(),
            version: 3,
        };
        let mut labels = HashMap::new();
        labels.insert(
            "stu-1".to_string(),
            StudentLabel {
                name: "Asha Rao".to_string(),
                roll_number: Some("7".to_string()),
                class_name: Some("Grade 5".to_string()),
            },
        );
        let mut buf = Vec::new();
        let n = write_fees(&mut buf, &[fee], &labels).expect("write");
        assert_eq!(n, 1);
        let text = String::from_utf8(buf).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Roll No,Student Name,Class,Term,Amount,Paid,Balance,Status,Due Date,Notes")
        );
        assert_eq!(
            lines.next(),
            Some("7,Asha Rao,Grade 5,\"Term 1, 2026\",1000.00,250.50,749.50,Partial,2026-11-01,")
        );
    }

    #[test]
    fn mark_rows_show_percentage_with_sign() {
        use crate::marks::{Grade, MarkRecord};
        let row = MarkRow {
            mark: MarkRecord {
                id: "m-1".to_string(),
                student_id: "stu-1".to_string(),
                subject: Some("Maths".to_string()),
                exam_type: "Final".to_string(),
                max_marks: Decimal::new(1000, 1),
                obtained_marks: Decimal::new(865, 1),
                percentage: Decimal::new(865, 1),
                grade: Grade::A,
                exam_date: None,
                remarks: None,
                entered_by: None,
                created_at: "2026-10-02T08:00:00+00:00".to_string(),
            },
            student_name: "Asha Rao".to_string(),
            roll_number: Some("7".to_string()),
            class_name: None,
        };
        let mut buf = Vec::new();
        assert_eq!(write_marks(&mut buf, &[row]).expect("write"), 1);
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            text.lines().nth(1),
            Some("7,Asha Rao,Maths,Final,100,86.5,86.50%,A,2026-10-02,")
        );
    }

    #[test]
    fn empty_report_is_header_only() {
        let mut buf = Vec::new();
        let n = write_teacher_attendance(&mut buf, &[]).expect("write");
        assert_eq!(n, 0);
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "Date,Teacher,Status,Check In,Check Out,Notes\n"
        );
    }
}
