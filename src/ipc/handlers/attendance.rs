use crate::attendance::{self, AttendanceQuery, StudentAttendanceRow, StudentMark};
use crate::calendar;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_date, get_required_str, opt_date, opt_str, str_list};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, StudentStatus};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

fn row_json(r: &StudentAttendanceRow) -> Value {
    json!({
        "date": r.date.to_string(),
        "studentId": r.student_id,
        "studentName": r.student_name,
        "rollNumber": r.roll_number,
        "classId": r.class_id,
        "className": r.class_name,
        "status": r.status,
        "markedBy": r.marked_by,
    })
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = get_required_str(&req.params, "classId")?;
    let date = get_required_date(&req.params, "date")?;
    let present_ids = str_list(&req.params, "presentIds")?;
    let marked_by = opt_str(&req.params, "markedBy");
    let summary =
        attendance::mark_class_day(conn, &class_id, date, &present_ids, marked_by.as_deref())?;
    Ok(json!({
        "classId": class_id,
        "date": date.to_string(),
        "present": summary.present,
        "absent": summary.absent,
        "total": summary.present + summary.absent,
        "ignoredIds": summary.ignored,
    }))
}

fn handle_attendance_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let date = get_required_date(&req.params, "date")?;
    let raw = get_required_str(&req.params, "status")?;
    let mark = StudentMark::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be Present or Absent"))?;
    let marked_by = opt_str(&req.params, "markedBy");
    attendance::set_student_mark(conn, &student_id, date, mark, marked_by.as_deref())?;
    Ok(json!({
        "studentId": student_id,
        "date": date.to_string(),
        "status": mark.as_str(),
    }))
}

fn day_statuses(conn: &Connection, class_id: &str, date: chrono::NaiveDate) -> Result<HashMap<String, String>, HandlerErr> {
    let rows = attendance::student_report(
        conn,
        &AttendanceQuery {
            class_id: Some(class_id.to_string()),
            from: Some(date),
            to: Some(date),
            ..Default::default()
        },
    )?;
    Ok(rows.into_iter().map(|r| (r.student_id, r.status)).collect())
}

/// Roster of one class for one day with any recorded marks, plus whether the
/// day is open for marking.
fn handle_attendance_day(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = get_required_str(&req.params, "classId")?;
    let date = get_required_date(&req.params, "date")?;
    if !roster::class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let blocked = calendar::non_working_reason(conn, date)?;
    let marks = day_statuses(conn, &class_id, date)?;
    let students: Vec<Value> = roster::list_students(conn, Some(&class_id), Some(StudentStatus::Active))?
        .into_iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "displayName": s.display_name(),
                "rollNumber": s.roll_number,
                "status": marks.get(&s.id),
            })
        })
        .collect();
    Ok(json!({
        "classId": class_id,
        "date": date.to_string(),
        "isWorkingDay": blocked.is_none(),
        "reason": blocked.as_ref().map(|r| r.reason()),
        "students": students,
    }))
}

fn handle_attendance_report(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let q = AttendanceQuery {
        class_id: opt_str(&req.params, "classId"),
        subject_id: opt_str(&req.params, "studentId"),
        from: opt_date(&req.params, "from")?,
        to: opt_date(&req.params, "to")?,
    };
    let rows = attendance::student_report(conn, &q)?;
    let present = rows
        .iter()
        .filter(|r| r.status == StudentMark::Present.as_str())
        .count();
    Ok(json!({
        "rows": rows.iter().map(row_json).collect::<Vec<_>>(),
        "summary": {
            "total": rows.len(),
            "present": present,
            "absent": rows.len() - present,
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attendance.mark" => handle_attendance_mark(state, req),
        "attendance.update" => handle_attendance_update(state, req),
        "attendance.day" => handle_attendance_day(state, req),
        "attendance.report" => handle_attendance_report(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
