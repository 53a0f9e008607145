use crate::attendance::{self, AttendanceQuery, TeacherEntry};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_date, get_required_str, opt_date, opt_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn entry_from(v: &Value) -> TeacherEntry {
    TeacherEntry {
        teacher_id: opt_str(v, "teacherId").unwrap_or_default(),
        status: opt_str(v, "status").unwrap_or_default(),
        check_in: opt_str(v, "checkIn"),
        check_out: opt_str(v, "checkOut"),
        notes: opt_str(v, "notes"),
    }
}

fn handle_mark(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let date = get_required_date(&req.params, "date")?;
    let entries: Vec<TeacherEntry> = req
        .params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?
        .iter()
        .map(entry_from)
        .collect();
    let marked_by = opt_str(&req.params, "markedBy");
    let outcome = attendance::mark_teachers(conn, date, &entries, marked_by.as_deref())?;
    Ok(json!({
        "date": date.to_string(),
        "saved": outcome.saved,
        "failed": outcome.failed,
        "errors": outcome.errors,
    }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let date = get_required_date(&req.params, "date")?;
    let entry = TeacherEntry {
        teacher_id: get_required_str(&req.params, "teacherId")?,
        status: get_required_str(&req.params, "status")?,
        ..entry_from(&req.params)
    };
    let marked_by = opt_str(&req.params, "markedBy");
    let mark = attendance::set_teacher_mark(conn, date, &entry, marked_by.as_deref())?;
    Ok(json!({
        "teacherId": entry.teacher_id,
        "date": date.to_string(),
        "status": mark.as_str(),
    }))
}

fn handle_report(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let q = AttendanceQuery {
        subject_id: opt_str(&req.params, "teacherId"),
        from: opt_date(&req.params, "from")?,
        to: opt_date(&req.params, "to")?,
        ..Default::default()
    };
    let rows: Vec<Value> = attendance::teacher_report(conn, &q)?
        .into_iter()
        .map(|r| {
            json!({
                "date": r.date.to_string(),
                "teacherId": r.teacher_id,
                "teacherName": r.teacher_name,
                "status": r.status,
                "checkIn": r.check_in,
                "checkOut": r.check_out,
                "notes": r.notes,
                "markedBy": r.marked_by,
            })
        })
        .collect();
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "teacherAttendance.mark" => handle_mark(state, req),
        "teacherAttendance.update" => handle_update(state, req),
        "teacherAttendance.report" => handle_report(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
