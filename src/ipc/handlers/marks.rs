use crate::calendar::parse_calendar_date;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{
    get_required_money, get_required_str, nullable_str, opt_date, opt_money, opt_str,
};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, MarkPatch, MarkQuery, NewMark, RemarkKind, RemarkRecord};
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tracing::info;

fn mark_query(params: &Value) -> MarkQuery {
    MarkQuery {
        student_id: opt_str(params, "studentId"),
        class_id: opt_str(params, "classId"),
        subject: opt_str(params, "subject"),
        exam_type: opt_str(params, "examType"),
    }
}

/// `None` when absent, `Some(None)` when null or blank.
fn nullable_date(params: &Value, key: &str) -> Result<Option<Option<NaiveDate>>, HandlerErr> {
    match nullable_str(params, key) {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(raw)) => parse_calendar_date(&raw)
            .map(|d| Some(Some(d)))
            .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a date (YYYY-MM-DD)"))),
    }
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let marks: Vec<Value> = marks::list_marks(conn, &mark_query(&req.params))?
        .iter()
        .map(|r| r.to_json())
        .collect();
    Ok(json!({ "marks": marks }))
}

fn handle_marks_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let input = NewMark {
        student_id: get_required_str(p, "studentId")?,
        subject: opt_str(p, "subject"),
        exam_type: get_required_str(p, "examType")?,
        max_marks: get_required_money(p, "maxMarks")?,
        obtained_marks: get_required_money(p, "obtainedMarks")?,
        exam_date: opt_date(p, "examDate")?,
        remarks: opt_str(p, "remarks"),
        entered_by: opt_str(p, "enteredBy"),
    };
    let mark = marks::insert_mark(conn, &input)?;
    info!(
        mark_id = %mark.id,
        student_id = %mark.student_id,
        grade = mark.grade.as_str(),
        "mark recorded"
    );
    Ok(json!({ "markId": mark.id, "mark": mark.to_json() }))
}

fn handle_marks_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let mark_id = get_required_str(p, "markId")?;
    let patch = MarkPatch {
        subject: nullable_str(p, "subject"),
        exam_type: opt_str(p, "examType"),
        max_marks: opt_money(p, "maxMarks")?,
        obtained_marks: opt_money(p, "obtainedMarks")?,
        exam_date: nullable_date(p, "examDate")?,
        remarks: nullable_str(p, "remarks"),
    };
    let mark = marks::update_mark(conn, &mark_id, &patch)?;
    Ok(json!({ "mark": mark.to_json() }))
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mark_id = get_required_str(&req.params, "markId")?;
    marks::delete_mark(conn, &mark_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_remarks_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let student_id = opt_str(&req.params, "studentId");
    let teacher_id = opt_str(&req.params, "teacherId");
    let remarks: Vec<Value> =
        marks::list_remarks(conn, student_id.as_deref(), teacher_id.as_deref())?
            .iter()
            .map(RemarkRecord::to_json)
            .collect();
    Ok(json!({ "remarks": remarks }))
}

fn handle_remarks_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let kind = match opt_str(p, "type") {
        None => RemarkKind::default(),
        Some(raw) => RemarkKind::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("type must be Positive, Negative or Neutral"))?,
    };
    let mut remark = RemarkRecord {
        student_id: get_required_str(p, "studentId")?,
        teacher_id: get_required_str(p, "teacherId")?,
        subject: opt_str(p, "subject"),
        remark: get_required_str(p, "remark")?,
        kind,
        date: opt_date(p, "date")?,
        ..Default::default()
    };
    marks::insert_remark(conn, &mut remark, Local::now().date_naive())?;
    Ok(json!({ "remarkId": remark.id, "remark": remark.to_json() }))
}

fn handle_remarks_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let remark_id = get_required_str(&req.params, "remarkId")?;
    marks::delete_remark(conn, &remark_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "marks.list" => handle_marks_list(state, req),
        "marks.create" => handle_marks_create(state, req),
        "marks.update" => handle_marks_update(state, req),
        "marks.delete" => handle_marks_delete(state, req),
        "remarks.list" => handle_remarks_list(state, req),
        "remarks.create" => handle_remarks_create(state, req),
        "remarks.delete" => handle_remarks_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
