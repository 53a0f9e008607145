use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_str, nullable_str, opt_date, opt_str};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, StudentRecord, StudentStatus};
use serde_json::{json, Value};

fn parse_status(params: &Value) -> Result<Option<StudentStatus>, HandlerErr> {
    match opt_str(params, "status") {
        None => Ok(None),
        Some(raw) => StudentStatus::parse(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params("status must be Active or Inactive")),
    }
}

/// Copies every field present in `params` onto `student`; a null clears an
/// optional field.
fn apply_fields(student: &mut StudentRecord, params: &Value) -> Result<(), HandlerErr> {
    if let Some(first) = nullable_str(params, "firstName") {
        student.first_name = first.ok_or_else(|| HandlerErr::bad_params("firstName is required"))?;
    }
    if let Some(last) = nullable_str(params, "lastName") {
        student.last_name = last.unwrap_or_default();
    }
    let text_fields: [(&str, &mut Option<String>); 10] = [
        ("studentNo", &mut student.student_no),
        ("email", &mut student.email),
        ("gender", &mut student.gender),
        ("classId", &mut student.class_id),
        ("section", &mut student.section),
        ("rollNumber", &mut student.roll_number),
        ("parentName", &mut student.parent_name),
        ("parentPhone", &mut student.parent_phone),
        ("parentEmail", &mut student.parent_email),
        ("address", &mut student.address),
    ];
    for (key, slot) in text_fields {
        if let Some(v) = nullable_str(params, key) {
            *slot = v;
        }
    }
    if params.get("dateOfBirth").is_some() {
        student.date_of_birth = opt_date(params, "dateOfBirth")?;
    }
    if params.get("admissionDate").is_some() {
        student.admission_date = opt_date(params, "admissionDate")?;
    }
    if let Some(status) = parse_status(params)? {
        student.status = Some(status);
    }
    Ok(())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = opt_str(&req.params, "classId");
    let status = parse_status(&req.params)?;
    let students: Vec<Value> = roster::list_students(conn, class_id.as_deref(), status)?
        .iter()
        .map(StudentRecord::to_json)
        .collect();
    Ok(json!({ "students": students }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let student = roster::load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    Ok(json!({ "student": student.to_json() }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mut student = StudentRecord {
        first_name: get_required_str(&req.params, "firstName")?,
        status: Some(StudentStatus::Active),
        ..Default::default()
    };
    apply_fields(&mut student, &req.params)?;
    roster::insert_student(conn, &mut student)?;
    Ok(json!({ "studentId": student.id, "student": student.to_json() }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let mut student = roster::load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    let patch = req.params.get("patch").unwrap_or(&req.params);
    apply_fields(&mut student, patch)?;
    roster::update_student(conn, &student)?;
    Ok(json!({ "student": student.to_json() }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let student_id = get_required_str(&req.params, "studentId")?;
    roster::delete_student(conn, &student_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
