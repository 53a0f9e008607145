use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_str, opt_bool, opt_date, opt_money, opt_str};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, TeacherRecord};
use serde_json::{json, Value};

fn handle_teachers_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let teachers: Vec<Value> = roster::list_teachers(conn)?
        .iter()
        .map(TeacherRecord::to_json)
        .collect();
    Ok(json!({ "teachers": teachers }))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let mut teacher = TeacherRecord {
        name: get_required_str(p, "name")?,
        email: get_required_str(p, "email")?,
        phone: opt_str(p, "phone"),
        class_id: opt_str(p, "classId"),
        section: opt_str(p, "section"),
        is_class_teacher: opt_bool(p, "isClassTeacher").unwrap_or(false),
        salary: opt_money(p, "salary")?,
        address: opt_str(p, "address"),
        join_date: opt_date(p, "joinDate")?,
        ..Default::default()
    };
    roster::insert_teacher(conn, &mut teacher)?;
    Ok(json!({ "teacherId": teacher.id, "teacher": teacher.to_json() }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;
    roster::delete_teacher(conn, &teacher_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "teachers.list" => handle_teachers_list(state, req),
        "teachers.create" => handle_teachers_create(state, req),
        "teachers.delete" => handle_teachers_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
