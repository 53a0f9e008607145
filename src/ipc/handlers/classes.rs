use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_str, opt_str, opt_u32};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use serde_json::json;

fn handle_classes_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "classes": [] }));
    };
    let classes: Vec<serde_json::Value> = roster::list_classes(conn)?
        .into_iter()
        .map(|(class, student_count)| {
            let mut v = class.to_json();
            v["studentCount"] = json!(student_count);
            v
        })
        .collect();
    Ok(json!({ "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let name = get_required_str(&req.params, "name")?;
    let section = opt_str(&req.params, "section");
    let capacity = opt_u32(&req.params, "capacity")?.unwrap_or(0);
    let class = roster::insert_class(conn, &name, section.as_deref(), capacity)?;
    Ok(json!({ "classId": class.id, "class": class.to_json() }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = get_required_str(&req.params, "classId")?;
    roster::delete_class(conn, &class_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
