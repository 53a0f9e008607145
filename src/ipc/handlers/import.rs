use crate::attendance::BatchOutcome;
use crate::calendar::parse_calendar_date;
use crate::error::SchoolError;
use crate::import_map::{ColumnMap, ImportKind};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_str, opt_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::parse_money;
use crate::roster::{self, StudentRecord, StudentStatus, TeacherRecord};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

type Row = HashMap<&'static str, String>;

struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<(String, String)>>,
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn table_from_json(rows: &[Value]) -> Result<Table, HandlerErr> {
    let mut headers: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let obj = row
            .as_object()
            .ok_or_else(|| HandlerErr::bad_params(format!("rows[{i}] must be an object")))?;
        let mut cells = Vec::with_capacity(obj.len());
        for (k, v) in obj {
            if !headers.contains(k) {
                headers.push(k.clone());
            }
            cells.push((k.clone(), cell_text(v)));
        }
        out.push(cells);
    }
    Ok(Table { headers, rows: out })
}

fn table_from_csv(path: &str) -> Result<Table, HandlerErr> {
    let io_err = |e: csv::Error| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))
    };
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(io_err)?;
    let headers: Vec<String> = rdr.headers().map_err(io_err)?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec.map_err(io_err)?;
        rows.push(
            headers
                .iter()
                .zip(rec.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect(),
        );
    }
    Ok(Table { headers, rows })
}

fn take(row: &mut Row, key: &str) -> Option<String> {
    row.remove(key)
}

fn take_date(row: &mut Row, key: &str) -> Result<Option<chrono::NaiveDate>, SchoolError> {
    match take(row, key) {
        None => Ok(None),
        Some(raw) => parse_calendar_date(&raw)
            .map(Some)
            .ok_or_else(|| SchoolError::validation(format!("invalid {key}: {raw}"))),
    }
}

fn resolve_class(
    conn: &Connection,
    row: &mut Row,
    cache: &mut HashMap<(String, Option<String>), String>,
) -> Result<Option<String>, SchoolError> {
    let Some(name) = take(row, "class") else {
        return Ok(None);
    };
    let section = row.get("section").cloned();
    let key = (name.to_lowercase(), section.as_ref().map(|s| s.to_lowercase()));
    if let Some(id) = cache.get(&key) {
        return Ok(Some(id.clone()));
    }
    let id = match roster::find_class_by_name(conn, &name, section.as_deref())? {
        Some(id) => id,
        None => roster::find_class_by_name(conn, &name, None)?
            .ok_or_else(|| SchoolError::validation(format!("class '{name}' not found")))?,
    };
    cache.insert(key, id.clone());
    Ok(Some(id))
}

fn import_student(
    conn: &Connection,
    mut row: Row,
    classes: &mut HashMap<(String, Option<String>), String>,
) -> Result<(), SchoolError> {
    let class_id = resolve_class(conn, &mut row, classes)?;
    let status = match take(&mut row, "status") {
        None => StudentStatus::Active,
        Some(raw) => StudentStatus::parse(&raw)
            .ok_or_else(|| SchoolError::validation(format!("invalid status: {raw}")))?,
    };
    let mut student = StudentRecord {
        first_name: take(&mut row, "firstName")
            .ok_or_else(|| SchoolError::validation("firstName is required"))?,
        last_name: take(&mut row, "lastName").unwrap_or_default(),
        student_no: take(&mut row, "studentNo"),
        email: take(&mut row, "email"),
        date_of_birth: take_date(&mut row, "dateOfBirth")?,
        gender: take(&mut row, "gender"),
        class_id,
        section: take(&mut row, "section"),
        roll_number: take(&mut row, "rollNumber"),
        parent_name: take(&mut row, "parentName"),
        parent_phone: take(&mut row, "parentPhone"),
        parent_email: take(&mut row, "parentEmail"),
        address: take(&mut row, "address"),
        admission_date: take_date(&mut row, "admissionDate")?,
        status: Some(status),
        ..Default::default()
    };
    roster::insert_student(conn, &mut student)
}

fn import_teacher(
    conn: &Connection,
    mut row: Row,
    classes: &mut HashMap<(String, Option<String>), String>,
) -> Result<(), SchoolError> {
    let class_id = resolve_class(conn, &mut row, classes)?;
    let salary = match take(&mut row, "salary") {
        None => None,
        Some(raw) => Some(parse_money(&raw)?),
    };
    let is_class_teacher = take(&mut row, "isClassTeacher")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "true" | "1" | "y"))
        .unwrap_or(false);
    let mut teacher = TeacherRecord {
        name: take(&mut row, "name").ok_or_else(|| SchoolError::validation("name is required"))?,
        email: take(&mut row, "email")
            .ok_or_else(|| SchoolError::validation("email is required"))?,
        phone: take(&mut row, "phone"),
        class_id,
        section: take(&mut row, "section"),
        is_class_teacher,
        salary,
        address: take(&mut row, "address"),
        ..Default::default()
    };
    roster::insert_teacher(conn, &mut teacher)
}

fn import_class(conn: &Connection, mut row: Row) -> Result<(), SchoolError> {
    let name = take(&mut row, "name").ok_or_else(|| SchoolError::validation("name is required"))?;
    let capacity = match take(&mut row, "capacity") {
        None => 0,
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| SchoolError::validation(format!("invalid capacity: {raw}")))?,
    };
    roster::insert_class(conn, &name, take(&mut row, "section").as_deref(), capacity)?;
    Ok(())
}

/// Imports rows one at a time; a bad row is counted and skipped.
fn handle_import_rows(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kind_raw = get_required_str(&req.params, "kind")?;
    let kind = ImportKind::parse(&kind_raw).ok_or_else(|| {
        HandlerErr::bad_params("kind must be students, teachers or classes")
    })?;

    let table = match (req.params.get("rows").and_then(|v| v.as_array()), opt_str(&req.params, "path")) {
        (Some(rows), _) => table_from_json(rows)?,
        (None, Some(path)) => table_from_csv(&path)?,
        (None, None) => return Err(HandlerErr::bad_params("provide rows or path")),
    };
    if table.rows.is_empty() {
        return Err(HandlerErr::bad_params("no rows to import"));
    }

    let map = ColumnMap::build(kind, &table.headers)?;
    let mut classes = HashMap::new();
    let mut outcome = BatchOutcome::default();
    for (i, cells) in table.rows.iter().enumerate() {
        let row = map.canonical_row(cells.iter().map(|(h, v)| (h.as_str(), v.as_str())));
        let res = match map.kind {
            ImportKind::Students => import_student(conn, row, &mut classes),
            ImportKind::Teachers => import_teacher(conn, row, &mut classes),
            ImportKind::Classes => import_class(conn, row),
        };
        match res {
            Ok(()) => outcome.saved += 1,
            // Header row is line 1 in the source file.
            Err(e) => outcome.record_failure(format!("Row {}: {}", i + 2, e)),
        }
    }
    info!(
        kind = map.kind.as_str(),
        imported = outcome.saved,
        failed = outcome.failed,
        "bulk import finished"
    );
    Ok(json!({
        "kind": map.kind.as_str(),
        "total": table.rows.len(),
        "imported": outcome.saved,
        "failed": outcome.failed,
        "errors": outcome.errors,
        "ignoredColumns": map.ignored,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "import.rows" => handle_import_rows(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
