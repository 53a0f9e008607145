use crate::attachments::{self, OwnerKind, StoreError};
use crate::ipc::error::{io_failed, respond, HandlerErr};
use crate::ipc::params::{get_required_str, opt_str};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

fn parse_owner_kind(raw: &str) -> Result<OwnerKind, HandlerErr> {
    OwnerKind::parse(raw).ok_or_else(|| HandlerErr::bad_params("ownerKind must be note or testPaper"))
}

fn handle_store(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let workspace = state.workspace_path()?;
    let p = &req.params;
    let kind = parse_owner_kind(&get_required_str(p, "ownerKind")?)?;
    let title = get_required_str(p, "title")?;
    let source = get_required_str(p, "sourcePath")?;
    let source_path = PathBuf::from(&source);
    if !source_path.is_file() {
        return Err(HandlerErr::new("not_found", "source file not found")
            .with_details(json!({ "path": source })));
    }

    let stored = attachments::store_file(
        workspace,
        kind,
        &source_path,
        opt_str(p, "originalName").as_deref(),
        opt_str(p, "mimeType").as_deref(),
        state.config.max_upload_bytes,
    )
    .map_err(|e| match e {
        StoreError::Rejected(msg) => {
            HandlerErr::bad_params(msg).with_details(json!({ "path": source }))
        }
        StoreError::Io(e) => io_failed(e, &source),
    })?;

    let id = Uuid::new_v4().to_string();
    let uploaded_at = Utc::now().to_rfc3339();
    let owner_id = opt_str(p, "ownerId");
    let inserted = conn.execute(
        "INSERT INTO attachments(id, owner_kind, owner_id, title, stored_name, original_name, relative_path, size_bytes, mime_type, sha256, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            kind.as_str(),
            &owner_id,
            &title,
            &stored.stored_name,
            &stored.original_name,
            &stored.relative_path,
            stored.size_bytes as i64,
            &stored.mime_type,
            &stored.sha256,
            &uploaded_at,
        ),
    );
    if let Err(e) = inserted {
        if let Err(cleanup) = attachments::remove_stored_file(workspace, &stored.relative_path) {
            warn!(path = %stored.relative_path, error = %cleanup, "orphaned upload left behind");
        }
        return Err(HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "attachments" })));
    }
    info!(attachment_id = %id, kind = kind.as_str(), bytes = stored.size_bytes, "attachment stored");

    Ok(json!({
        "attachmentId": id,
        "storedName": stored.stored_name,
        "originalName": stored.original_name,
        "relativePath": stored.relative_path,
        "sizeBytes": stored.size_bytes,
        "mimeType": stored.mime_type,
        "sha256": stored.sha256,
        "uploadedAt": uploaded_at,
    }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kind = match opt_str(&req.params, "ownerKind") {
        None => None,
        Some(raw) => Some(parse_owner_kind(&raw)?),
    };
    let owner_id = opt_str(&req.params, "ownerId");
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_kind, owner_id, title, stored_name, original_name, relative_path,
                    size_bytes, mime_type, sha256, uploaded_at
             FROM attachments
             WHERE (?1 IS NULL OR owner_kind = ?1) AND (?2 IS NULL OR owner_id = ?2)
             ORDER BY uploaded_at DESC, id",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((kind.map(|k| k.as_str()), owner_id.as_deref()), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "ownerKind": r.get::<_, String>(1)?,
                "ownerId": r.get::<_, Option<String>>(2)?,
                "title": r.get::<_, String>(3)?,
                "storedName": r.get::<_, String>(4)?,
                "originalName": r.get::<_, String>(5)?,
                "relativePath": r.get::<_, String>(6)?,
                "sizeBytes": r.get::<_, i64>(7)?,
                "mimeType": r.get::<_, String>(8)?,
                "sha256": r.get::<_, String>(9)?,
                "uploadedAt": r.get::<_, String>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "attachments": rows }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let workspace = state.workspace_path()?;
    let id = get_required_str(&req.params, "attachmentId")?;
    let relative_path: String = conn
        .query_row(
            "SELECT relative_path FROM attachments WHERE id = ?",
            [&id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "attachment not found"))?;
    conn.execute("DELETE FROM attachments WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    attachments::remove_stored_file(workspace, &relative_path)
        .map_err(|e| io_failed(e, &relative_path))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attachments.store" => handle_store(state, req),
        "attachments.list" => handle_list(state, req),
        "attachments.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
