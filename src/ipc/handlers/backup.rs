use crate::backup;
use crate::ipc::error::{io_failed, respond, HandlerErr};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::params::{get_required_str, opt_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    opt_str(&req.params, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(HandlerErr::no_workspace)
}

fn handle_export(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = get_required_str(&req.params, "outPath")?;
    let workspace_path = target_workspace(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| io_failed(e, &out_path))?;
    info!(path = %out_path, uploads = export.upload_count, "workspace exported");
    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "uploadCount": export.upload_count,
    }))
}

fn handle_import(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let in_path = get_required_str(&req.params, "inPath")?;
    let workspace_path = target_workspace(state, req)?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // The database file is replaced underneath any open handle.
    let previous = state.db.take().and(state.workspace.clone());

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(import) => import,
        Err(e) => {
            if let Some(prev) = previous {
                if let Err(reopen) = open_workspace(state, &prev) {
                    warn!(
                        workspace = %prev.to_string_lossy(),
                        code = reopen.code,
                        "failed to reopen workspace after import error"
                    );
                }
            }
            return Err(io_failed(e, &in_path));
        }
    };
    open_workspace(state, &workspace_path)?;
    info!(path = %in_path, format = %import.bundle_format_detected, "workspace restored");
    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "uploadCount": import.upload_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export(state, req),
        "backup.importWorkspaceBundle" => handle_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
