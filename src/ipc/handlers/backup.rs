use crate::backup;
use crate::db;
use crate::error::{ResultsError, ResultsResult};
use crate::ipc::error::respond;
use crate::ipc::params::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_bundle(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let workspace = state.workspace.clone().ok_or(ResultsError::NoWorkspace)?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);

    let summary =
        backup::export_workspace_bundle(&workspace, &out_path).map_err(ResultsError::Bundle)?;
    tracing::info!(path = %out_path.display(), "workspace bundle exported");
    Ok(json!({
        "ok": true,
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let in_path = PathBuf::from(required_str(req, "inPath")?);
    let workspace = PathBuf::from(required_str(req, "workspacePath")?);

    let reopen = state.workspace.as_ref() == Some(&workspace);
    if reopen {
        state.db = None;
    }
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    if reopen {
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => {
                tracing::warn!(
                    workspace = %workspace.display(),
                    error = %e,
                    "workspace reopen failed"
                );
                state.workspace = None;
                return Err(ResultsError::Store(e.context("failed to reopen workspace")));
            }
        }
    }
    let summary = imported.map_err(ResultsError::Bundle)?;

    tracing::info!(workspace = %workspace.display(), "workspace bundle imported");
    Ok(json!({
        "ok": true,
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
        "dbSha256": summary.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_import_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
