use crate::error::{ResultsError, ResultsResult};
use crate::ipc::error::respond;
use crate::ipc::params::required_str;
use crate::ipc::types::{AppState, Request};
use crate::session::Session;
use serde_json::json;

fn handle_set(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let token = required_str(req, "token")?;
    let user = req
        .params
        .get("user")
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| ResultsError::bad_params("user must be an object"))?;
    let persist = req
        .params
        .get("persist")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let session = Session {
        token,
        user,
        persist,
    };
    let live = state.workspace.as_deref().zip(state.db.as_ref());
    state.session.set(live, session)?;
    tracing::info!(persist, "session established");
    Ok(json!({ "ok": true, "persist": persist }))
}

fn handle_get(state: &mut AppState) -> ResultsResult<serde_json::Value> {
    Ok(json!({ "session": state.session.current() }))
}

fn handle_clear(state: &mut AppState) -> ResultsResult<serde_json::Value> {
    let live = state.workspace.as_deref().zip(state.db.as_ref());
    state.session.clear(live)?;
    tracing::info!("session cleared");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.set" => handle_set(state, req),
        "session.get" => handle_get(state),
        "session.clear" => handle_clear(state),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
