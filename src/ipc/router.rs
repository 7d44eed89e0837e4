use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "dispatch");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grading::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::scores::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::stats::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::result_sheet::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &req) {
        return resp;
    }

    tracing::warn!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
