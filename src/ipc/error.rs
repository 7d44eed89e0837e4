use crate::error::ResultsError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Wraps a handler outcome in the response envelope.
pub fn respond(
    id: &str,
    method: &str,
    result: Result<serde_json::Value, ResultsError>,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => {
            tracing::warn!(method, code = e.code(), error = %e, "request rejected");
            err(id, e.code(), e.to_string(), e.details())
        }
    }
}
