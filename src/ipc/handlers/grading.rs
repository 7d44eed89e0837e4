use crate::error::{ResultsError, ResultsResult};
use crate::grading::{derive_grade, grade_to_remark, validate_scores};
use crate::ipc::error::respond;
use crate::ipc::params::required_object;
use crate::ipc::types::{AppState, Request};
use crate::report::grade_key;
use serde_json::json;

fn handle_derive(req: &Request) -> ResultsResult<serde_json::Value> {
    let total = req
        .params
        .get("total")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ResultsError::bad_params("total must be a number"))?;
    let grade = derive_grade(total);
    Ok(json!({ "total": total, "grade": grade, "remark": grade.remark() }))
}

fn handle_remark(req: &Request) -> ResultsResult<serde_json::Value> {
    let grade = req
        .params
        .get("grade")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    Ok(json!({ "grade": grade, "remark": grade_to_remark(grade) }))
}

fn handle_scale() -> ResultsResult<serde_json::Value> {
    Ok(json!({ "bands": grade_key() }))
}

fn handle_validate(req: &Request) -> ResultsResult<serde_json::Value> {
    let scores = required_object(req, "scores")?;
    Ok(json!({ "errors": validate_scores(scores) }))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grading.derive" => handle_derive(req),
        "grading.remark" => handle_remark(req),
        "grading.scale" => handle_scale(),
        "scores.validate" => handle_validate(req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
