use crate::calc::{apply_bulk_op, compute_aggregate, BulkMode};
use crate::error::{ResultsError, ResultsResult};
use crate::grading::{score_fields, validate_scores, ScoreComponents, ScoreField};
use crate::ipc::error::respond;
use crate::ipc::params::{
    cohort, db_conn, optional_str, record_filter, required_object, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, NewRecord, RecordFilter};
use serde_json::json;
use std::collections::HashSet;

const BULK_UPDATE_MAX_RECORDS: usize = 5000;

fn full_components(
    scores: &serde_json::Map<String, serde_json::Value>,
) -> ResultsResult<ScoreComponents> {
    let mut errors: Vec<String> = ScoreField::ALL
        .into_iter()
        .filter(|f| !scores.contains_key(f.key()))
        .map(|f| format!("{} is required", f.label()))
        .collect();
    errors.extend(validate_scores(scores));
    if !errors.is_empty() {
        return Err(ResultsError::Validation(errors));
    }
    let mut out = ScoreComponents::default();
    for (field, value) in score_fields(scores) {
        out.set(field, value);
    }
    Ok(out)
}

fn handle_upsert(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let student_name = optional_str(req, "studentName").unwrap_or_else(|| student_id.clone());
    let cohort = cohort(req)?;
    let scores = full_components(required_object(req, "scores")?)?;

    let id = records::upsert_record(
        conn,
        &NewRecord {
            student_id,
            student_name,
            cohort,
            scores,
        },
    )?;
    Ok(json!({ "record": records::view_record(conn, &id)? }))
}

fn handle_update(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "id")?;
    let patch = required_object(req, "scores")?;
    let errors = validate_scores(patch);
    if !errors.is_empty() {
        return Err(ResultsError::Validation(errors));
    }

    let current = records::require_record(conn, &id)?;
    let mut next = current.scores;
    for (field, value) in score_fields(patch) {
        next.set(field, value);
    }
    records::update_scores(conn, &id, &next)?;
    Ok(json!({ "record": records::view_record(conn, &id)? }))
}

fn bulk_ids(req: &Request) -> ResultsResult<Vec<String>> {
    let arr = req
        .params
        .get("ids")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ResultsError::bad_params("missing ids[]"))?;
    if arr.is_empty() {
        return Err(ResultsError::bad_params("ids[] must not be empty"));
    }
    if arr.len() > BULK_UPDATE_MAX_RECORDS {
        return Err(ResultsError::bad_params(format!(
            "bulk payload exceeds max records: {} > {}",
            arr.len(),
            BULK_UPDATE_MAX_RECORDS
        )));
    }
    // Repeated ids collapse to their first occurrence so each record is
    // planned and counted once.
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(arr.len());
    for (i, v) in arr.iter().enumerate() {
        let id = v
            .as_str()
            .ok_or_else(|| ResultsError::bad_params(format!("ids[{}] must be a string", i)))?;
        if seen.insert(id) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

/// Evaluates every selected record first and writes only if all of them stay
/// in range; the batch is committed in one transaction.
fn handle_bulk_update(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let ids = bulk_ids(req)?;
    let mode_raw = required_str(req, "mode")?;
    let mode = BulkMode::parse(&mode_raw)
        .ok_or_else(|| ResultsError::bad_params("mode must be one of: set, add, subtract"))?;
    let values = required_object(req, "scores")?;

    let mut errors = Vec::new();
    for field in ScoreField::ALL {
        if let Some(v) = values.get(field.key()) {
            if v.as_f64().is_none() {
                errors.push(format!("{} must be a number", field.label()));
            }
        }
    }
    if mode == BulkMode::Set {
        errors.extend(validate_scores(values));
    }
    if !errors.is_empty() {
        return Err(ResultsError::Validation(errors));
    }
    let fields = score_fields(values);
    if fields.is_empty() {
        return Err(ResultsError::bad_params(
            "scores must name at least one of: assessment1, assessment2, ca_test, exam_score",
        ));
    }

    let mut planned: Vec<(String, ScoreComponents)> = Vec::with_capacity(ids.len());
    let mut rejected: Vec<serde_json::Value> = Vec::new();
    for id in &ids {
        let Some(current) = records::get_record(conn, id)? else {
            rejected.push(json!({
                "id": id,
                "code": "not_found",
                "errors": ["score record not found"],
            }));
            continue;
        };
        match apply_bulk_op(&current.scores, mode, &fields) {
            Ok(next) => planned.push((id.clone(), next)),
            Err(errs) => rejected.push(json!({
                "id": id,
                "studentId": current.student_id,
                "code": "validation_failed",
                "errors": errs,
            })),
        }
    }
    if !rejected.is_empty() {
        return Err(ResultsError::BulkRejected(rejected));
    }

    let tx = conn.unchecked_transaction()?;
    for (id, next) in &planned {
        records::update_scores(&tx, id, next)?;
    }
    tx.commit()?;

    tracing::info!(
        mode = mode.as_str(),
        updated = planned.len(),
        "bulk score update applied"
    );
    Ok(json!({ "updated": planned.len(), "mode": mode.as_str() }))
}

fn handle_list(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let rows = records::list_records(conn, &record_filter(req))?;
    Ok(json!({ "records": rows }))
}

fn handle_get(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "id")?;
    Ok(json!({ "record": records::view_record(conn, &id)? }))
}

fn handle_student_results(
    state: &mut AppState,
    req: &Request,
) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let filter = RecordFilter {
        student_id: Some(required_str(req, "studentId")?),
        session: optional_str(req, "session"),
        term: optional_str(req, "term"),
        ..RecordFilter::default()
    };
    let subjects = records::list_records(conn, &filter)?;
    let aggregate = compute_aggregate(subjects.iter().map(|r| r.total));
    Ok(json!({ "subjects": subjects, "aggregate": aggregate }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scores.upsert" => handle_upsert(state, req),
        "scores.update" => handle_update(state, req),
        "scores.bulkUpdate" => handle_bulk_update(state, req),
        "scores.list" => handle_list(state, req),
        "scores.get" => handle_get(state, req),
        "results.student" => handle_student_results(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
