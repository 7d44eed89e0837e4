use super::types::{AppState, Request};
use crate::calc::Cohort;
use crate::error::{ResultsError, ResultsResult};
use crate::records::RecordFilter;
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState) -> ResultsResult<&'a Connection> {
    state.db.as_ref().ok_or(ResultsError::NoWorkspace)
}

pub fn required_str(req: &Request, key: &str) -> ResultsResult<String> {
    match optional_str(req, key) {
        Some(v) => Ok(v),
        None => Err(ResultsError::bad_params(format!("missing {}", key))),
    }
}

/// Trimmed, non-empty string param.
pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_object<'a>(
    req: &'a Request,
    key: &str,
) -> ResultsResult<&'a serde_json::Map<String, serde_json::Value>> {
    req.params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| ResultsError::bad_params(format!("{} must be an object", key)))
}

pub fn cohort(req: &Request) -> ResultsResult<Cohort> {
    Ok(Cohort {
        subject: required_str(req, "subject")?,
        class_name: required_str(req, "className")?,
        session: required_str(req, "session")?,
        term: required_str(req, "term")?,
    })
}

pub fn record_filter(req: &Request) -> RecordFilter {
    RecordFilter {
        subject: optional_str(req, "subject"),
        class_name: optional_str(req, "className"),
        session: optional_str(req, "session"),
        term: optional_str(req, "term"),
        student_id: optional_str(req, "studentId"),
        search: optional_str(req, "search"),
    }
}
