use super::setup::load_export_settings;
use crate::error::{ResultsError, ResultsResult};
use crate::ipc::error::respond;
use crate::ipc::params::{db_conn, optional_str, record_filter, required_str};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, RecordFilter, ScoreRecord};
use crate::report::{format_percent, format_score, to_csv, CSV_MIME_TYPE};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn string_list(v: &serde_json::Value, what: &str) -> ResultsResult<Vec<String>> {
    let arr = v
        .as_array()
        .ok_or_else(|| ResultsError::bad_params(format!("{} must be an array", what)))?;
    arr.iter()
        .map(|f| match f {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            serde_json::Value::Null => Ok(String::new()),
            _ => Err(ResultsError::bad_params(format!(
                "{} entries must be scalars",
                what
            ))),
        })
        .collect()
}

/// Resolves `outPath`; relative paths land under the configured export directory.
fn resolve_out_path(conn: Option<&Connection>, req: &Request) -> ResultsResult<Option<PathBuf>> {
    let Some(raw) = optional_str(req, "outPath") else {
        return Ok(None);
    };
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Ok(Some(path));
    }
    let base = match conn {
        Some(c) => load_export_settings(c)?.default_directory,
        None => None,
    };
    Ok(Some(match base {
        Some(dir) => PathBuf::from(dir).join(path),
        None => path,
    }))
}

fn deliver(
    conn: Option<&Connection>,
    req: &Request,
    csv: String,
    row_count: usize,
) -> ResultsResult<serde_json::Value> {
    let out = resolve_out_path(conn, req)?;
    if let Some(path) = &out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &csv)?;
        tracing::info!(path = %path.display(), rows = row_count, "csv export written");
    }
    let mut result = json!({
        "csv": csv,
        "mimeType": CSV_MIME_TYPE,
        "rowCount": row_count,
    });
    if let Some(path) = out {
        result["path"] = json!(path.to_string_lossy());
    }
    if let Some(c) = conn {
        if load_export_settings(c)?.include_generated_at {
            result["generatedAt"] = json!(chrono::Utc::now().to_rfc3339());
        }
    }
    Ok(result)
}

fn handle_generic_csv(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let headers = string_list(
        req.params
            .get("headers")
            .ok_or_else(|| ResultsError::bad_params("missing headers[]"))?,
        "headers",
    )?;
    let rows_raw = req
        .params
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ResultsError::bad_params("missing rows[]"))?;
    let rows = rows_raw
        .iter()
        .map(|r| string_list(r, "rows[]"))
        .collect::<ResultsResult<Vec<_>>>()?;
    let csv = to_csv(&headers, &rows);
    deliver(state.db.as_ref(), req, csv, rows.len())
}

const TEACHER_HEADERS: [&str; 14] = [
    "Student ID",
    "Student Name",
    "Subject",
    "Class",
    "Session",
    "Term",
    "Assessment 1",
    "Assessment 2",
    "CA Test",
    "Exam Score",
    "Total",
    "Grade",
    "Remark",
    "Position",
];

fn teacher_row(r: &ScoreRecord) -> Vec<String> {
    vec![
        r.student_id.clone(),
        r.student_name.clone(),
        r.subject.clone(),
        r.class_name.clone(),
        r.session.clone(),
        r.term.clone(),
        format_score(r.scores.assessment1),
        format_score(r.scores.assessment2),
        format_score(r.scores.ca_test),
        format_score(r.scores.exam_score),
        format_score(r.total),
        r.grade.to_string(),
        r.remark.to_string(),
        r.position_in_class.to_string(),
    ]
}

fn handle_teacher_results_csv(
    state: &mut AppState,
    req: &Request,
) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let rows: Vec<Vec<String>> = records::list_records(conn, &record_filter(req))?
        .iter()
        .map(teacher_row)
        .collect();
    let headers: Vec<String> = TEACHER_HEADERS.iter().map(|h| h.to_string()).collect();
    let count = rows.len();
    deliver(Some(conn), req, to_csv(&headers, &rows), count)
}

const STUDENT_HEADERS: [&str; 9] = [
    "Subject",
    "Session",
    "Term",
    "Total",
    "Percentage",
    "Grade",
    "Remark",
    "Position",
    "Highest In Class",
];

fn handle_student_results_csv(
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
    // Totals are out of 100, so the percentage is the total itself.
    let rows: Vec<Vec<String>> = records::list_records(conn, &filter)?
        .iter()
        .map(|r| {
            vec![
                r.subject.clone(),
                r.session.clone(),
                r.term.clone(),
                format_score(r.total),
                format_percent(r.total),
                r.grade.to_string(),
                r.remark.to_string(),
                r.position_in_class.to_string(),
                format_score(r.highest_in_class),
            ]
        })
        .collect();
    let headers: Vec<String> = STUDENT_HEADERS.iter().map(|h| h.to_string()).collect();
    let count = rows.len();
    deliver(Some(conn), req, to_csv(&headers, &rows), count)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exports.csv" => handle_generic_csv(state, req),
        "exports.teacherResultsCsv" => handle_teacher_results_csv(state, req),
        "exports.studentResultsCsv" => handle_student_results_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
