use super::setup::{load_school, load_sheet_settings, SheetSettings};
use crate::error::{ResultsError, ResultsResult};
use crate::ipc::error::respond;
use crate::ipc::params::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, RecordFilter};
use crate::report::{build_result_sheet, ResultSheetInput, SheetOptions, SubjectInput};
use serde_json::{json, Value};

/// Ratings that omit `maxScore` take the configured default.
fn fill_domain_max(payload: &mut Value, default_max: f64) {
    for key in ["affectiveDomain", "psychomotorDomain"] {
        let Some(items) = payload.get_mut(key).and_then(|v| v.as_array_mut()) else {
            continue;
        };
        for item in items.iter_mut() {
            if let Some(obj) = item.as_object_mut() {
                obj.entry("maxScore").or_insert_with(|| json!(default_max));
            }
        }
    }
}

fn parse_input(
    mut payload: Value,
    settings: Option<&SheetSettings>,
) -> ResultsResult<ResultSheetInput> {
    if !payload.is_object() {
        return Err(ResultsError::bad_params("params must be an object"));
    }
    let default_max = settings.map(|s| s.default_domain_max_score).unwrap_or(5.0);
    fill_domain_max(&mut payload, default_max);
    serde_json::from_value(payload)
        .map_err(|e| ResultsError::bad_params(format!("invalid result sheet payload: {}", e)))
}

fn generated_at() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn handle_build(state: &mut AppState, req: &Request) -> ResultsResult<Value> {
    let settings = match state.db.as_ref() {
        Some(conn) => Some(load_sheet_settings(conn)?),
        None => None,
    };
    let input = parse_input(req.params.clone(), settings.as_ref())?;
    let options = settings.map(|s| s.options).unwrap_or_default();
    let sheet = build_result_sheet(input, options, generated_at())?;
    Ok(json!({ "sheet": sheet }))
}

/// Builds a sheet from stored records for one student and term. Caller-supplied
/// fields (domains, remarks, attendance, school) fill the rest.
fn handle_for_student(state: &mut AppState, req: &Request) -> ResultsResult<Value> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let session = required_str(req, "session")?;
    let term = required_str(req, "term")?;
    let settings = load_sheet_settings(conn)?;

    let subjects = records::list_records(
        conn,
        &RecordFilter {
            student_id: Some(student_id.clone()),
            session: Some(session.clone()),
            term: Some(term.clone()),
            ..RecordFilter::default()
        },
    )?;
    if subjects.is_empty() {
        return Err(ResultsError::NotFound(format!(
            "results for student {} in {} {}",
            student_id, session, term
        )));
    }

    let mut payload = req.params.clone();
    if !payload.is_object() {
        return Err(ResultsError::bad_params("params must be an object"));
    }
    if payload.get("school").is_none() {
        payload["school"] = serde_json::to_value(load_school(conn)?)?;
    }
    if payload.get("daysSchoolOpened").is_none() {
        payload["daysSchoolOpened"] = json!(settings.default_days_school_opened);
    }
    let mut student = payload
        .get("student")
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}));
    student["id"] = json!(student_id);
    if student.get("name").is_none() {
        student["name"] = json!(subjects[0].student_name);
    }
    student["className"] = json!(subjects[0].class_name);
    student["session"] = json!(session);
    student["term"] = json!(term);
    payload["student"] = student;

    let mut input = parse_input(payload, Some(&settings))?;
    input.subjects = subjects
        .iter()
        .map(|r| SubjectInput {
            subject: r.subject.clone(),
            assessment1: r.scores.assessment1,
            assessment2: r.scores.assessment2,
            ca_test: r.scores.ca_test,
            exam_score: r.scores.exam_score,
            position_in_class: Some(r.position_in_class),
            highest_in_class: Some(r.highest_in_class),
        })
        .collect();

    let options: SheetOptions = settings.options;
    let sheet = build_result_sheet(input, options, generated_at())?;
    Ok(json!({ "sheet": sheet }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "resultSheet.build" => handle_build(state, req),
        "resultSheet.forStudent" => handle_for_student(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
