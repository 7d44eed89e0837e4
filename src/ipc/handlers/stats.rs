use crate::calc::{compute_class_statistics, ClassStatistics, Cohort};
use crate::error::{ResultsError, ResultsResult};
use crate::ipc::error::respond;
use crate::ipc::params::{cohort, db_conn};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::report::format_percent;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn stats_payload(stats: &ClassStatistics) -> ResultsResult<serde_json::Value> {
    let mut payload = serde_json::to_value(stats)?;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("passRate".into(), json!(stats.pass_rate()));
        obj.insert("passRateLabel".into(), json!(format_percent(stats.pass_rate())));
    }
    Ok(payload)
}

fn store_statistics(conn: &Connection, stats: &ClassStatistics) -> ResultsResult<()> {
    conn.execute(
        "INSERT INTO class_statistics(subject, class_name, session, term, stats_json, calculated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(subject, class_name, session, term) DO UPDATE SET
           stats_json = excluded.stats_json,
           calculated_at = excluded.calculated_at",
        (
            &stats.subject,
            &stats.class_name,
            &stats.session,
            &stats.term,
            serde_json::to_string(stats)?,
            &stats.calculated_at,
        ),
    )?;
    Ok(())
}

fn load_statistics(conn: &Connection, cohort: &Cohort) -> ResultsResult<Option<ClassStatistics>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT stats_json FROM class_statistics
             WHERE subject = ? AND class_name = ? AND session = ? AND term = ?",
            (
                &cohort.subject,
                &cohort.class_name,
                &cohort.session,
                &cohort.term,
            ),
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Rebuilds the cohort's statistics from its current score records and
/// replaces the cached copy.
pub fn recalculate(conn: &Connection, cohort: &Cohort) -> ResultsResult<ClassStatistics> {
    let totals: Vec<f64> = records::cohort_totals(conn, cohort)?
        .into_iter()
        .map(|(_, t)| t)
        .collect();
    let stats = compute_class_statistics(cohort, &totals, chrono::Utc::now().to_rfc3339());
    store_statistics(conn, &stats)?;
    tracing::info!(
        subject = %cohort.subject,
        class = %cohort.class_name,
        students = stats.total_students,
        "class statistics recalculated"
    );
    Ok(stats)
}

fn handle_recalculate(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let cohort = cohort(req)?;
    let stats = recalculate(conn, &cohort)?;
    Ok(json!({ "statistics": stats_payload(&stats)? }))
}

fn handle_get(state: &mut AppState, req: &Request) -> ResultsResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let cohort = cohort(req)?;
    let cached = load_statistics(conn, &cohort)?.ok_or_else(|| {
        ResultsError::NotFound(format!(
            "statistics for {} / {} / {} / {}",
            cohort.subject, cohort.class_name, cohort.session, cohort.term
        ))
    })?;
    Ok(json!({ "statistics": stats_payload(&cached)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.recalculate" => handle_recalculate(state, req),
        "stats.get" => handle_get(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
