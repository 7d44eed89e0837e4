use crate::calc::{highest_total, rank_positions, Cohort};
use crate::error::{ResultsError, ResultsResult};
use crate::grading::{GradeBand, ScoreComponents};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, student_id, student_name, subject, class_name, session, term,
     assessment1, assessment2, ca_test, exam_score, updated_at";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub cohort: Cohort,
    pub scores: ScoreComponents,
    pub updated_at: Option<String>,
}

/// A score record as handed to callers: components plus everything derived
/// from them and from the cohort.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject: String,
    pub class_name: String,
    pub session: String,
    pub term: String,
    #[serde(flatten)]
    pub scores: ScoreComponents,
    pub total: f64,
    pub grade: GradeBand,
    pub remark: &'static str,
    pub position_in_class: usize,
    pub highest_in_class: f64,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub subject: Option<String>,
    pub class_name: Option<String>,
    pub session: Option<String>,
    pub term: Option<String>,
    pub student_id: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub student_id: String,
    pub student_name: String,
    pub cohort: Cohort,
    pub scores: ScoreComponents,
}

fn map_stored(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        student_name: row.get(2)?,
        cohort: Cohort {
            subject: row.get(3)?,
            class_name: row.get(4)?,
            session: row.get(5)?,
            term: row.get(6)?,
        },
        scores: ScoreComponents {
            assessment1: row.get(7)?,
            assessment2: row.get(8)?,
            ca_test: row.get(9)?,
            exam_score: row.get(10)?,
        },
        updated_at: row.get(11)?,
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn get_record(conn: &Connection, id: &str) -> ResultsResult<Option<StoredRecord>> {
    let sql = format!("SELECT {} FROM score_records WHERE id = ?", RECORD_COLUMNS);
    Ok(conn.query_row(&sql, [id], map_stored).optional()?)
}

pub fn require_record(conn: &Connection, id: &str) -> ResultsResult<StoredRecord> {
    get_record(conn, id)?.ok_or_else(|| ResultsError::NotFound(format!("score record {}", id)))
}

/// Inserts or overwrites the record for (student, cohort). Returns its id.
pub fn upsert_record(conn: &Connection, rec: &NewRecord) -> ResultsResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO score_records(id, student_id, student_name, subject, class_name, session, term,
                                   assessment1, assessment2, ca_test, exam_score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject, class_name, session, term) DO UPDATE SET
           student_name = excluded.student_name,
           assessment1 = excluded.assessment1,
           assessment2 = excluded.assessment2,
           ca_test = excluded.ca_test,
           exam_score = excluded.exam_score,
           updated_at = excluded.updated_at",
        (
            &id,
            &rec.student_id,
            &rec.student_name,
            &rec.cohort.subject,
            &rec.cohort.class_name,
            &rec.cohort.session,
            &rec.cohort.term,
            rec.scores.assessment1,
            rec.scores.assessment2,
            rec.scores.ca_test,
            rec.scores.exam_score,
            now_rfc3339(),
        ),
    )?;
    let stored_id: String = conn.query_row(
        "SELECT id FROM score_records
         WHERE student_id = ? AND subject = ? AND class_name = ? AND session = ? AND term = ?",
        (
            &rec.student_id,
            &rec.cohort.subject,
            &rec.cohort.class_name,
            &rec.cohort.session,
            &rec.cohort.term,
        ),
        |r| r.get(0),
    )?;
    Ok(stored_id)
}

pub fn update_scores(conn: &Connection, id: &str, scores: &ScoreComponents) -> ResultsResult<()> {
    let n = conn.execute(
        "UPDATE score_records
         SET assessment1 = ?, assessment2 = ?, ca_test = ?, exam_score = ?, updated_at = ?
         WHERE id = ?",
        (
            scores.assessment1,
            scores.assessment2,
            scores.ca_test,
            scores.exam_score,
            now_rfc3339(),
            id,
        ),
    )?;
    if n == 0 {
        return Err(ResultsError::NotFound(format!("score record {}", id)));
    }
    Ok(())
}

pub fn query_stored(conn: &Connection, filter: &RecordFilter) -> ResultsResult<Vec<StoredRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    let exact = [
        ("subject = ?", &filter.subject),
        ("class_name = ?", &filter.class_name),
        ("session = ?", &filter.session),
        ("term = ?", &filter.term),
        ("student_id = ?", &filter.student_id),
    ];
    for (clause, value) in exact {
        if let Some(v) = value {
            clauses.push(clause);
            binds.push(Value::Text(v.clone()));
        }
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push("(student_name LIKE ? OR student_id LIKE ?)");
        let pattern = format!("%{}%", search);
        binds.push(Value::Text(pattern.clone()));
        binds.push(Value::Text(pattern));
    }

    let mut sql = format!("SELECT {} FROM score_records", RECORD_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY subject, class_name, session, term, student_name, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), map_stored)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (record id, total) for every record in the cohort.
pub fn cohort_totals(conn: &Connection, cohort: &Cohort) -> ResultsResult<Vec<(String, f64)>> {
    let filter = RecordFilter {
        subject: Some(cohort.subject.clone()),
        class_name: Some(cohort.class_name.clone()),
        session: Some(cohort.session.clone()),
        term: Some(cohort.term.clone()),
        ..RecordFilter::default()
    };
    Ok(query_stored(conn, &filter)?
        .into_iter()
        .map(|r| (r.id, r.scores.total()))
        .collect())
}

/// Loads matching records and attaches cohort-relative position and highest
/// total. Ranking always spans the whole cohort, not just the filtered rows.
pub fn list_records(conn: &Connection, filter: &RecordFilter) -> ResultsResult<Vec<ScoreRecord>> {
    let stored = query_stored(conn, filter)?;

    let mut cohort_cache: HashMap<Cohort, (HashMap<String, usize>, f64)> = HashMap::new();
    let mut out = Vec::with_capacity(stored.len());
    for rec in stored {
        if !cohort_cache.contains_key(&rec.cohort) {
            let totals = cohort_totals(conn, &rec.cohort)?;
            let values: Vec<f64> = totals.iter().map(|(_, t)| *t).collect();
            let positions = rank_positions(&values);
            let by_id: HashMap<String, usize> = totals
                .into_iter()
                .zip(positions)
                .map(|((id, _), pos)| (id, pos))
                .collect();
            let highest = highest_total(&values).unwrap_or(0.0);
            cohort_cache.insert(rec.cohort.clone(), (by_id, highest));
        }
        let (position_in_class, highest_in_class) = cohort_cache
            .get(&rec.cohort)
            .map(|(by_id, highest)| (by_id.get(&rec.id).copied().unwrap_or(1), *highest))
            .unwrap_or((1, rec.scores.total()));
        out.push(to_view(rec, position_in_class, highest_in_class));
    }
    Ok(out)
}

fn to_view(rec: StoredRecord, position_in_class: usize, highest_in_class: f64) -> ScoreRecord {
    let total = rec.scores.total();
    let grade = rec.scores.grade();
    ScoreRecord {
        id: rec.id,
        student_id: rec.student_id,
        student_name: rec.student_name,
        subject: rec.cohort.subject,
        class_name: rec.cohort.class_name,
        session: rec.cohort.session,
        term: rec.cohort.term,
        scores: rec.scores,
        total,
        grade,
        remark: grade.remark(),
        position_in_class,
        highest_in_class,
        updated_at: rec.updated_at,
    }
}

pub fn view_record(conn: &Connection, id: &str) -> ResultsResult<ScoreRecord> {
    let rec = require_record(conn, id)?;
    let filter = RecordFilter {
        subject: Some(rec.cohort.subject.clone()),
        class_name: Some(rec.cohort.class_name.clone()),
        session: Some(rec.cohort.session.clone()),
        term: Some(rec.cohort.term.clone()),
        student_id: Some(rec.student_id.clone()),
        ..RecordFilter::default()
    };
    list_records(conn, &filter)?
        .into_iter()
        .find(|r| r.id == rec.id)
        .ok_or_else(|| ResultsError::NotFound(format!("score record {}", id)))
}
