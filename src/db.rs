use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "results.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Component scores only. total/grade are derived on every read.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            class_name TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            assessment1 REAL NOT NULL,
            assessment2 REAL NOT NULL,
            ca_test REAL NOT NULL,
            exam_score REAL NOT NULL,
            updated_at TEXT,
            UNIQUE(student_id, subject, class_name, session, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_records_cohort
         ON score_records(subject, class_name, session, term)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_records_student ON score_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_statistics(
            subject TEXT NOT NULL,
            class_name TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            stats_json TEXT NOT NULL,
            calculated_at TEXT NOT NULL,
            PRIMARY KEY(subject, class_name, session, term)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}
