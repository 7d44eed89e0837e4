use crate::db;
use crate::error::{ResultsError, ResultsResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SESSION_KEY: &str = "session.current";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: serde_json::Value,
    pub persist: bool,
}

/// The open workspace: its path and live connection.
pub type LiveStore<'a> = Option<(&'a Path, &'a Connection)>;

/// Holds the one active session. A persisted session is mirrored into the
/// store of the workspace it was persisted to; an ephemeral one lives only in
/// memory.
#[derive(Debug, Default)]
pub struct SessionContext {
    current: Option<Session>,
    persisted_in: Option<PathBuf>,
}

impl SessionContext {
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Deletes the persisted copy from the workspace that holds it, which may
    /// not be the one open now.
    fn forget_persisted(&mut self, live: LiveStore<'_>) -> anyhow::Result<()> {
        let Some(path) = self.persisted_in.clone() else {
            return Ok(());
        };
        match live {
            Some((workspace, conn)) if workspace == path.as_path() => {
                db::settings_delete(conn, SESSION_KEY)?;
            }
            _ => {
                if path.join(db::DB_FILE_NAME).is_file() {
                    let conn = db::open_db(&path)?;
                    db::settings_delete(&conn, SESSION_KEY)?;
                }
            }
        }
        self.persisted_in = None;
        Ok(())
    }

    /// Replaces the active session. Any previously persisted copy is removed
    /// first, wherever it lives.
    pub fn set(&mut self, live: LiveStore<'_>, session: Session) -> ResultsResult<()> {
        if session.persist && live.is_none() {
            return Err(ResultsError::bad_params("persisted sessions need an open workspace"));
        }
        self.forget_persisted(live).map_err(ResultsError::StoreWrite)?;
        if let Some((workspace, conn)) = live {
            if session.persist {
                let value = serde_json::to_value(&session)?;
                db::settings_set_json(conn, SESSION_KEY, &value)
                    .map_err(ResultsError::StoreWrite)?;
                self.persisted_in = Some(workspace.to_path_buf());
            } else {
                db::settings_delete(conn, SESSION_KEY).map_err(ResultsError::StoreWrite)?;
            }
        }
        self.current = Some(session);
        Ok(())
    }

    /// Drops the in-memory session and every persisted copy it knows of.
    pub fn clear(&mut self, live: LiveStore<'_>) -> ResultsResult<()> {
        self.forget_persisted(live).map_err(ResultsError::StoreWrite)?;
        if let Some((_, conn)) = live {
            db::settings_delete(conn, SESSION_KEY).map_err(ResultsError::StoreWrite)?;
        }
        self.current = None;
        Ok(())
    }

    /// Restores a persisted session after a workspace opens. An ephemeral
    /// in-memory session wins over anything on disk.
    pub fn restore(&mut self, workspace: &Path, conn: &Connection) -> anyhow::Result<()> {
        if self.current.is_some() {
            return Ok(());
        }
        if let Some(saved) = db::settings_get_json(conn, SESSION_KEY)? {
            if let Ok(session) = serde_json::from_value::<Session>(saved) {
                self.current = Some(session);
                self.persisted_in = Some(workspace.to_path_buf());
            }
        }
        Ok(())
    }
}
