use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("{0}")]
    BadParams(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("{0} not found")]
    NotFound(String),

    #[error("score validation failed")]
    Validation(Vec<String>),

    #[error("bulk update rejected for {} record(s)", .0.len())]
    BulkRejected(Vec<serde_json::Value>),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0:#}")]
    Store(#[from] anyhow::Error),

    #[error("{0:#}")]
    StoreWrite(anyhow::Error),

    #[error("{0:#}")]
    Bundle(anyhow::Error),
}

pub type ResultsResult<T> = Result<T, ResultsError>;

impl ResultsError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams(_) | Self::Json(_) => "bad_params",
            Self::NoWorkspace => "no_workspace",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) | Self::BulkRejected(_) => "validation_failed",
            Self::Db(_) | Self::Store(_) => "db_query_failed",
            Self::Io(_) => "io_failed",
            Self::StoreWrite(_) => "db_update_failed",
            Self::Bundle(_) => "bundle_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(errors) => Some(json!({ "errors": errors })),
            Self::BulkRejected(records) => Some(json!({ "records": records })),
            _ => None,
        }
    }
}
