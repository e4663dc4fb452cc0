use thiserror::Error;

/// Failures of record store operations and persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not {0} in the new entry")]
    MissingKey(&'static str),

    #[error("already used recordid: {0}")]
    Duplicate(String),

    #[error("{field} of the entry ({given}) doesn't match the requested one ({expected})")]
    Conflict {
        field: &'static str,
        expected: String,
        given: String,
    },

    #[error("data not found: {0}")]
    NotFound(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid records file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures talking to the remote dataset API.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Failures of a refresh cycle.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("remote source: {0}")]
    Source(#[from] SourceError),

    #[error("persisting refreshed store: {0}")]
    Persist(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid week identifier '{input}', expected YYYY-WW")]
pub struct WeekParseError {
    pub input: String,
}
