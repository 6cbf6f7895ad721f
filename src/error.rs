use thiserror::Error;

/// Failures raised by a slot store backend.
///
/// These are passed through to the caller as-is; no backend retries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure talking to the remote store.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with a non-success status.
    #[error("store returned {status}: {message}")]
    Api { status: u16, message: String },

    /// A response or stored document could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Local file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Local document file is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the slot coordinator and the key/roster parsers.
#[derive(Debug, Error)]
pub enum SlotError {
    /// The range query for the active window could not complete.
    #[error("failed to load schedule: {0}")]
    Fetch(#[source] StoreError),

    /// Creating or overwriting a slot record failed.
    #[error("failed to save {key}: {source}")]
    Write { key: String, source: StoreError },

    /// Deleting a slot record failed.
    #[error("failed to clear {key}: {source}")]
    Delete { key: String, source: StoreError },

    /// A storage id or employee name cannot form a valid slot key.
    #[error("invalid slot key: {0}")]
    InvalidKey(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// The employee is not part of the configured roster.
    #[error("unknown employee: {0}")]
    UnknownEmployee(String),

    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// The snapshot does not cover the coordinate, so its state is unknown.
    #[error("{0} is not in the loaded schedule; reload and retry")]
    NotLoaded(String),
}

impl SlotError {
    /// True for failures of the underlying store, as opposed to bad input.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            SlotError::Fetch(_) | SlotError::Write { .. } | SlotError::Delete { .. }
        )
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Load(String),

    #[error("store backend `{backend}` requires `{field}`")]
    MissingField { backend: &'static str, field: &'static str },
}

pub type Result<T> = std::result::Result<T, SlotError>;
