use thiserror::Error;

/// The error taxonomy for the command request pipeline.
///
/// Parse, resolve, and authorize variants are user-visible: the router
/// renders them through a command's `command_error` template and posts
/// them to the source channel. Backend and persistence errors are
/// logged with full context but reported to the channel only in
/// sanitized form.
#[derive(Debug, Error, Clone)]
pub enum GortError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("no such command: {name}")]
    NoSuchCommand { name: String },

    #[error("ambiguous command {name}: candidates {candidates:?}")]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    #[error("not authorized")]
    Unauthorized { missing_permissions: Vec<String> },

    #[error("command has no rules")]
    NoRules,

    #[error("rule error: {0}")]
    RuleError(String),

    #[error("backend error ({subcode}): {message}")]
    Backend {
        subcode: BackendErrorKind,
        message: String,
    },

    #[error("command timed out after {elapsed_ms}ms (deadline {deadline_ms}ms)")]
    Timeout { elapsed_ms: u64, deadline_ms: u64 },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("adapter error: {0}")]
    Adapter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Pull,
    Schedule,
    Runtime,
    Unreachable,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendErrorKind::Pull => "pull",
            BackendErrorKind::Schedule => "schedule",
            BackendErrorKind::Runtime => "runtime",
            BackendErrorKind::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

impl GortError {
    /// The short error code used in audit rows, e.g. `parse`, `ambiguous`.
    pub fn audit_code(&self) -> &'static str {
        match self {
            GortError::Parse { .. } => "parse",
            GortError::NoSuchCommand { .. } => "no_such_command",
            GortError::Ambiguous { .. } => "ambiguous",
            GortError::Unauthorized { .. } => "unauthorized",
            GortError::NoRules => "no_rules",
            GortError::RuleError(_) => "rule_error",
            GortError::Backend { .. } => "backend_error",
            GortError::Timeout { .. } => "timeout",
            GortError::Persistence(_) => "persistence_error",
            GortError::Adapter(_) => "adapter_error",
        }
    }

    /// Whether this error should be rendered and posted to the source
    /// channel (vs. logged only, e.g. when the event never reached a
    /// request that could attach a reply-worthy error).
    pub fn user_visible(&self) -> bool {
        !matches!(self, GortError::Adapter(_))
    }
}

impl From<redb::Error> for GortError {
    fn from(e: redb::Error) -> Self {
        GortError::Persistence(e.to_string())
    }
}

impl From<redb::TransactionError> for GortError {
    fn from(e: redb::TransactionError) -> Self {
        GortError::Persistence(e.to_string())
    }
}

impl From<redb::TableError> for GortError {
    fn from(e: redb::TableError) -> Self {
        GortError::Persistence(e.to_string())
    }
}

impl From<redb::StorageError> for GortError {
    fn from(e: redb::StorageError) -> Self {
        GortError::Persistence(e.to_string())
    }
}

impl From<redb::CommitError> for GortError {
    fn from(e: redb::CommitError) -> Self {
        GortError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for GortError {
    fn from(e: serde_json::Error) -> Self {
        GortError::Persistence(format!("serialization error: {e}"))
    }
}
