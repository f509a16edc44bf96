use thiserror::Error;

pub type ScribeResult<T> = Result<T, ScribeError>;

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config failure: {0}")]
    Config(#[from] toml::de::Error),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("silence analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("recording too long: estimated {estimated_seconds:.0}s exceeds {max_seconds}s")]
    TooLong {
        estimated_seconds: f64,
        max_seconds: u64,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("run cancelled: {0}")]
    Cancelled(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("chunk {chunk_index} failed: {source}")]
    ChunkFailed {
        chunk_index: u32,
        #[source]
        source: Box<ScribeError>,
    },
}

impl ScribeError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandFailed {
            command,
            status,
            stderr_suffix,
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix,
        }
    }

    /// Attach a chunk index to an error that occurred while processing a
    /// single chunk. Cancellation passes through untouched so the run-level
    /// reason stays visible.
    #[must_use]
    pub fn for_chunk(self, chunk_index: u32) -> Self {
        match self {
            cancelled @ Self::Cancelled(_) => cancelled,
            other => Self::ChunkFailed {
                chunk_index,
                source: Box::new(other),
            },
        }
    }

    /// The chunk index this failure is scoped to, if any.
    #[must_use]
    pub fn chunk_index(&self) -> Option<u32> {
        match self {
            Self::ChunkFailed { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }

    /// Stable, unique, machine-readable error code for every variant.
    /// `ChunkFailed` delegates to its cause so the code describes what went
    /// wrong rather than where.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "RS-IO",
            Self::Json(_) => "RS-JSON",
            Self::Config(_) => "RS-CONFIG",
            Self::CommandMissing { .. } => "RS-CMD-MISSING",
            Self::CommandFailed { .. } => "RS-CMD-FAILED",
            Self::CommandTimedOut { .. } => "RS-CMD-TIMEOUT",
            Self::NotFound { .. } => "RS-NOT-FOUND",
            Self::Transport(_) => "RS-TRANSPORT",
            Self::AnalysisFailed(_) => "RS-ANALYSIS",
            Self::TooLong { .. } => "RS-TOO-LONG",
            Self::InvalidRequest(_) => "RS-INVALID-REQUEST",
            Self::Cancelled(_) => "RS-CANCELLED",
            Self::Internal(_) => "RS-INTERNAL",
            Self::ChunkFailed { source, .. } => source.error_code(),
        }
    }

    /// True when retrying the same request could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::ChunkFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}
