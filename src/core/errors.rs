//! Error types for the kvasir-rs library.
//!
//! Errors are grouped by how the scheduler reacts to them: validation
//! errors surface synchronously to the caller, transient errors are
//! retried with backoff, resource and semantic errors are localised to a
//! file or phase, and integrity errors fail the whole repository.

use std::io;

use thiserror::Error;

/// Main result type for kvasir operations.
pub type Result<T> = std::result::Result<T, KvasirError>;

/// Comprehensive error type for all kvasir operations.
#[derive(Error, Debug)]
pub enum KvasirError {
    /// I/O related errors (file operations, scratch space, archives)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Caller errors: bad archive, bad URL, absent branch, over-cap submission
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// Parsing and language processing errors
    #[error("Parse error in {language}: {message}")]
    Parse {
        /// Language being parsed
        language: String,
        /// Error description
        message: String,
        /// File path where the error occurred
        file_path: Option<String>,
        /// Line number (if available)
        line: Option<usize>,
    },

    /// Graph algorithm errors
    #[error("Graph analysis error: {message}")]
    Graph {
        /// Error description
        message: String,
        /// Graph node or edge that caused the error
        element: Option<String>,
    },

    /// Database and persistence errors
    #[error("Database error: {message}")]
    Database {
        /// Error description
        message: String,
        /// Database operation that failed
        operation: Option<String>,
        /// Underlying database error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Analysis pipeline errors
    #[error("Pipeline error at stage '{stage}': {message}")]
    Pipeline {
        /// Pipeline stage where the error occurred
        stage: String,
        /// Error description
        message: String,
    },

    /// Provider (embedding / LLM) transport failures
    #[error("Provider error from {provider}: {message}")]
    Provider {
        /// Provider name ("embedding", "llm")
        provider: String,
        /// Error description
        message: String,
        /// Whether the failure is worth retrying (5xx, timeout, rate limit)
        retryable: bool,
    },

    /// Resource exhaustion: scratch disk full, file over budget
    #[error("Resource exhaustion: {message}")]
    ResourceExhaustion {
        /// Error description
        message: String,
        /// Type of resource exhausted
        resource_type: String,
    },

    /// Repository-fatal integrity failures: duplicate submission, checksum mismatch
    #[error("Integrity error: {message}")]
    Integrity {
        /// Error description
        message: String,
    },

    /// Cooperative cancellation observed at a suspension point
    #[error("Operation cancelled: {reason}")]
    Cancelled {
        /// Why the task was cancelled (user request, timeout)
        reason: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
    },

    /// Unsupported operation or input
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Error description
        message: String,
    },
}

impl KvasirError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new validation error with field context
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new parse error
    pub fn parse(language: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            language: language.into(),
            message: message.into(),
            file_path: None,
            line: None,
        }
    }

    /// Create a new parse error with file context
    pub fn parse_in_file(
        language: impl Into<String>,
        message: impl Into<String>,
        file_path: impl Into<String>,
        line: Option<usize>,
    ) -> Self {
        Self::Parse {
            language: language.into(),
            message: message.into(),
            file_path: Some(file_path.into()),
            line,
        }
    }

    /// Create a new graph analysis error
    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
            element: None,
        }
    }

    /// Create a new database error
    pub fn database(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
            source: None,
        }
    }

    /// Create a new pipeline error
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a new retryable provider error
    pub fn provider_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a new non-retryable provider error
    pub fn provider_fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a new resource exhaustion error
    pub fn resource(message: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::ResourceExhaustion {
            message: message.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Create a new integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a new cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Whether the scheduler should retry the failed task.
    ///
    /// Transient kinds per the error taxonomy: provider 5xx/timeouts,
    /// database connection drops, rate-limit throttling, plain I/O.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Database { .. } | Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Whether the error invalidates only a single file, not the phase.
    pub fn is_file_local(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::ResourceExhaustion { .. } | Self::Unsupported { .. }
        )
    }
}

impl From<io::Error> for KvasirError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for KvasirError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<sqlx::Error> for KvasirError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: format!("Database operation failed: {err}"),
            operation: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for KvasirError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect();
        Self::Provider {
            provider: "http".to_string(),
            message: err.to_string(),
            retryable,
        }
    }
}

impl From<git2::Error> for KvasirError {
    fn from(err: git2::Error) -> Self {
        Self::Validation {
            message: format!("Git operation failed: {}", err.message()),
            field: Some("origin_url".to_string()),
        }
    }
}

impl From<zip::result::ZipError> for KvasirError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Validation {
            message: format!("Archive error: {err}"),
            field: Some("archive".to_string()),
        }
    }
}

/// Result extension trait for adding stage context to errors
pub trait ResultExt<T> {
    /// Wrap an error into a pipeline error for the named stage
    fn stage(self, stage: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<KvasirError>,
{
    fn stage(self, stage: &'static str) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            match inner {
                // Cancellation and transient errors keep their identity so
                // the scheduler can classify them.
                KvasirError::Cancelled { .. } => inner,
                other if other.is_transient() => other,
                other => KvasirError::pipeline(stage, other.to_string()),
            }
        })
    }
}
