//! Error types for otter-e2e
//!
//! Two families live here. `RunnerError` rejects a whole run (nothing was
//! executed, or reports could not be written). `TestError` is captured into
//! the results tree and never rejects a run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent a run from producing results
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No source paths were given and none are configured
    #[error("No test source specified and no source folder defined. Check configuration.")]
    NoTestSource,

    /// Discovery finished without finding a single module
    #[error("No tests defined! using source folder: {path}")]
    EmptySource { path: String },

    /// A discovery root does not exist
    #[error("Test source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Two roots produced the same module key
    #[error("Duplicate test module \"{key}\"")]
    DuplicateModule { key: String },

    /// A module file could not be turned into a module
    #[error("Failed to load test module '{}': {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// Settings error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Report writing error
    #[error(transparent)]
    Report(#[from] ReportError),

    /// Results aggregation error
    #[error(transparent)]
    Results(#[from] ResultsError),

    /// Background task failure (discovery walk)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading or validating settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the report writers
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the results aggregator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResultsError {
    /// A module result can only be recorded once
    #[error("Results for module \"{0}\" were already recorded")]
    AlreadyRecorded(String),
}

/// Errors raised by a backend session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backend could not open a session
    #[error("Failed to start session: {0}")]
    Start(String),

    /// A command was rejected or failed on the backend
    #[error("Command \"{command}\" failed: {message}")]
    Command { command: String, message: String },

    /// The backend does not implement the command
    #[error("Command \"{0}\" is not supported by this backend")]
    Unsupported(String),

    /// The session was used after it was stopped
    #[error("Session is closed")]
    Closed,

    /// Shutting the session down failed
    #[error("Failed to stop session: {0}")]
    Stop(String),
}

/// Failure of a single testcase or hook
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TestError {
    /// An expectation was not met
    #[error("{0}")]
    Assertion(String),

    /// The test body returned an error
    #[error("{0}")]
    Runtime(String),

    /// The completion signal never arrived
    #[error(
        "done() callback timeout of {timeout_ms} ms was reached while executing \"{name}\". Make sure to call the done() callback when the operation finishes."
    )]
    Timeout { timeout_ms: u64, name: String },

    /// The test body, or a task it spawned, panicked
    #[error("{0}")]
    Panic(String),

    /// The backend session failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Unrecoverable for the module: remaining testcases are skipped
    #[error("{0}")]
    Fatal(String),
}

impl TestError {
    /// Create an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Create a runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Name written into the `type` attribute of a JUnit `<error>` element
    pub fn classification(&self) -> &'static str {
        match self {
            TestError::Assertion(_) => "AssertionError",
            TestError::Runtime(_) => "Error",
            TestError::Timeout { .. } => "TimeoutError",
            TestError::Panic(_) => "Panic",
            TestError::Session(_) => "SessionError",
            TestError::Fatal(_) => "FatalError",
        }
    }

    /// Assertion failures count as `failed`; everything else as `errored`
    pub fn is_assertion(&self) -> bool {
        matches!(self, TestError::Assertion(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TestError::Fatal(_))
    }
}

/// Extract a readable message from a caught panic.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
