use std::path::PathBuf;

/// Failure while reading a single report file.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The document ended while `element` was still open.
    #[error("document ended inside <{element}>")]
    UnexpectedEof { element: String },
}

/// Errors that stop an import run.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// A report could not be read or parsed. Aborts the remaining files.
    #[error("failed to parse report {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ReportError,
    },

    /// A record had no usable identifiers and fail-on-unmapped is enabled.
    #[error("unmapped test case {class_name}.{name} and fail-on-unmapped is enabled")]
    UnmappedIdentifier { class_name: String, name: String },

    /// Credentials missing or the token endpoint refused them. Never retried.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("input discovery failed: {message}")]
    Discovery { message: String },

    /// Cancellation was requested from outside the run.
    #[error("import cancelled")]
    Cancelled,
}

impl ImportError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse { .. } => 2,
            Self::UnmappedIdentifier { .. } => 2,

            Self::Authentication { .. } => 4,
            Self::Config { .. } => 4,
            Self::Discovery { .. } => 4,

            // A stop that was not caused by an error is treated as a graceful exit.
            Self::Cancelled => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
