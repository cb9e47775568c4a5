//! Unified error type for framepress.
//!
//! All crates funnel their failures into [`Error`]. Non-fatal variants
//! (thumbnail, audio) are normally absorbed by the engine and only surface
//! in logs; fatal variants abort the current orchestrator tier.

use std::time::Duration;

/// Unified error type covering all failure modes in framepress.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every recorder construction strategy was rejected by the runtime.
    #[error("Recorder unavailable after {attempts} attempts: {last_error}")]
    RecorderUnavailable {
        /// Number of construction attempts made.
        attempts: usize,
        /// Message from the last rejected attempt.
        last_error: String,
    },

    /// Thumbnail metadata load, seek, or rasterization failed.
    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    /// The source audio could not be joined to the capture stream.
    #[error("Audio attach failed: {0}")]
    AudioAttach(String),

    /// The recorder failed mid-stream and the recovery pass failed too.
    #[error("Compression failed: {message}: {source}")]
    CompressionFailed {
        /// What the recovery pass ran into.
        message: String,
        /// The original mid-stream error.
        #[source]
        source: Box<Error>,
    },

    /// The native, best-available and last-resort passes all failed.
    #[error("All compression strategies exhausted: {}", failures.join("; "))]
    AllStrategiesExhausted {
        /// One message per failed pass, in the order they ran.
        failures: Vec<String>,
    },

    /// A recorder rejected a frame or failed to finalize its output.
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Source metadata or frame decoding failed.
    #[error("Media error: {0}")]
    Media(String),

    /// A bounded wait expired.
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// The bound that expired.
        after: Duration,
    },

    /// The caller cancelled the job.
    #[error("Cancelled")]
    Cancelled,

    /// Request or configuration data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborts a compression tier.
    ///
    /// Thumbnail and audio failures only degrade the result.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Thumbnail(_) | Error::AudioAttach(_))
    }

    /// Process exit status the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) => 2,
            Error::Cancelled => 130,
            Error::Io { .. } => 74,
            Error::Tool { .. } | Error::Probe(_) => 69,
            Error::AllStrategiesExhausted { .. } => 3,
            Error::RecorderUnavailable { .. }
            | Error::CompressionFailed { .. }
            | Error::Recorder(_)
            | Error::Media(_)
            | Error::Timeout { .. } => 4,
            Error::Thumbnail(_) | Error::AudioAttach(_) | Error::Internal(_) => 1,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Timeout`].
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Convenience constructor for [`Error::CompressionFailed`].
    pub fn compression_failed(message: impl Into<String>, original: Error) -> Self {
        Error::CompressionFailed {
            message: message.into(),
            source: Box::new(original),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
