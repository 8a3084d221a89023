//! Error types for twin-qa
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - A coarse taxonomy (validation, transport, stream, session) for callers
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for twin-qa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Transport errors (3xx)
    TransportFailed = 300,
    TransportTimeout = 301,
    HttpStatus = 302,
    PayloadMalformed = 303,
    SessionNotFound = 304,

    // Validation errors (4xx)
    ValidationFailed = 400,

    // Stream / session errors (5xx)
    StreamDisconnect = 500,
    SessionFailed = 501,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse error classes surfaced to callers of the session engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any network call
    Validation,
    /// Network failure, non-2xx response or malformed payload
    Transport,
    /// An established stream dropped
    StreamDisconnect,
    /// In-band failure or explicit cancellation of a session
    SessionFailed,
    /// Configuration problem
    Config,
    /// Anything else
    Internal,
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────

    /// Request rejected before reaching the network
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────

    /// Network-level failure
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Request timed out
    #[error("Request to {url} timed out")]
    TransportTimeout { url: String },

    /// Server answered with a non-2xx status
    #[error("Server returned {status} for {url}: {message}")]
    HttpStatus { url: String, status: u16, message: String },

    /// Response body could not be decoded
    #[error("Malformed payload: {message}")]
    Malformed { message: String },

    /// Server has no record of the session
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    // ─────────────────────────────────────────────────────────────
    // Stream / Session Errors
    // ─────────────────────────────────────────────────────────────

    /// Established stream dropped
    #[error("Stream for session {session_id} disconnected: {message}")]
    StreamDisconnect { session_id: String, message: String },

    /// Session failed in-band or was cancelled
    #[error("Session {session_id} failed: {message}")]
    SessionFailed { session_id: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::Validation { .. } => ErrorCode::ValidationFailed,

            Error::Transport { .. } => ErrorCode::TransportFailed,
            Error::TransportTimeout { .. } => ErrorCode::TransportTimeout,
            Error::HttpStatus { .. } => ErrorCode::HttpStatus,
            Error::Malformed { .. } => ErrorCode::PayloadMalformed,
            Error::SessionNotFound { .. } => ErrorCode::SessionNotFound,

            Error::StreamDisconnect { .. } => ErrorCode::StreamDisconnect,
            Error::SessionFailed { .. } => ErrorCode::SessionFailed,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Map onto the caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Transport { .. }
            | Error::TransportTimeout { .. }
            | Error::HttpStatus { .. }
            | Error::Malformed { .. }
            | Error::SessionNotFound { .. } => ErrorKind::Transport,
            Error::StreamDisconnect { .. } => ErrorKind::StreamDisconnect,
            Error::SessionFailed { .. } => ErrorKind::SessionFailed,
            Error::ConfigNotFound { .. }
            | Error::ConfigParse { .. }
            | Error::ConfigValidation { .. }
            | Error::Config(_)
            | Error::Toml(_) => ErrorKind::Config,
            Error::IoRead { .. } | Error::IoWrite { .. } | Error::Io(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. }
            | Error::TransportTimeout { .. }
            | Error::StreamDisconnect { .. } => true,
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if the error is fatal (process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'twin-qa config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'twin-qa config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::Validation { .. } => Some(
                "Provide a non-empty question and at least one prospect id."
            ),
            Error::Transport { .. } | Error::TransportTimeout { .. } => Some(
                "Check that the session service is running and 'api.base_url' is correct, or retry with --demo."
            ),
            Error::HttpStatus { .. } => Some(
                "The session service rejected the request. Retry, or check the server logs."
            ),
            Error::SessionNotFound { .. } => Some(
                "The session may have been deleted. Run 'twin-qa list' to see known sessions."
            ),
            Error::StreamDisconnect { .. } => Some(
                "The live stream dropped. It is re-established automatically."
            ),
            Error::SessionFailed { .. } => Some(
                "Answers collected before the failure are kept. Run 'twin-qa show' with the session id to see them."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a malformed payload error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::Malformed {
            message: message.into(),
        }
    }

    /// Create a stream disconnect error
    pub fn stream_disconnect(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::StreamDisconnect {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Create a session failed error
    pub fn session_failed(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SessionFailed {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Translate a reqwest error, keeping timeouts distinct
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::TransportTimeout { url: url.to_string() }
        } else if err.is_decode() {
            Error::malformed(err.to_string())
        } else {
            Error::transport(url, err.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
