//! # Error Types
//!
//! Error handling for every layer of the driver.
//!
//! This module defines all error variants that can occur while talking to the
//! server, from socket failures up to server-reported command failures.
//!
//! ## Error Categories
//! - **Transport**: connect, TLS, timeouts, closed handles, raw I/O
//! - **Encoding**: malformed or oversized documents on encode/decode
//! - **Authentication**: SCRAM conversation failures
//! - **Command**: the server answered `ok: 0` or reported write errors
//! - **Access**: typed accessors hitting the wrong [`Value`](crate::core::document::Value) variant
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use docwire::error::{DriverError, TransportErrorKind};
//!
//! fn classify(err: &DriverError) -> &'static str {
//!     match err.transport_kind() {
//!         Some(TransportErrorKind::Timeout) => "retry later",
//!         Some(_) => "reconnect",
//!         None if err.is_command_error() => "server said no",
//!         None => "caller bug",
//!     }
//! }
//!
//! let err = DriverError::transport(TransportErrorKind::Timeout, "read timed out");
//! assert_eq!(classify(&err), "retry later");
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

use crate::core::document::Document;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Transport errors
    pub const ERR_HANDLE_CLOSED: &str = "Connection handle is closed";
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed by server";
    pub const ERR_CONNECT_TIMEOUT: &str = "Connection attempt timed out";
    pub const ERR_TIMEOUT: &str = "Operation timed out";
    pub const ERR_POOL_TIMEOUT: &str = "Timed out waiting for a pooled connection";
    pub const ERR_POOL_CLOSED: &str = "Connection pool is closed";

    /// Framing errors
    pub const ERR_INVALID_HEADER: &str = "Invalid message header";
    pub const ERR_OVERSIZED_MESSAGE: &str = "Message exceeds maximum size";

    /// Reply errors
    pub const ERR_MISSING_OK: &str = "Reply is missing the 'ok' field";
    pub const ERR_EMPTY_REPLY: &str = "Reply contains no documents";

    /// Authentication errors
    pub const ERR_NONCE_MISMATCH: &str = "Server nonce does not extend client nonce";
    pub const ERR_LOW_ITERATIONS: &str = "Iteration count below minimum of 4096";
    pub const ERR_SERVER_SIGNATURE: &str = "Server signature does not match";
    pub const ERR_AUTH_STATE: &str = "Authentication conversation is in the wrong state";
}

/// Classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// TCP connect was refused or unreachable
    ConnectFailed,
    /// TLS handshake failed
    TlsFailed,
    /// An operation exceeded its deadline
    Timeout,
    /// The handle was invalidated by an earlier failure or explicit close
    HandleClosed,
    /// Any other I/O failure on the stream
    IoError,
    /// The reply did not correlate with the request that was sent
    UnexpectedResponse,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::ConnectFailed => "ConnectFailed",
            TransportErrorKind::TlsFailed => "TLSFailed",
            TransportErrorKind::Timeout => "Timeout",
            TransportErrorKind::HandleClosed => "HandleClosed",
            TransportErrorKind::IoError => "IOError",
            TransportErrorKind::UnexpectedResponse => "UnexpectedResponse",
        };
        f.write_str(name)
    }
}

/// Classification of document encoding/decoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingErrorKind {
    /// Input ended before the declared structure did
    TruncatedInput,
    /// An element carried a type tag outside the known set
    UnknownTypeTag,
    /// Declared length disagrees with the bytes actually present
    LengthMismatch,
    /// A string payload was not valid UTF-8
    InvalidUtf8,
    /// A payload held a value the format forbids
    InvalidValue,
    /// The encoded document exceeds the allowed size
    DocumentTooLarge,
}

impl fmt::Display for EncodingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncodingErrorKind::TruncatedInput => "TruncatedInput",
            EncodingErrorKind::UnknownTypeTag => "UnknownTypeTag",
            EncodingErrorKind::LengthMismatch => "LengthMismatch",
            EncodingErrorKind::InvalidUtf8 => "InvalidUtf8",
            EncodingErrorKind::InvalidValue => "InvalidValue",
            EncodingErrorKind::DocumentTooLarge => "DocumentTooLarge",
        };
        f.write_str(name)
    }
}

/// Classification of authentication failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// The server challenge could not be parsed or was unacceptable
    BadChallenge,
    /// The server signature did not match the expected value
    ProofMismatch,
    /// The server rejected the conversation
    ServerRejected,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthErrorKind::BadChallenge => "BadChallenge",
            AuthErrorKind::ProofMismatch => "ProofMismatch",
            AuthErrorKind::ServerRejected => "ServerRejected",
        };
        f.write_str(name)
    }
}

/// One failed document inside a multi-document write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the failing document in the caller's input
    pub index: usize,
    pub code: i32,
    pub message: String,
}

/// A command the server answered with `ok: 0`, or a write with per-document failures.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub code: i32,
    pub code_name: Option<String>,
    pub message: String,
    /// The reply document the error was built from
    pub raw: Document,
    /// Every per-document failure, for multi-document writes
    pub write_errors: Vec<WriteError>,
}

impl CommandError {
    /// Whether this error aggregates per-document write failures
    pub fn has_write_errors(&self) -> bool {
        !self.write_errors.is_empty()
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code_name {
            Some(name) => write!(f, "{} (code {} {})", self.message, self.code, name)?,
            None => write!(f, "{} (code {})", self.message, self.code)?,
        }
        for we in &self.write_errors {
            write!(f, "; [index {}] {} (code {})", we.index, we.message, we.code)?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandError {}

// DriverError is the error type for all public operations
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Encoding error ({kind}): {message}")]
    Encoding {
        kind: EncodingErrorKind,
        message: String,
    },

    #[error("Authentication error ({kind}): {message}")]
    Authentication { kind: AuthErrorKind, message: String },

    #[error("Command failed: {0}")]
    Command(CommandError),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TLS error: {0}")]
    TlsError(String),
}

impl DriverError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        DriverError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn encoding(kind: EncodingErrorKind, message: impl Into<String>) -> Self {
        DriverError::Encoding {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        DriverError::Authentication {
            kind,
            message: message.into(),
        }
    }

    /// Kind of the transport failure, if this is one
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            DriverError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Kind of the encoding failure, if this is one
    pub fn encoding_kind(&self) -> Option<EncodingErrorKind> {
        match self {
            DriverError::Encoding { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Kind of the authentication failure, if this is one
    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            DriverError::Authentication { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_command_error(&self) -> bool {
        matches!(self, DriverError::Command(_))
    }

    /// The command error, if the server rejected the operation
    pub fn as_command_error(&self) -> Option<&CommandError> {
        match self {
            DriverError::Command(err) => Some(err),
            _ => None,
        }
    }

    /// Whether a calling layer could reasonably retry on a fresh connection.
    ///
    /// The driver itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.transport_kind(),
            Some(
                TransportErrorKind::ConnectFailed
                    | TransportErrorKind::Timeout
                    | TransportErrorKind::HandleClosed
                    | TransportErrorKind::IoError
            )
        )
    }
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::IoError,
        };
        DriverError::transport(kind, err.to_string())
    }
}

impl From<CommandError> for DriverError {
    fn from(err: CommandError) -> Self {
        DriverError::Command(err)
    }
}

/// Type alias for Results using DriverError
pub type Result<T> = std::result::Result<T, DriverError>;
