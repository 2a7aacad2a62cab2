//! Structured errors exchanged between client and server.
//!
//! Every reply on the wire is trailed by an [`Error`] value. An error whose code is
//! [`ErrorCode::None`] means success and is never surfaced as a failure; see
//! [`Error::into_result`].
//!
//! Transport and protocol failures that happen on the client side are expressed with
//! the same type, using the codes at and above [`ErrorCode::Unknown`].
use std::fmt;

use thiserror::Error;

const CODE_NONE: i32 = 0x0;
const CODE_INVALID_ARGUMENT: i32 = 0x1;
const CODE_NOT_SUPPORTED: i32 = 0x2;
const CODE_PARSING_FAILED: i32 = 0x3;
const CODE_PERMISSION_DENIED: i32 = 0x4;
const CODE_UNKNOWN: i32 = 0x1000;
const CODE_IO: i32 = 0x1001;
const CODE_TIMEOUT: i32 = 0x1002;
const CODE_PROTOCOL_MISMATCH: i32 = 0x1003;
const CODE_NOT_CONNECTED: i32 = 0x1004;

/// Error codes shared by both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None,
    InvalidArgument,
    NotSupported,
    ParsingFailed,
    PermissionDenied,
    Unknown,
    /// Reading or writing the socket failed.
    Io,
    /// The peer did not answer within the configured timeout.
    Timeout,
    /// The peer refused our protocol version.
    ProtocolMismatch,
    /// No live connection is available for the call.
    NotConnected,
    /// A code defined by the storage backend, carried verbatim.
    Backend(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_NONE => ErrorCode::None,
            CODE_INVALID_ARGUMENT => ErrorCode::InvalidArgument,
            CODE_NOT_SUPPORTED => ErrorCode::NotSupported,
            CODE_PARSING_FAILED => ErrorCode::ParsingFailed,
            CODE_PERMISSION_DENIED => ErrorCode::PermissionDenied,
            CODE_UNKNOWN => ErrorCode::Unknown,
            CODE_IO => ErrorCode::Io,
            CODE_TIMEOUT => ErrorCode::Timeout,
            CODE_PROTOCOL_MISMATCH => ErrorCode::ProtocolMismatch,
            CODE_NOT_CONNECTED => ErrorCode::NotConnected,
            other => ErrorCode::Backend(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ErrorCode::None => CODE_NONE,
            ErrorCode::InvalidArgument => CODE_INVALID_ARGUMENT,
            ErrorCode::NotSupported => CODE_NOT_SUPPORTED,
            ErrorCode::ParsingFailed => CODE_PARSING_FAILED,
            ErrorCode::PermissionDenied => CODE_PERMISSION_DENIED,
            ErrorCode::Unknown => CODE_UNKNOWN,
            ErrorCode::Io => CODE_IO,
            ErrorCode::Timeout => CODE_TIMEOUT,
            ErrorCode::ProtocolMismatch => CODE_PROTOCOL_MISMATCH,
            ErrorCode::NotConnected => CODE_NOT_CONNECTED,
            ErrorCode::Backend(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::None => write!(f, "no error"),
            ErrorCode::InvalidArgument => write!(f, "invalid argument"),
            ErrorCode::NotSupported => write!(f, "not supported"),
            ErrorCode::ParsingFailed => write!(f, "parsing failed"),
            ErrorCode::PermissionDenied => write!(f, "permission denied"),
            ErrorCode::Unknown => write!(f, "unknown error"),
            ErrorCode::Io => write!(f, "i/o error"),
            ErrorCode::Timeout => write!(f, "timed out"),
            ErrorCode::ProtocolMismatch => write!(f, "protocol mismatch"),
            ErrorCode::NotConnected => write!(f, "not connected"),
            ErrorCode::Backend(code) => write!(f, "backend error {code:#x}"),
        }
    }
}

/// Source position attached to errors raised by a parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locator {
    pub line: i32,
    pub column: i32,
    pub byte: i32,
    pub filename: String,
}

impl Locator {
    pub fn new(line: i32, column: i32, byte: i32, filename: impl Into<String>) -> Self {
        Self {
            line,
            column,
            byte,
            filename: filename.into(),
        }
    }
}

/// An error reported by the peer or raised locally by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct Error {
    code: ErrorCode,
    message: String,
    locator: Option<Locator>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            locator: None,
        }
    }

    /// The "success" value that trails every successful reply.
    pub fn none() -> Self {
        Self::new(ErrorCode::None, String::new())
    }

    pub fn parsing(message: impl Into<String>, locator: Locator) -> Self {
        Self {
            code: ErrorCode::ParsingFailed,
            message: message.into(),
            locator: Some(locator),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, message)
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorCode::NotConnected, "not connected to server")
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "command timed out")
    }

    /// Rebuilds an error from its wire parts.
    pub(crate) fn from_parts(code: i32, message: String, locator: Option<Locator>) -> Self {
        Self {
            code: ErrorCode::from_code(code),
            message,
            locator,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn locator(&self) -> Option<&Locator> {
        self.locator.as_ref()
    }

    pub fn is_none(&self) -> bool {
        self.code == ErrorCode::None
    }

    /// `Ok(())` for [`ErrorCode::None`], `Err(self)` for anything else.
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_none() { Ok(()) } else { Err(self) }
    }
}

impl Default for Error {
    fn default() -> Self {
        Self::none()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
