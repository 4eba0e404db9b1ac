//! Error marshaling across the process boundary.
//!
//! Failures never cross the boundary as Rust values. A failed method is
//! projected onto a string-only [`SerializedError`] and rebuilt on the other
//! side as a [`RemoteError`]. The projection is lossy: only the message, a
//! kind tag and the stack text survive.

use crate::error::WtforkError;
use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

/// Transmissible projection of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub stack: String,
}

/// Error kinds recognized on receipt. Anything else becomes [`ErrorKind::Generic`].
///
/// Tags follow the names used by the JavaScript peers of this protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generic,
    Type,
    Range,
    Reference,
    Syntax,
    Eval,
    Uri,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Generic,
        ErrorKind::Type,
        ErrorKind::Range,
        ErrorKind::Reference,
        ErrorKind::Syntax,
        ErrorKind::Eval,
        ErrorKind::Uri,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::Generic => "Error",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Eval => "EvalError",
            ErrorKind::Uri => "URIError",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Best-effort error object, both what remote methods fail with and what
/// the caller receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    pub stack: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let stack = capture_stack(kind.tag(), &message);
        Self {
            kind,
            message,
            stack,
        }
    }

    /// Generic error with the given message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message)
    }

    /// Wrap any error. The kind is generic; the message is its display text.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::msg(err.to_string())
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<WtforkError> for RemoteError {
    fn from(err: WtforkError) -> Self {
        match err {
            WtforkError::Remote(remote) => remote,
            WtforkError::InvalidArgument(_) | WtforkError::Json(_) => {
                RemoteError::new(ErrorKind::Type, err.to_string())
            }
            other => RemoteError::msg(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::new(ErrorKind::Type, err.to_string())
    }
}

/// Project an error onto its transmissible form.
pub fn serialize(err: &RemoteError) -> SerializedError {
    SerializedError {
        message: err.message.clone(),
        error_type: err.kind.tag().to_string(),
        stack: err.stack.clone(),
    }
}

/// Rebuild an error from its transmissible form.
///
/// Unrecognized type tags fall back to a generic error. The stack text from
/// the wire replaces the local one.
pub fn deserialize(obj: &SerializedError) -> RemoteError {
    let kind = ErrorKind::from_tag(&obj.error_type).unwrap_or(ErrorKind::Generic);
    RemoteError {
        kind,
        message: obj.message.clone(),
        stack: obj.stack.clone(),
    }
}

fn capture_stack(tag: &str, message: &str) -> String {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => format!("{}: {}\n{}", tag, message, backtrace),
        _ => format!("{}: {}", tag, message),
    }
}
