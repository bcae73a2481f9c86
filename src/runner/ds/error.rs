use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::engine::RawValue;
use crate::runner::ds::handle::Owned;

/// Script-visible error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    Error,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
}

lazy_static! {
    static ref ERROR_TYPES_BY_NAME: HashMap<&'static str, ErrorType> = {
        let mut m = HashMap::new();
        for t in ErrorType::ALL.iter() {
            m.insert(t.name(), *t);
        }
        m
    };
}

impl ErrorType {
    pub const ALL: [ErrorType; 6] = [
        ErrorType::Error,
        ErrorType::RangeError,
        ErrorType::ReferenceError,
        ErrorType::SyntaxError,
        ErrorType::TypeError,
        ErrorType::UriError,
    ];

    /// Constructor name, as found on the global object.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorType::Error => "Error",
            ErrorType::RangeError => "RangeError",
            ErrorType::ReferenceError => "ReferenceError",
            ErrorType::SyntaxError => "SyntaxError",
            ErrorType::TypeError => "TypeError",
            ErrorType::UriError => "URIError",
        }
    }

    pub fn from_name(name: &str) -> Option<ErrorType> {
        ERROR_TYPES_BY_NAME.get(name).copied()
    }
}

/// Why an [`Exception`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidStackIndex,
    TypeMismatch,
    Arity,
    ConstructorRequired,
    Compile,
    /// Thrown by script and not caught there.
    Script,
    ModuleResolution,
    /// Raised explicitly by native code.
    Host,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidStackIndex => "invalid-stack-index",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::Arity => "arity",
            ErrorKind::ConstructorRequired => "constructor-required",
            ErrorKind::Compile => "compile",
            ErrorKind::Script => "script",
            ErrorKind::ModuleResolution => "module-resolution",
            ErrorKind::Host => "host",
        };
        write!(f, "{}", s)
    }
}

/// A thrown engine value travelling back to the host.
///
/// The value is held strongly, so it stays alive for as long as the exception
/// does, and `message` is a snapshot of its string form taken when it was
/// raised.
#[derive(Clone, Error)]
#[error("{message}")]
pub struct Exception {
    value: Owned,
    kind: ErrorKind,
    message: String,
}

impl Exception {
    pub(crate) fn new(value: Owned, kind: ErrorKind, message: String) -> Self {
        Exception {
            value,
            kind,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn raw(&self) -> RawValue {
        self.value.raw()
    }

    pub fn value(&self) -> &Owned {
        &self.value
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("kind", &self.kind)
            .field("value", &self.value.raw())
            .field("message", &self.message)
            .finish()
    }
}

pub type JsResult<T> = Result<T, Exception>;

/// Stack addressing failures, before they are turned into script errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StackError {
    #[error("invalid stack index '{index}'")]
    InvalidIndex { index: i64 },
    #[error("cannot pop {count} values, only {top} on the stack")]
    Underflow { count: usize, top: usize },
}
