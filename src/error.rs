use std::fmt;

use thiserror::Error;

/// The closed set of runtime and compile-time failure classes.
///
/// Every fatal condition in the VM maps to exactly one kind; the REPL
/// boundary downcasts to [`VmError`] to print `Kind: message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StackUnderflow,
    StackOverflow,
    Encoding,
    MemoryFault,
    Type,
    BroadcastTypeMismatch,
    UndefinedWord,
    Syntax,
    HeapExhausted,
    AssignmentShape,
    Dispatch,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::StackUnderflow => "StackUnderflow",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::Encoding => "EncodingError",
            ErrorKind::MemoryFault => "MemoryFault",
            ErrorKind::Type => "TypeError",
            ErrorKind::BroadcastTypeMismatch => "BroadcastTypeMismatch",
            ErrorKind::UndefinedWord => "UndefinedWord",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::HeapExhausted => "HeapExhausted",
            ErrorKind::AssignmentShape => "AssignmentShapeError",
            ErrorKind::Dispatch => "DispatchError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct VmError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError {
            kind,
            message: message.into(),
        }
    }
}

pub fn vm_err(kind: ErrorKind, message: impl Into<String>) -> anyhow::Error {
    VmError::new(kind, message).into()
}

/// Bail out of the current operation with a [`VmError`].
#[macro_export]
macro_rules! vm_bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err($crate::error::vm_err(
            $crate::error::ErrorKind::$kind,
            format!($($arg)*),
        ))
    };
}

/// `ensure!`-style check that fails with a [`VmError`] of the given kind.
#[macro_export]
macro_rules! vm_ensure {
    ($cond:expr, $kind:ident, $($arg:tt)*) => {
        if !$cond {
            $crate::vm_bail!($kind, $($arg)*);
        }
    };
}
