use std::fmt::{self, Display};

use crate::runtime::ObjectRef;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed class file: {0}")]
    MalformedClassFile(String),

    #[error("unresolved constant #{index}: {reason}")]
    UnresolvedConstant { index: u16, reason: String },

    #[error("cannot load class {class_name}: {reason}")]
    ClassLoad {
        class_name: String,
        reason: ClassLoadReason,
    },

    #[error("class {0} failed to initialize")]
    ClassInitialization(String),

    #[error("no such field: {class_name}.{field}")]
    NoSuchField { class_name: String, field: String },

    #[error("no such method: {class_name}.{method}")]
    NoSuchMethod { class_name: String, method: String },

    #[error("abstract method invoked: {class_name}.{method}")]
    AbstractMethod { class_name: String, method: String },

    #[error("native method is not bound: {class_name}.{method}")]
    UnsatisfiedLink { class_name: String, method: String },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("virtual machine error: {0}")]
    VirtualMachine(String),

    #[error(transparent)]
    Thrown(ThrownException),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassLoadReason {
    #[error("class not found")]
    NotFound,
    #[error("superclass {0} is missing")]
    MissingSuperclass(String),
    #[error("interface {0} is missing")]
    MissingInterface(String),
    #[error("cyclic inheritance")]
    CyclicInheritance,
    #[error("class file defines {0}")]
    WrongName(String),
    #[error("incompatible class change: {0}")]
    IncompatibleClassChange(String),
    #[error("i/o error: {0}")]
    Io(String),
}

/// A Java throwable that left the bottom frame of an invocation.
#[derive(Debug, Clone)]
pub struct ThrownException {
    pub class_name: String,
    pub message: Option<String>,
    pub object: ObjectRef,
}

impl Display for ThrownException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "uncaught {}: {}", self.class_name, message),
            None => write!(f, "uncaught {}", self.class_name),
        }
    }
}

impl std::error::Error for ThrownException {}

impl Error {
    pub(crate) fn vm(message: impl Into<String>) -> Self {
        Error::VirtualMachine(message.into())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedClassFile(message.into())
    }

    pub(crate) fn unresolved(index: u16, reason: impl Into<String>) -> Self {
        Error::UnresolvedConstant {
            index,
            reason: reason.into(),
        }
    }

    pub(crate) fn class_load(class_name: impl Into<String>, reason: ClassLoadReason) -> Self {
        Error::ClassLoad {
            class_name: class_name.into(),
            reason,
        }
    }

    /// The load reason, if this is a class loading failure.
    pub fn class_load_reason(&self) -> Option<&ClassLoadReason> {
        match self {
            Error::ClassLoad { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => Error::malformed("truncated class file"),
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::malformed(format!(
                "{:?} with {} bytes remaining",
                e.code,
                e.input.len()
            )),
        }
    }
}
