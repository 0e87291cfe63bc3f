use std::fmt::Display;

use serde::{de, ser};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("unexpected end of input")]
    Eof,
    #[error("trailing bytes after value")]
    TrailingBytes,
    #[error("invalid integer literal")]
    InvalidInteger,
    #[error("invalid string length")]
    InvalidLength,
    #[error("expected value, found `{0}`")]
    InvalidPrefix(char),
    #[error("dictionary keys not in ascending order")]
    UnsortedKeys,
    #[error("duplicate dictionary key")]
    DuplicateKey,
    #[error("dictionary key is not a byte string")]
    NonStringKey,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        Error::MissingField(field)
    }

    fn invalid_type(unexp: de::Unexpected, exp: &dyn de::Expected) -> Self {
        Error::TypeMismatch {
            expected: exp.to_string(),
            found: unexp.to_string(),
        }
    }
}
