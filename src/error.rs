use std::fmt;

use crate::store::StoreError;

/// Crate-wide error classification.
///
/// `Io` covers transport failures (`EAGAIN`/`EWOULDBLOCK` is handled at the
/// call site and never surfaces here). `Protocol` covers framing and parse
/// failures, `Auth` credential and session violations, `Storage` backend
/// failures, and `ResourceExhausted` pool or fd-cap pressure.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Protocol(&'static str),
    Auth(&'static str),
    Storage(StoreError),
    ResourceExhausted(&'static str),
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Auth(msg) => write!(f, "auth error: {msg}"),
            Error::Storage(err) => write!(f, "storage error: {err}"),
            Error::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Error::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        Error::Storage(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
