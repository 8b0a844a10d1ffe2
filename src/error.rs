use std::fmt::Display;

/// Dynastore errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The requested key is absent from the table store.
    NotFound,
    /// Malformed row or attribute returned by the table store.
    Decode(String),
    /// A table store request failed.
    Table(String),
    /// An object store request failed.
    Blob(String),
    /// Invalid or missing configuration.
    Config(String),
    /// Table or bucket provisioning failed in an unrecoverable state.
    Init(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "data is not found with the given key"),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::Table(msg) => write!(f, "table store error: {msg}"),
            Error::Blob(msg) => write!(f, "blob store error: {msg}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Init(msg) => write!(f, "init error: {msg}"),
        }
    }
}

/// A dynastore Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Table(err.to_string())
    }
}
