//! Crate error type

use thiserror::Error;

/// Errors raised by the loader, the model layer and the fixtures
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported engine: {0}.")]
    UnsupportedEngine(String),

    #[error("connection already opened")]
    AlreadyOpen,

    #[error("database connection is closed")]
    Closed,

    #[error("model {0} is not bound to a database")]
    Unbound(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
