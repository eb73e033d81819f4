pub use sgfa_core::*;

use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("jacket error: {0}")]
    JacketError(#[from] JacketError),

    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("lock error: {0}")]
    LockError(#[from] LockError),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn config(text: impl Display) -> Error {
        Error::ConfigError(text.to_string())
    }

    pub fn message(text: impl Into<String>) -> Error {
        Error::Message(text.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
