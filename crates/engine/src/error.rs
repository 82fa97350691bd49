//! The module contains the errors the engine can throw.
//!
//! [`Validation`] wraps a habit rule violation and is always recoverable:
//! the caller surfaces it as a rejected write. The other variants are
//! lookup and storage failures.
//!
//! [`Validation`]: EngineError::Validation
use sea_orm::DbErr;
use thiserror::Error;

use crate::validator::ValidationError;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("\"{0}\" not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("invalid stored time: {0}")]
    InvalidTime(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidTime(a), Self::InvalidTime(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
