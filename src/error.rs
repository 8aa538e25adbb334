// Crate-level error types for configuration and credential handling.
// Component-specific errors (LLM transport, tool dispatch, patching,
// conflict coordination) live beside the component that raises them.

#![allow(dead_code)]

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RidgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("credential store error: {0}")]
    Credential(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RidgeError>;
