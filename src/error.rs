//! Error types for the on3demand governor and daemon.
//!
//! This module defines custom error enums for each component,
//! providing descriptive error messages with context information.

use thiserror::Error;

/// Errors surfaced by the governor, the framework and the attribute surface.
#[derive(Error, Debug)]
pub enum GovernorError {
    #[error("Failed to register '{name}': {reason}")]
    RegistrationFailure { name: String, reason: String },

    #[error("Invalid input for '{attribute}': {value:?}")]
    InvalidInput { attribute: String, value: String },

    #[error("Unknown attribute '{group}/{attribute}'")]
    UnknownAttribute { group: String, attribute: String },

    #[error("Unknown governor '{0}'")]
    UnknownGovernor(String),
}

impl GovernorError {
    pub fn registration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RegistrationFailure {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_attribute(group: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            group: group.into(),
            attribute: attribute.into(),
        }
    }
}

/// Errors related to the frequency-request backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend file '{path}' is unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value {value:?} read from '{path}'")]
    InvalidValue { path: String, value: String },

    #[error("Failed to write frequency request to '{path}': {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors related to IPC server operations.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind socket at '{path}': {source}")]
    SocketBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize response: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Top-level daemon errors.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Governor error: {0}")]
    Governor(#[from] GovernorError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
