//! Registry error types

use std::fmt;

use crate::diagnostics::DiagnosticKind;

/// Boxed error carried as the source of initialization failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by registry and lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Service not registered: {key}")]
    NotFound { key: String },

    #[error("Service already registered: {key}")]
    DuplicateRegistration { key: String },

    #[error("Validation failed for {subject}: {message}")]
    ValidationError { subject: String, message: String },

    #[error("Circular dependency detected for {service}: {chain}")]
    CircularDependency { service: String, chain: String },

    #[error("Async access violation for {service} ({context}): {message}")]
    AsyncAccessViolation {
        service: String,
        context: String,
        message: String,
    },

    #[error("Failed to initialize {service}: {source}")]
    InitializationError {
        service: String,
        #[source]
        source: BoxError,
    },

    #[error("Instance {instance} of {service} is no longer valid")]
    InstanceInvalid { service: String, instance: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

// Flattened to text so the error stays independent of the config crate's types
impl From<config::ConfigError> for RegistryError {
    fn from(error: config::ConfigError) -> Self {
        RegistryError::Config(error.to_string())
    }
}

impl RegistryError {
    pub fn validation(subject: impl fmt::Display, message: impl Into<String>) -> Self {
        RegistryError::ValidationError {
            subject: subject.to_string(),
            message: message.into(),
        }
    }

    pub fn initialization(service: impl fmt::Display, source: anyhow::Error) -> Self {
        RegistryError::InitializationError {
            service: service.to_string(),
            source: source.into(),
        }
    }

    /// Diagnostic category reported alongside this error
    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            RegistryError::NotFound { .. } => DiagnosticKind::InstanceNotFound,
            RegistryError::DuplicateRegistration { .. } => DiagnosticKind::DuplicateRegistration,
            RegistryError::ValidationError { .. } | RegistryError::Config(_) => {
                DiagnosticKind::ValidationError
            }
            RegistryError::CircularDependency { .. } => DiagnosticKind::CircularDependency,
            RegistryError::AsyncAccessViolation { .. } => DiagnosticKind::AsyncDependencyViolation,
            RegistryError::InitializationError { .. } => DiagnosticKind::InitializationError,
            RegistryError::InstanceInvalid { .. } => DiagnosticKind::InstanceInvalid,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
