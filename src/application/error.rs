use thiserror::Error;

use crate::{application::render::RenderError, config::LoadError, infra::error::InfraError};

/// Errors surfaced to the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status: 2 for bad input or configuration, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_)
            | AppError::Validation(_)
            | AppError::Render(RenderError::MissingContent)
            | AppError::Render(RenderError::Io { .. })
            | AppError::Render(RenderError::Template { .. }) => 2,
            AppError::Infra(_)
            | AppError::Render(_)
            | AppError::Unexpected(_) => 1,
        }
    }
}
