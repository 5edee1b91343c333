use std::fmt;

use thiserror::Error;
use vtrend_adapters::ProviderError;
use vtrend_storage::StorageError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("metrics provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("validation: {0}")]
    Validation(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("initialization: {0}")]
    Initialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Provider,
    Validation,
    NotFound,
    Storage,
    Initialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Storage => "storage",
            Self::Initialization => "initialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(_) => ErrorKind::Provider,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(err) if err.is_not_found() => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Initialization(_) => ErrorKind::Initialization,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
