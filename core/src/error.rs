use serde::{Deserialize, Serialize};

/// The closed category set a request-handler response reports:
/// `{ok:false, error:{category, message}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Integrity,
    External,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::External => "external",
            ErrorCategory::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Implemented by every error type in the workspace so the sdk boundary can
/// map a failure to its response category without a per-call match statement.
pub trait CoreError: std::error::Error {
    fn category(&self) -> ErrorCategory;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub category: ErrorCategory,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &dyn CoreError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}
