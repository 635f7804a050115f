//! Errors surfaced by single-item service operations

use thiserror::Error;

use crate::types::ConditionsError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Error code sent back in `ErrorResponse`
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found(what: &str, key: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} '{}' not found", what, key))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }
}

impl From<ConditionsError> for ServiceError {
    fn from(e: ConditionsError) -> Self {
        ServiceError::Validation(format!("Invalid conditions: {}", e))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        assert_eq!(ServiceError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(ServiceError::not_found("Rule", "r1").code(), "NOT_FOUND");
        assert_eq!(ServiceError::conflict("busy").code(), "CONFLICT");
        assert_eq!(ServiceError::from(anyhow::anyhow!("db down")).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn not_found_names_the_key() {
        assert_eq!(ServiceError::not_found("Rule", "Birthday").to_string(), "Rule 'Birthday' not found");
    }

    #[test]
    fn conditions_errors_are_validation_errors() {
        let err: ServiceError = ConditionsError::UnknownOperator("~".into()).into();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
