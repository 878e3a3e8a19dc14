use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown source type `{value}`")]
    UnknownSourceType { value: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unknown_source_type(value: impl Into<String>) -> Self {
        Self::UnknownSourceType {
            value: value.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<vellum_api_types::UnknownSourceType> for DomainError {
    fn from(err: vellum_api_types::UnknownSourceType) -> Self {
        Self::unknown_source_type(err.0)
    }
}
