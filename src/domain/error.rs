use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("field `{field}` is not declared by entity `{entity}`")]
    UnknownField { entity: &'static str, field: String },
    #[error("field `{field}` expects {expected}, got `{value}`")]
    InvalidValue {
        field: String,
        expected: &'static str,
        value: String,
    },
    #[error("domain invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn unknown_field(entity: &'static str, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity,
            field: field.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        expected: &'static str,
        value: impl ToString,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            expected,
            value: value.to_string(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
