use thiserror::Error;

/// Errors raised while decoding or validating an order.
///
/// Both variants describe a defect in the payload itself, so retrying the
/// same bytes can never succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The payload is not a well-formed order document.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// A field is present but carries a value outside its domain.
    #[error("Invalid field {field}: {value}")]
    InvalidField { field: String, value: String },
}

impl ModelError {
    pub(crate) fn invalid(field: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidField {
            field: field.into(),
            value: value.to_string(),
        }
    }
}
