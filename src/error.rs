use thiserror::Error;

/// Errors reported by the service interfaces.
///
/// Predicates and snippet adjustments never fail, only the parts that talk
/// to a service (or parse what a service sent back) produce these.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The service answered with a non-success status.
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never got an answer.
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid XML: {0}")]
    Xml(String),

    /// The service descriptor lacks a url.
    #[error("service for layer {0} has no url")]
    MissingUrl(String),

    #[error("unknown service type for layer {0}")]
    UnknownService(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FilterError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for FilterError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FilterError::http(status.as_u16(), e.to_string()),
            None => FilterError::Network(e.to_string()),
        }
    }
}

impl From<crate::xml::XmlParseError> for FilterError {
    fn from(e: crate::xml::XmlParseError) -> Self {
        FilterError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
