use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown model: {name}")]
    UnknownModel { name: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Unauthorized: {reason}")]
    Authorization { reason: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("Stream pulled while a previous pull is still pending")]
    PullInProgress,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    pub fn authorization(reason: impl Into<String>) -> Self {
        Error::Authorization {
            reason: reason.into(),
        }
    }

    pub fn provider(message: impl Display) -> Self {
        Error::Provider {
            message: message.to_string(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol {
            reason: reason.into(),
        }
    }

    /// Protocol violations propagate exactly like upstream failures.
    pub fn is_provider(&self) -> bool {
        matches!(self, Error::Provider { .. } | Error::Protocol { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::UnknownModel { .. } | Error::Configuration { .. })
    }

    /// The `type` reported in OpenAI-style error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownModel { .. } | Error::Configuration { .. } => "invalid_request_error",
            Error::Authorization { .. } => "authentication_error",
            Error::Provider { .. } | Error::Protocol { .. } => "upstream_error",
            Error::PullInProgress => "internal_error",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::provider(e)
    }
}
