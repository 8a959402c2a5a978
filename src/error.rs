use axum::http::StatusCode;
use incident_core::events::NormalizeError;
use incident_core::signatures::SignatureError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("remote API returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("chat platform error: {0}")]
    Chat(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Decode(_) | RelayError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            RelayError::Signature(_) => StatusCode::UNAUTHORIZED,
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Remote { .. } | RelayError::Transport(_) | RelayError::Chat(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RelayError::NotFound(_))
    }
}

impl From<NormalizeError> for RelayError {
    fn from(error: NormalizeError) -> Self {
        match error {
            NormalizeError::Decode(message) => RelayError::Decode(message),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return RelayError::Decode(error.to_string());
        }
        RelayError::Transport(error.to_string())
    }
}
