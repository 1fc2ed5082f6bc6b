use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("AUTHORIZATION: {0}")]
    Authorization(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Text shown to the household member. Store and internal failures are
    /// collapsed into one generic message; the detail only goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::Authorization(message) | Self::NotFound(message) => {
                message.clone()
            }
            Self::Store(_) | Self::Internal(_) => {
                "Something went wrong talking to the record store. Please try again.".to_string()
            }
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
