// error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no matching poll")]
    NotFound,

    #[error("poll is not open for submissions")]
    PollClosed,

    #[error("ballot contains no votes")]
    EmptyBallot,

    #[error("choice {choice_id} does not belong to question {question_id} of this poll")]
    InvalidChoice { question_id: i32, choice_id: i32 },

    #[error("an identical submission was already recorded")]
    AlreadySubmitted,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// Stable machine-readable code; clients key retry decisions off this,
    /// not the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::PollClosed => "poll_closed",
            AppError::EmptyBallot => "empty_ballot",
            AppError::InvalidChoice { .. } => "invalid_choice",
            AppError::AlreadySubmitted => "already_submitted",
            AppError::Database(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PollClosed | AppError::AlreadySubmitted => StatusCode::CONFLICT,
            AppError::EmptyBallot | AppError::InvalidChoice { .. } => StatusCode::BAD_REQUEST,
            AppError::Database(e) => {
                error!("database error: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            AppError::Database(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = json!({ "code": self.code(), "error": message });
        (status, Json(body)).into_response()
    }
}
