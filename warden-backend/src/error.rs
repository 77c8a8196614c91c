use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::sessions::SessionError;
use crate::validation::ValidationError;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Unauthorized,
  Validation(ValidationError),
  InvalidPlayerId(String),
  Session(SessionError),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Unauthorized => {
        tracing::warn!("rejected proxy request with missing or wrong key");
        (
          StatusCode::UNAUTHORIZED,
          Json(ErrorResponse::new("Invalid or missing proxy key")),
        )
          .into_response()
      }
      AppError::Validation(err) => {
        tracing::warn!(validation_error = %err, "Validation failed");
        (
          StatusCode::BAD_REQUEST,
          Json(ErrorResponse::with_details("Invalid request", err.to_string())),
        )
          .into_response()
      }
      AppError::InvalidPlayerId(raw) => {
        tracing::warn!(player_id = %raw, "Validation failed");
        (
          StatusCode::BAD_REQUEST,
          Json(ErrorResponse::with_details(
            "Invalid request",
            "player_id must be a UUID",
          )),
        )
          .into_response()
      }
      AppError::Session(err) => {
        tracing::warn!(error = %err, "Session update rejected");
        (
          StatusCode::BAD_REQUEST,
          Json(ErrorResponse::with_details("Invalid request", err.to_string())),
        )
          .into_response()
      }
    }
  }
}

impl From<ValidationError> for AppError {
  fn from(err: ValidationError) -> Self {
    AppError::Validation(err)
  }
}

impl From<SessionError> for AppError {
  fn from(err: SessionError) -> Self {
    AppError::Session(err)
  }
}
