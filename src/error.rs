use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Per-field validation messages, rendered as `{"field": ["message", ...]}`.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Vec<String>> {
        self.0.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    fn first_message(&self) -> Option<&str> {
        self.0.values().flatten().next().map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("the given data was invalid")]
    Validation(FieldErrors),
    #[error("the email has already been taken")]
    DuplicateEmail,
    #[error("the password does not satisfy the password policy")]
    PasswordPolicy(FieldErrors),
    #[error("invalid credentials")]
    InvalidCredentials { field: &'static str },
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("resource not found")]
    NotFound,
    #[error("invalid upload: {0}")]
    File(String),
    /// The request itself could not be read; keeps the status axum chose.
    #[error("bad request: {message}")]
    BadRequest { status: StatusCode, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::DuplicateEmail
            | AppError::PasswordPolicy(_)
            | AppError::File(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidCredentials { .. } | AppError::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest { status, .. } => *status,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Field-level detail for the response body, if any.
    pub fn field_errors(&self) -> Option<FieldErrors> {
        match self {
            AppError::Validation(errors) | AppError::PasswordPolicy(errors) => Some(errors.clone()),
            AppError::DuplicateEmail => Some(FieldErrors::single(
                "email",
                "The email has already been taken.",
            )),
            AppError::InvalidCredentials { field } => {
                let message = if *field == "current_password" {
                    "The current password is incorrect."
                } else {
                    "Invalid credentials."
                };
                Some(FieldErrors::single(*field, message))
            }
            AppError::File(message) => Some(FieldErrors::single("avatar", message.clone())),
            AppError::Unauthenticated
            | AppError::NotFound
            | AppError::BadRequest { .. }
            | AppError::Internal(_) => None,
        }
    }

    fn message(&self, errors: Option<&FieldErrors>) -> String {
        match self {
            AppError::InvalidCredentials { .. } => "Invalid credentials.".into(),
            AppError::Unauthenticated => "Unauthenticated.".into(),
            AppError::NotFound => "Resource not found.".into(),
            AppError::BadRequest { message, .. } => message.clone(),
            AppError::Internal(_) => "Server error.".into(),
            _ => errors
                .and_then(FieldErrors::first_message)
                .unwrap_or("The given data was invalid.")
                .to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(e) = &self {
            error!(error = %format!("{e:#}"), "internal error");
        }
        let errors = self.field_errors();
        let body = ErrorBody {
            message: self.message(errors.as_ref()),
            errors,
        };
        (self.status(), Json(body)).into_response()
    }
}
