use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request,
    },
    http::request::Parts,
    Json,
};
use tracing::debug;

use crate::error::{AppError, FieldErrors};

/// Request fields a body or query string can carry; used to attribute
/// deserialization failures to a field.
const KNOWN_FIELDS: [&str; 8] = [
    "password_confirmation",
    "current_password",
    "password",
    "email",
    "name",
    "page",
    "limit",
    "q",
];

fn field_in(detail: &str) -> Option<&'static str> {
    KNOWN_FIELDS
        .into_iter()
        .find(|f| detail.contains(&format!(" {f}: ")))
}

/// `Json` whose rejections render through `AppError`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(rejection.into()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let detail = rejection.body_text();
        debug!(%status, %detail, "json body rejected");
        match rejection {
            JsonRejection::JsonDataError(_) => {
                let field = field_in(&detail).unwrap_or("body");
                AppError::Validation(FieldErrors::single(
                    field,
                    format!("The {field} field has an invalid type."),
                ))
            }
            JsonRejection::JsonSyntaxError(_) => AppError::BadRequest {
                status,
                message: "The request body is not valid JSON.".into(),
            },
            JsonRejection::MissingJsonContentType(_) => AppError::BadRequest {
                status,
                message: "The request body must be sent as application/json.".into(),
            },
            _ => AppError::BadRequest {
                status,
                message: "The request body could not be read.".into(),
            },
        }
    }
}

/// `Query` whose rejections render through `AppError`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(AppQuery(value)),
            Err(rejection) => Err(rejection.into()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        let detail = rejection.body_text();
        debug!(%detail, "query string rejected");
        let field = field_in(&detail).unwrap_or("query");
        AppError::Validation(FieldErrors::single(
            field,
            format!("The {field} parameter is invalid."),
        ))
    }
}
