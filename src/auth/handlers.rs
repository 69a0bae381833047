use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::instrument;

use crate::{
    account::services::{AccountService, Registration},
    auth::{
        dto::{AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, RegisterRequest},
        extractors::AuthUser,
    },
    error::AppError,
    extract::AppJson,
    state::AppState,
    users::dto::UserResource,
};

const TOKEN_TYPE: &str = "Bearer";

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
}

pub fn session_routes() -> Router<AppState> {
    Router::new().route("/logout", post(logout))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let accounts = AccountService::from_ref(&state);
    let (user, access_token) = accounts
        .register(Registration {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            password_confirmation: payload.password_confirmation,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "Registration successful.",
            user: UserResource::present(&user, &state.avatars),
            access_token,
            token_type: TOKEN_TYPE,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let accounts = AccountService::from_ref(&state);
    let (user, access_token) = accounts
        .login(payload.email.as_deref(), payload.password.as_deref())
        .await?;

    Ok(Json(AuthResponse {
        message: "Login successful.",
        user: UserResource::present(&user, &state.avatars),
        access_token,
        token_type: TOKEN_TYPE,
    }))
}

#[instrument(skip(accounts, auth), fields(user_id = %auth.user.id))]
pub async fn logout(
    State(accounts): State<AccountService>,
    auth: AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    accounts.logout(&auth.token).await?;
    Ok(Json(MessageResponse {
        message: "Logout successful.",
    }))
}

#[instrument(skip(accounts, payload))]
pub async fn forgot_password(
    State(accounts): State<AccountService>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = accounts.forgot_password(payload.email.as_deref()).await?;
    Ok(Json(MessageResponse { message }))
}
