use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::{
    auth::tokens::TokenIssuer, error::AppError, state::AppState, users::repo::UserStore,
    users::repo_types::User,
};

/// The authenticated caller together with the token it presented.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolves a bearer token to its live user, or fails `Unauthenticated`.
pub async fn authenticate(
    tokens: &TokenIssuer,
    users: &dyn UserStore,
    token: &str,
) -> Result<User, AppError> {
    let Some(user_id) = tokens.resolve(token).await? else {
        warn!("invalid or revoked token");
        return Err(AppError::Unauthenticated);
    };
    match users.find_by_id(user_id).await? {
        Some(user) => Ok(user),
        None => {
            warn!(%user_id, "token owner no longer exists");
            Err(AppError::Unauthenticated)
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthenticated)?;
        let user = authenticate(&state.tokens, state.users.as_ref(), token).await?;
        Ok(AuthUser {
            user,
            token: token.to_string(),
        })
    }
}
