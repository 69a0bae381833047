use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    account::services::{AccountService, PasswordChange},
    auth::extractors::AuthUser,
    avatars::{services::MAX_AVATAR_BYTES, AvatarManager, AvatarUpload},
    error::{AppError, FieldErrors},
    extract::{AppJson, AppQuery},
    state::AppState,
    users::{
        dto::{
            ChangePasswordRequest, DataResponse, ListQuery, PaginatedUsers,
            PasswordChangedResponse, SearchQuery, UpdateProfileRequest, UserEnvelope,
            UserResource,
        },
        repo_types::PageRequest,
    },
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/user/me", get(me))
        .route("/user/profile", post(update_profile))
        .route(
            "/user/avatar",
            // headroom over the avatar ceiling so oversize files get a 422, not a 413
            post(update_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + 512 * 1024)),
        )
        .route("/user/password", post(change_password))
}

pub fn directory_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/search", get(search_users))
        .route("/users/:id", get(show_user))
}

#[instrument(skip(avatars, auth), fields(user_id = %auth.user.id))]
pub async fn me(
    State(avatars): State<AvatarManager>,
    auth: AuthUser,
) -> Json<DataResponse<UserResource>> {
    Json(DataResponse {
        data: UserResource::present(&auth.user, &avatars),
    })
}

#[instrument(skip(accounts, auth, payload), fields(user_id = %auth.user.id))]
pub async fn update_profile(
    State(accounts): State<AccountService>,
    auth: AuthUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> Result<Json<UserEnvelope>, AppError> {
    let user = accounts
        .update_profile(auth.user.id, payload.name.as_deref(), payload.email.as_deref())
        .await?;
    Ok(Json(UserEnvelope {
        message: "Profile updated successfully.",
        user: UserResource::present(&user, accounts.avatars()),
    }))
}

/// Pulls the `avatar` part out of the multipart body, ignoring other parts.
async fn read_avatar_field(mp: &mut Multipart) -> Result<AvatarUpload, AppError> {
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(upload_failed(e.status(), e.body_text())),
        };
        if field.name() != Some("avatar") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let body = field
            .bytes()
            .await
            .map_err(|e| upload_failed(e.status(), e.body_text()))?;
        return Ok(AvatarUpload { body, content_type });
    }
    Err(AppError::File("The avatar field is required.".into()))
}

fn upload_failed(status: StatusCode, detail: String) -> AppError {
    warn!(%status, %detail, "multipart read failed");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::File("The avatar field must not be greater than 2048 kilobytes.".into())
    } else {
        AppError::File("The avatar failed to upload.".into())
    }
}

#[instrument(skip(accounts, auth, mp), fields(user_id = %auth.user.id))]
pub async fn update_avatar(
    State(accounts): State<AccountService>,
    auth: AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<UserEnvelope>, AppError> {
    // a body that is not multipart carries no avatar field
    let mut mp = mp.map_err(|e| {
        warn!(detail = %e.body_text(), "multipart body rejected");
        AppError::File("The avatar field is required.".into())
    })?;
    let upload = read_avatar_field(&mut mp).await?;
    let user = accounts.update_avatar(auth.user.id, upload).await?;
    Ok(Json(UserEnvelope {
        message: "Avatar updated successfully.",
        user: UserResource::present(&user, accounts.avatars()),
    }))
}

#[instrument(skip(accounts, auth, payload), fields(user_id = %auth.user.id))]
pub async fn change_password(
    State(accounts): State<AccountService>,
    auth: AuthUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<Json<PasswordChangedResponse>, AppError> {
    accounts
        .change_password(
            auth.user.id,
            PasswordChange {
                current_password: payload.current_password,
                password: payload.password,
                password_confirmation: payload.password_confirmation,
            },
        )
        .await?;
    Ok(Json(PasswordChangedResponse {
        message: "Password changed successfully. Please log in again.",
        status_code: StatusCode::OK.as_u16(),
    }))
}

#[instrument(skip(state, _auth))]
pub async fn list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
    AppQuery(q): AppQuery<ListQuery>,
) -> Result<Json<PaginatedUsers>, AppError> {
    let page = state.users.list(PageRequest::new(q.page, q.limit)).await?;
    Ok(Json(PaginatedUsers::present(page, &state.avatars)))
}

#[instrument(skip(state, _auth))]
pub async fn search_users(
    State(state): State<AppState>,
    _auth: AuthUser,
    AppQuery(q): AppQuery<SearchQuery>,
) -> Result<Json<PaginatedUsers>, AppError> {
    let Some(term) = q.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(AppError::Validation(FieldErrors::single(
            "q",
            "The q field is required.",
        )));
    };
    let page = state
        .users
        .search(term, PageRequest::new(q.page, q.limit))
        .await?;
    Ok(Json(PaginatedUsers::present(page, &state.avatars)))
}

/// Unknown and malformed ids are both a 404.
#[instrument(skip(accounts, _auth))]
pub async fn show_user(
    State(accounts): State<AccountService>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<UserResource>>, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| AppError::NotFound)?;
    let user = accounts.get_user(id).await?;
    Ok(Json(DataResponse {
        data: UserResource::present(&user, accounts.avatars()),
    }))
}
