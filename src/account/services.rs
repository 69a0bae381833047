use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    account::validation::{check_email, check_name},
    auth::{
        password::{check_policy, hash_password, verify_password},
        tokens::TokenIssuer,
    },
    avatars::{AvatarManager, AvatarUpload},
    error::{AppError, FieldErrors},
    users::{
        repo::{StoreError, UserStore},
        repo_types::User,
    },
};

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If the email address exists, a password reset link has been sent.";

#[derive(Debug, Default, Clone)]
pub struct Registration {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct PasswordChange {
    pub current_password: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

/// Splits password-policy failures from other field errors.
fn reject(errors: FieldErrors, password_field: &'static str) -> AppError {
    let only_password = {
        let mut rest = errors.clone();
        rest.remove(password_field);
        rest.is_empty()
    };
    if only_password {
        AppError::PasswordPolicy(errors)
    } else {
        AppError::Validation(errors)
    }
}

/// Registration, sessions and profile changes over the injected stores.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserStore>,
    tokens: TokenIssuer,
    avatars: AvatarManager,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenIssuer, avatars: AvatarManager) -> Self {
        Self { users, tokens, avatars }
    }

    pub fn avatars(&self) -> &AvatarManager {
        &self.avatars
    }

    pub async fn register(&self, input: Registration) -> Result<(User, String), AppError> {
        let mut errors = FieldErrors::new();
        let name = check_name(&mut errors, input.name.as_deref());
        let email = check_email(&mut errors, input.email.as_deref());
        errors.merge(check_policy(
            "password",
            input.password.as_deref(),
            input.password_confirmation.as_deref(),
        ));
        let (Some(name), Some(email), Some(password), true) =
            (name, email, input.password, errors.is_empty())
        else {
            return Err(reject(errors, "password"));
        };

        let hash = hash_password(&password)?;
        let user = match self.users.create(&name, &email, &hash).await {
            Ok(user) => user,
            Err(StoreError::DuplicateEmail) => {
                warn!(%email, "email already registered");
                return Err(AppError::DuplicateEmail);
            }
            Err(e) => return Err(e.into()),
        };
        let token = self.tokens.issue(user.id).await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok((user, token))
    }

    /// Revokes every earlier token of the user before minting a new one.
    pub async fn login(
        &self,
        email: Option<&str>,
        password: Option<&str>,
    ) -> Result<(User, String), AppError> {
        let mut errors = FieldErrors::new();
        let email = check_email(&mut errors, email);
        let password = password.filter(|p| !p.is_empty());
        if password.is_none() {
            errors.add("password", "The password field is required.");
        }
        let (Some(email), Some(password)) = (email, password) else {
            return Err(AppError::Validation(errors));
        };

        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(%email, "login unknown email");
            return Err(AppError::InvalidCredentials { field: "email" });
        };
        if !verify_password(password, &user.password_hash)? {
            warn!(%email, user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials { field: "email" });
        }

        let token = self.tokens.rotate(user.id).await?;

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok((user, token))
    }

    /// Revokes exactly the presented token.
    pub async fn logout(&self, token: &str) -> Result<(), AppError> {
        if !self.tokens.revoke(token).await? {
            return Err(AppError::Unauthenticated);
        }
        info!("user logged out");
        Ok(())
    }

    /// Answers identically whether or not the account exists. No mail is sent.
    pub async fn forgot_password(&self, email: Option<&str>) -> Result<&'static str, AppError> {
        let mut errors = FieldErrors::new();
        let Some(email) = check_email(&mut errors, email) else {
            return Err(AppError::Validation(errors));
        };
        if let Some(user) = self.users.find_by_email(&email).await? {
            info!(user_id = %user.id, "password reset requested");
        }
        Ok(FORGOT_PASSWORD_MESSAGE)
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, AppError> {
        let mut errors = FieldErrors::new();
        let name = check_name(&mut errors, name);
        let email = check_email(&mut errors, email);
        let (Some(name), Some(email)) = (name, email) else {
            return Err(AppError::Validation(errors));
        };

        // the user's own email collides with nobody
        let user = self.users.update_profile(user_id, &name, &email).await?;
        info!(%user_id, "profile updated");
        Ok(user)
    }

    /// On success every token of the user is revoked; the client logs in again.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        input: PasswordChange,
    ) -> Result<User, AppError> {
        let user = self.get_user(user_id).await?;

        let Some(current) = input.current_password.filter(|p| !p.is_empty()) else {
            return Err(AppError::Validation(FieldErrors::single(
                "current_password",
                "The current password field is required.",
            )));
        };
        if !verify_password(&current, &user.password_hash)? {
            warn!(%user_id, "password change with wrong current password");
            return Err(AppError::InvalidCredentials { field: "current_password" });
        }

        let errors = check_policy(
            "password",
            input.password.as_deref(),
            input.password_confirmation.as_deref(),
        );
        let (Some(password), true) = (input.password, errors.is_empty()) else {
            return Err(AppError::PasswordPolicy(errors));
        };

        let hash = hash_password(&password)?;
        let updated = self.users.update_password(user_id, &hash).await?;
        let revoked = match self.tokens.revoke_all(user_id).await {
            Ok(revoked) => revoked,
            Err(e) => {
                // sessions survived, so the old password stays in force
                let restored = self.users.update_password(user_id, &user.password_hash).await;
                if let Err(restore) = restored {
                    error!(%user_id, error = %restore, "failed to restore password hash");
                }
                return Err(e.into());
            }
        };

        info!(%user_id, revoked, "password changed");
        Ok(updated)
    }

    pub async fn update_avatar(&self, user_id: Uuid, upload: AvatarUpload) -> Result<User, AppError> {
        let user = self.get_user(user_id).await?;
        let users = self.users.clone();

        let user = self
            .avatars
            .replace(user_id, upload, user.avatar_path.as_deref(), |key| async move {
                users.update_avatar(user_id, &key).await.map_err(AppError::from)
            })
            .await?;

        info!(%user_id, avatar_path = ?user.avatar_path, "avatar replaced");
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        self.users.find_by_id(id).await?.ok_or(AppError::NotFound)
    }
}
