use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::account::services::AccountService;
use crate::auth::tokens::{PgTokenStore, TokenIssuer, TokenStore};
use crate::avatars::AvatarManager;
use crate::config::{AppConfig, StorageDriver};
use crate::storage::{LocalDisk, S3Storage, StorageClient};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tokens: TokenIssuer,
    pub avatars: AvatarManager,
}

impl AppState {
    pub async fn init(config: AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let storage = match &config.storage.driver {
            StorageDriver::S3(s3) => Arc::new(S3Storage::new(s3).await?) as Arc<dyn StorageClient>,
            StorageDriver::Local { root } => Arc::new(LocalDisk::new(root)) as Arc<dyn StorageClient>,
        };

        Ok(Self::from_parts(
            Arc::new(config),
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(PgTokenStore::new(db)),
            storage,
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        token_store: Arc<dyn TokenStore>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let ttl = config.token_ttl_minutes.map(time::Duration::minutes);
        let tokens = TokenIssuer::new(token_store, ttl);
        let avatars = AvatarManager::new(storage, config.storage.public_url.clone());
        Self {
            config,
            users,
            tokens,
            avatars,
        }
    }
}

impl FromRef<AppState> for AccountService {
    fn from_ref(state: &AppState) -> Self {
        AccountService::new(state.users.clone(), state.tokens.clone(), state.avatars.clone())
    }
}

impl FromRef<AppState> for AvatarManager {
    fn from_ref(state: &AppState) -> Self {
        state.avatars.clone()
    }
}
