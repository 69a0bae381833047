use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

const TOKEN_BYTES: usize = 40;

/// Rows of hashed bearer tokens. Plaintext tokens never reach this layer.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, user_id: Uuid, name: &str, token_hash: &str) -> anyhow::Result<()>;
    /// Returns whether a row was removed.
    async fn delete(&self, token_hash: &str) -> anyhow::Result<bool>;
    async fn delete_for_user(&self, user_id: Uuid) -> anyhow::Result<u64>;
    /// Atomically replaces every token of the user with the given one and
    /// returns how many were removed. Concurrent calls for one user serialize.
    async fn replace_for_user(
        &self,
        user_id: Uuid,
        name: &str,
        token_hash: &str,
    ) -> anyhow::Result<u64>;
    /// Marks the token as used and returns its owner. Tokens created at or
    /// before `created_after` are treated as absent.
    async fn touch(
        &self,
        token_hash: &str,
        created_after: Option<OffsetDateTime>,
    ) -> anyhow::Result<Option<Uuid>>;
}

pub(crate) fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mints, resolves and revokes opaque bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
    ttl: Option<Duration>,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn TokenStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    fn mint() -> String {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        hex::encode(raw)
    }

    pub async fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let token = Self::mint();
        self.store
            .insert(user_id, &format!("API-Token-{user_id}"), &hash_token(&token))
            .await?;
        debug!(%user_id, "token issued");
        Ok(token)
    }

    /// Issues a token that becomes the user's only live one.
    pub async fn rotate(&self, user_id: Uuid) -> anyhow::Result<String> {
        let token = Self::mint();
        let revoked = self
            .store
            .replace_for_user(user_id, &format!("API-Token-{user_id}"), &hash_token(&token))
            .await?;
        debug!(%user_id, revoked, "token rotated");
        Ok(token)
    }

    pub async fn resolve(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        if token.is_empty() {
            return Ok(None);
        }
        let created_after = self.ttl.map(|ttl| OffsetDateTime::now_utc() - ttl);
        self.store.touch(&hash_token(token), created_after).await
    }

    pub async fn revoke(&self, token: &str) -> anyhow::Result<bool> {
        self.store.delete(&hash_token(token)).await
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let removed = self.store.delete_for_user(user_id).await?;
        debug!(%user_id, removed, "tokens revoked");
        Ok(removed)
    }
}

#[derive(Clone)]
pub struct PgTokenStore {
    db: PgPool,
}

impl PgTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, user_id: Uuid, name: &str, token_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO personal_access_tokens (user_id, name, token_hash)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(token_hash)
        .execute(&self.db)
        .await
        .context("insert token")?;
        Ok(())
    }

    async fn delete(&self, token_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM personal_access_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.db)
            .await
            .context("delete token")?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM personal_access_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("delete tokens for user")?;
        Ok(res.rows_affected())
    }

    async fn replace_for_user(
        &self,
        user_id: Uuid,
        name: &str,
        token_hash: &str,
    ) -> anyhow::Result<u64> {
        let mut tx = self.db.begin().await.context("begin token rotation")?;

        // the owner's row lock orders concurrent rotations
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .context("lock token owner")?;
        let removed = sqlx::query("DELETE FROM personal_access_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("delete tokens for rotation")?
            .rows_affected();
        sqlx::query(
            r#"
            INSERT INTO personal_access_tokens (user_id, name, token_hash)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(token_hash)
        .execute(&mut *tx)
        .await
        .context("insert rotated token")?;

        tx.commit().await.context("commit token rotation")?;
        Ok(removed)
    }

    async fn touch(
        &self,
        token_hash: &str,
        created_after: Option<OffsetDateTime>,
    ) -> anyhow::Result<Option<Uuid>> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE personal_access_tokens
               SET last_used_at = now()
             WHERE token_hash = $1
               AND ($2::timestamptz IS NULL OR created_at > $2)
            RETURNING user_id
            "#,
        )
        .bind(token_hash)
        .bind(created_after)
        .fetch_optional(&self.db)
        .await
        .context("resolve token")?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTokenStore;

    fn issuer(ttl: Option<Duration>) -> (TokenIssuer, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::default());
        (TokenIssuer::new(store.clone(), ttl), store)
    }

    #[tokio::test]
    async fn issued_token_resolves_to_owner() {
        let (issuer, _) = issuer(None);
        let user_id = Uuid::new_v4();
        let token = issuer.issue(user_id).await.unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert_eq!(issuer.resolve(&token).await.unwrap(), Some(user_id));
    }

    #[tokio::test]
    async fn only_the_hash_is_stored() {
        let (issuer, store) = issuer(None);
        let token = issuer.issue(Uuid::new_v4()).await.unwrap();
        let hashes = store.hashes();
        assert_eq!(hashes, vec![hash_token(&token)]);
        assert!(!hashes.contains(&token));
    }

    #[tokio::test]
    async fn resolve_records_last_use() {
        let (issuer, store) = issuer(None);
        let token = issuer.issue(Uuid::new_v4()).await.unwrap();
        assert!(store.last_used_at(&hash_token(&token)).is_none());
        issuer.resolve(&token).await.unwrap();
        assert!(store.last_used_at(&hash_token(&token)).is_some());
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens_do_not_resolve() {
        let (issuer, _) = issuer(None);
        assert_eq!(issuer.resolve("").await.unwrap(), None);
        assert_eq!(issuer.resolve("deadbeef").await.unwrap(), None);
    }

    #[tokio::test]
    async fn revoke_removes_exactly_one_token() {
        let (issuer, _) = issuer(None);
        let user_id = Uuid::new_v4();
        let a = issuer.issue(user_id).await.unwrap();
        let b = issuer.issue(user_id).await.unwrap();

        assert!(issuer.revoke(&a).await.unwrap());
        assert!(!issuer.revoke(&a).await.unwrap());
        assert_eq!(issuer.resolve(&a).await.unwrap(), None);
        assert_eq!(issuer.resolve(&b).await.unwrap(), Some(user_id));
    }

    #[tokio::test]
    async fn revoke_all_is_scoped_to_the_user() {
        let (issuer, _) = issuer(None);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let a1 = issuer.issue(alice).await.unwrap();
        let a2 = issuer.issue(alice).await.unwrap();
        let b1 = issuer.issue(bob).await.unwrap();

        assert_eq!(issuer.revoke_all(alice).await.unwrap(), 2);
        assert_eq!(issuer.resolve(&a1).await.unwrap(), None);
        assert_eq!(issuer.resolve(&a2).await.unwrap(), None);
        assert_eq!(issuer.resolve(&b1).await.unwrap(), Some(bob));
    }

    #[tokio::test]
    async fn rotate_leaves_only_the_new_token() {
        let (issuer, store) = issuer(None);
        let user_id = Uuid::new_v4();
        let old = issuer.issue(user_id).await.unwrap();
        let new = issuer.rotate(user_id).await.unwrap();

        assert_eq!(issuer.resolve(&old).await.unwrap(), None);
        assert_eq!(issuer.resolve(&new).await.unwrap(), Some(user_id));
        assert_eq!(store.count_for(user_id), 1);
    }

    #[tokio::test]
    async fn concurrent_rotations_leave_one_live_token() {
        let (issuer, store) = issuer(None);
        let user_id = Uuid::new_v4();
        let (a, b) = tokio::join!(issuer.rotate(user_id), issuer.rotate(user_id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(store.count_for(user_id), 1);
        let live = [&a, &b]
            .into_iter()
            .filter(|t| store.hashes().contains(&hash_token(t)))
            .count();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn expired_tokens_do_not_resolve() {
        let (issuer, store) = issuer(Some(Duration::minutes(30)));
        let user_id = Uuid::new_v4();
        let token = issuer.issue(user_id).await.unwrap();
        assert_eq!(issuer.resolve(&token).await.unwrap(), Some(user_id));

        store.backdate(&hash_token(&token), Duration::hours(1));
        assert_eq!(issuer.resolve(&token).await.unwrap(), None);
    }

    #[test]
    fn hash_is_stable_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
