use std::sync::Arc;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
};

use crate::database::Database;
use crate::entities;
use crate::error::ProviderError;
use crate::provider::Provider;
use crate::utils;

/// How long an issued OAuth state token stays redeemable.
pub const LINK_STATE_TTL_SECS: i64 = 600;

/// Token material written to a linked account row.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute unix timestamp, already converted from the provider's
    /// `expires_in` lifetime.
    pub token_expiry: i64,
    pub scopes: String,
}

/// Persistence for linked provider accounts, one row per (user, provider).
pub struct LinkedAccountStore {
    db: Arc<Database>,
}

impl LinkedAccountStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<entities::linked_account::Model>, ProviderError> {
        let account = entities::linked_account::Entity::find()
            .filter(entities::linked_account::Column::UserId.eq(user_id))
            .filter(entities::linked_account::Column::Provider.eq(provider.as_str()))
            .one(&self.db.conn)
            .await?;
        Ok(account)
    }

    /// Link an account if none exists yet. Re-linking an already-linked
    /// provider is a silent no-op: the stored (possibly newer) tokens win.
    pub async fn insert_if_absent(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: TokenSet,
    ) -> Result<(), ProviderError> {
        if self.get(user_id, provider).await?.is_some() {
            tracing::debug!(user_id, %provider, "account already linked, keeping stored tokens");
            return Ok(());
        }

        let account = entities::linked_account::ActiveModel {
            user_id: Set(user_id.to_string()),
            provider: Set(provider.as_str().to_string()),
            access_token: Set(tokens.access_token),
            refresh_token: Set(tokens.refresh_token),
            token_expiry: Set(tokens.token_expiry),
            scopes: Set(tokens.scopes),
            ..entities::linked_account::ActiveModel::new()
        };
        account.insert(&self.db.conn).await?;
        tracing::info!(user_id, %provider, "linked account");
        Ok(())
    }

    /// Replace the access token after a refresh. A `None` refresh token
    /// keeps the stored one: providers that do not rotate refresh tokens
    /// omit the field in their response.
    pub async fn replace_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        access_token: String,
        refresh_token: Option<String>,
        token_expiry: i64,
    ) -> Result<(), ProviderError> {
        let Some(existing) = self.get(user_id, provider).await? else {
            return Err(ProviderError::NotLinked(provider));
        };

        let mut account: entities::linked_account::ActiveModel = existing.into();
        account.access_token = Set(access_token);
        if let Some(rotated) = refresh_token {
            account.refresh_token = Set(Some(rotated));
        }
        account.token_expiry = Set(token_expiry);
        account.update(&self.db.conn).await?;
        Ok(())
    }

    /// Every provider the user has linked.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Provider>, ProviderError> {
        let accounts = entities::linked_account::Entity::find()
            .filter(entities::linked_account::Column::UserId.eq(user_id))
            .all(&self.db.conn)
            .await?;
        Ok(accounts
            .iter()
            .filter_map(|account| Provider::parse(&account.provider))
            .collect())
    }

    /// Remove a linked account. Returns whether a row existed.
    pub async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, ProviderError> {
        let result = entities::linked_account::Entity::delete_many()
            .filter(entities::linked_account::Column::UserId.eq(user_id))
            .filter(entities::linked_account::Column::Provider.eq(provider.as_str()))
            .exec(&self.db.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

/// Persistence for OAuth correlation state. Each state token is single-use
/// and expires after [`LINK_STATE_TTL_SECS`].
pub struct OauthStateStore {
    db: Arc<Database>,
}

impl OauthStateStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issue a fresh state token for an authorization redirect.
    pub async fn create(&self, user_id: &str, provider: Provider) -> Result<String, ProviderError> {
        let state = utils::generate_state();
        let record = entities::oauth_state::ActiveModel {
            state: Set(state.clone()),
            user_id: Set(user_id.to_string()),
            provider: Set(provider.as_str().to_string()),
            ..entities::oauth_state::ActiveModel::new()
        };
        record.insert(&self.db.conn).await?;
        Ok(state)
    }

    /// Redeem a state token, deleting it. Unknown, already-consumed, or
    /// expired tokens all surface as [`ProviderError::StaleLinkState`].
    pub async fn consume(&self, state: &str) -> Result<(String, Provider), ProviderError> {
        let Some(record) = entities::oauth_state::Entity::find()
            .filter(entities::oauth_state::Column::State.eq(state))
            .one(&self.db.conn)
            .await?
        else {
            return Err(ProviderError::StaleLinkState);
        };

        entities::oauth_state::Entity::delete_by_id(record.id)
            .exec(&self.db.conn)
            .await?;

        let age = chrono::Utc::now().timestamp() - record.created_at;
        if age > LINK_STATE_TTL_SECS {
            tracing::warn!(user_id = %record.user_id, "oauth state expired before callback");
            return Err(ProviderError::StaleLinkState);
        }

        let provider = Provider::parse(&record.provider).ok_or(ProviderError::StaleLinkState)?;
        Ok((record.user_id, provider))
    }
}
