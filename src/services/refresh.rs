use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::ProviderCredentials;
use crate::error::ProviderError;
use crate::ports::apple::DeveloperTokenProvider;
use crate::ports::http::HttpGateway;
use crate::provider::{GrantShape, Provider};
use crate::store::LinkedAccountStore;

/// Lifetime assumed when a token response omits `expires_in`.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Tokens expiring within this window are treated as already expired, so a
/// request never goes out with a token about to die mid-flight.
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

struct CachedAppToken {
    token: String,
    expires_at: i64,
}

/// Refreshes provider access tokens, serializing concurrent refreshes per
/// (user, provider) so a burst of expired requests produces one token
/// exchange instead of many.
pub struct TokenRefresher<G> {
    gateway: Arc<G>,
    store: Arc<LinkedAccountStore>,
    spotify: ProviderCredentials,
    google: ProviderCredentials,
    apple: Option<Arc<dyn DeveloperTokenProvider>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Client-credentials token for anonymous Spotify lookups.
    app_token: Mutex<Option<CachedAppToken>>,
}

impl<G: HttpGateway> TokenRefresher<G> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<LinkedAccountStore>,
        spotify: ProviderCredentials,
        google: ProviderCredentials,
        apple: Option<Arc<dyn DeveloperTokenProvider>>,
    ) -> Self {
        Self {
            gateway,
            store,
            spotify,
            google,
            apple,
            locks: Mutex::new(HashMap::new()),
            app_token: Mutex::new(None),
        }
    }

    /// Return a valid access token for the user's linked account, refreshing
    /// it first if it is expired or about to expire.
    pub async fn access_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<String, ProviderError> {
        let account = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(ProviderError::NotLinked(provider))?;

        if !token_expired(account.token_expiry) {
            return Ok(account.access_token);
        }
        self.refresh(user_id, provider, None).await
    }

    /// Refresh the access token and return the new one. Paired providers
    /// (YouTube Music and Google share one Google grant) have the new tokens
    /// written to both linked rows.
    ///
    /// `rejected_token` is the token the provider just answered 401 to, if
    /// any. It lets a replay skip the exchange when a concurrent caller
    /// already replaced the token.
    pub async fn refresh(
        &self,
        user_id: &str,
        provider: Provider,
        rejected_token: Option<&str>,
    ) -> Result<String, ProviderError> {
        let lock = self.refresh_lock(user_id, provider).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have refreshed
        // while we waited.
        let account = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(ProviderError::NotLinked(provider))?;
        let already_replaced = match rejected_token {
            Some(rejected) => account.access_token != rejected,
            None => !token_expired(account.token_expiry),
        };
        if already_replaced {
            return Ok(account.access_token);
        }

        tracing::info!(user_id, %provider, "refreshing access token");

        let (access_token, refresh_token, token_expiry) = match provider.capabilities().grant {
            GrantShape::LocalDeveloperToken => {
                let apple = self
                    .apple
                    .as_ref()
                    .ok_or(ProviderError::RefreshFailed(provider))?;
                let (token, expiry) = apple.developer_token()?;
                (token, None, expiry)
            }
            grant => {
                let refresh_token = account
                    .refresh_token
                    .ok_or(ProviderError::RefreshFailed(provider))?;
                let response = self.exchange(provider, grant, &refresh_token).await?;
                let expiry = chrono::Utc::now().timestamp()
                    + response.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
                (response.access_token, response.refresh_token, expiry)
            }
        };

        self.store
            .replace_tokens(
                user_id,
                provider,
                access_token.clone(),
                refresh_token.clone(),
                token_expiry,
            )
            .await?;

        // One Google grant backs both rows of the pair; keep the partner
        // row in step when it is linked too.
        if let Some(partner) = provider.paired() {
            if self.store.get(user_id, partner).await?.is_some() {
                self.store
                    .replace_tokens(user_id, partner, access_token.clone(), refresh_token, token_expiry)
                    .await?;
            }
        }

        Ok(access_token)
    }

    /// Client-credentials token for anonymous Spotify lookups, cached until
    /// shortly before it expires.
    pub async fn client_credentials_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.app_token.lock().await;
        if let Some(ref app_token) = *cached {
            if !token_expired(app_token.expires_at) {
                return Ok(app_token.token.clone());
            }
        }
        self.mint_app_token(&mut cached).await
    }

    /// Replace a client-credentials token the provider just rejected. Skips
    /// the exchange when the cache already holds a different token.
    pub async fn remint_client_credentials(
        &self,
        rejected_token: &str,
    ) -> Result<String, ProviderError> {
        let mut cached = self.app_token.lock().await;
        if let Some(ref app_token) = *cached {
            if app_token.token != rejected_token && !token_expired(app_token.expires_at) {
                return Ok(app_token.token.clone());
            }
        }
        self.mint_app_token(&mut cached).await
    }

    async fn mint_app_token(
        &self,
        cached: &mut Option<CachedAppToken>,
    ) -> Result<String, ProviderError> {
        tracing::debug!("minting spotify client-credentials token");
        let headers = vec![basic_auth_header(&self.spotify)];
        let form = vec![("grant_type".to_string(), "client_credentials".to_string())];
        let response = self
            .gateway
            .post_form(crate::provider::SPOTIFY_TOKEN_URL, &headers, &form)
            .await?;

        if !response.is_success() {
            tracing::warn!(
                status = response.status,
                body = %response.body,
                "client-credentials grant rejected"
            );
            return Err(ProviderError::RefreshFailed(Provider::Spotify));
        }

        let token: TokenResponse = response.json()?;
        let expires_at =
            chrono::Utc::now().timestamp() + token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        *cached = Some(CachedAppToken {
            token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    async fn exchange(
        &self,
        provider: Provider,
        grant: GrantShape,
        refresh_token: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let endpoint = provider
            .capabilities()
            .token_endpoint
            .ok_or(ProviderError::RefreshFailed(provider))?;

        let mut headers = Vec::new();
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        match grant {
            GrantShape::RefreshTokenBasicAuth => {
                headers.push(basic_auth_header(&self.spotify));
            }
            GrantShape::RefreshTokenClientFields => {
                form.push(("client_id".to_string(), self.google.client_id.clone()));
                form.push(("client_secret".to_string(), self.google.client_secret.clone()));
            }
            GrantShape::LocalDeveloperToken => unreachable!("handled before exchange"),
        }

        let response = self.gateway.post_form(endpoint, &headers, &form).await?;

        if response.is_success() {
            return response.json();
        }

        tracing::warn!(
            %provider,
            status = response.status,
            body = %response.body,
            "token refresh rejected"
        );
        if response.status >= 500 {
            Err(ProviderError::UpstreamUnavailable {
                status: response.status,
            })
        } else {
            Err(ProviderError::RefreshFailed(provider))
        }
    }

    async fn refresh_lock(&self, user_id: &str, provider: Provider) -> Arc<Mutex<()>> {
        // Paired providers share one grant, so they share one lock.
        let lock_provider = match provider {
            Provider::YoutubeMusic => Provider::Google,
            other => other,
        };
        let key = format!("{user_id}:{lock_provider}");
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_default().clone()
    }
}

fn token_expired(token_expiry: i64) -> bool {
    token_expiry <= chrono::Utc::now().timestamp() + TOKEN_EXPIRY_SKEW_SECS
}

fn basic_auth_header(credentials: &ProviderCredentials) -> (String, String) {
    let encoded = BASE64.encode(format!(
        "{}:{}",
        credentials.client_id, credentials.client_secret
    ));
    ("Authorization".to_string(), format!("Basic {encoded}"))
}
