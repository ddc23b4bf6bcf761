use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;
use crate::ports::http::HttpGateway;
use crate::provider::Provider;
use crate::services::refresh::TokenRefresher;

/// Sleep applied after a 429 when the provider sent no Retry-After header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// How many 429 responses are retried before giving up. The request is sent
/// at most `MAX_RATE_LIMIT_RETRIES + 1` times.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Who the request is made on behalf of.
#[derive(Debug, Clone, Copy)]
pub enum RequestAuth<'a> {
    /// A user's linked account token.
    User { user_id: &'a str, provider: Provider },
    /// The anonymous Spotify client-credentials token.
    ClientCredentials,
}

/// Outcome of a provider GET that distinguishes "resource does not exist"
/// from failure, so callers can treat 404 as an absent value.
#[derive(Debug)]
pub enum Fetched {
    Ok(serde_json::Value),
    NotFound,
}

impl Fetched {
    /// The decoded body, mapping 404 to an error for callers that require
    /// the resource to exist.
    pub fn required(self) -> Result<serde_json::Value, ProviderError> {
        match self {
            Fetched::Ok(value) => Ok(value),
            Fetched::NotFound => Err(ProviderError::UpstreamUnavailable { status: 404 }),
        }
    }
}

/// Sends authenticated provider requests, normalizing upstream status codes:
/// one refresh-and-replay on 401, bounded Retry-After backoff on 429, 404 as
/// an absent signal. No locks are held across the backoff sleeps.
pub struct RequestExecutor<G> {
    gateway: Arc<G>,
    refresher: Arc<TokenRefresher<G>>,
}

impl<G: HttpGateway> RequestExecutor<G> {
    pub fn new(gateway: Arc<G>, refresher: Arc<TokenRefresher<G>>) -> Self {
        Self { gateway, refresher }
    }

    pub async fn get_json(
        &self,
        auth: RequestAuth<'_>,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Fetched, ProviderError> {
        let mut token = self.token(auth, None).await?;
        let mut refreshed = false;
        let mut rate_limit_retries = 0u32;

        loop {
            let response = self.gateway.get(url, &token, params).await?;

            match response.status {
                status if (200..300).contains(&status) => {
                    return Ok(Fetched::Ok(response.json()?));
                }
                401 => {
                    if refreshed {
                        // The replayed request failed too; the grant itself
                        // is bad, not just the access token.
                        tracing::warn!(url, "request rejected again after token refresh");
                        return Err(ProviderError::RefreshFailed(auth_provider(auth)));
                    }
                    tracing::debug!(url, "access token rejected, refreshing and replaying");
                    token = self.token(auth, Some(&token)).await?;
                    refreshed = true;
                }
                404 => return Ok(Fetched::NotFound),
                429 => {
                    if rate_limit_retries >= MAX_RATE_LIMIT_RETRIES {
                        tracing::warn!(url, "rate limit retries exhausted");
                        return Err(ProviderError::RateLimited);
                    }
                    let wait = response.retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    tracing::debug!(url, wait_secs = wait, "rate limited, backing off");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    rate_limit_retries += 1;
                    // The token may have expired during a long backoff.
                    token = self.token(auth, None).await?;
                }
                status => {
                    tracing::warn!(url, status, body = %response.body, "upstream request failed");
                    return Err(ProviderError::UpstreamUnavailable { status });
                }
            }
        }
    }

    async fn token(
        &self,
        auth: RequestAuth<'_>,
        rejected: Option<&str>,
    ) -> Result<String, ProviderError> {
        match (auth, rejected) {
            (RequestAuth::User { user_id, provider }, None) => {
                self.refresher.access_token(user_id, provider).await
            }
            (RequestAuth::User { user_id, provider }, Some(rejected)) => {
                self.refresher.refresh(user_id, provider, Some(rejected)).await
            }
            (RequestAuth::ClientCredentials, None) => {
                self.refresher.client_credentials_token().await
            }
            (RequestAuth::ClientCredentials, Some(rejected)) => {
                self.refresher.remint_client_credentials(rejected).await
            }
        }
    }
}

fn auth_provider(auth: RequestAuth<'_>) -> Provider {
    match auth {
        RequestAuth::User { provider, .. } => provider,
        RequestAuth::ClientCredentials => Provider::Spotify,
    }
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::config::ProviderCredentials;
    use crate::ports::http::{MockHttpGateway, WireResponse};
    use crate::store::{LinkedAccountStore, TokenSet};
    use crate::test_utils::test_db;

    const API_URL: &str = "https://api.spotify.com/v1/playlists/p1";

    fn response(status: u16, body: &str) -> WireResponse {
        WireResponse {
            status,
            retry_after: None,
            body: body.to_string(),
        }
    }

    async fn linked_store(access: &str, expiry: i64) -> Arc<LinkedAccountStore> {
        let store = Arc::new(LinkedAccountStore::new(test_db().await));
        store
            .insert_if_absent(
                "u1",
                Provider::Spotify,
                TokenSet {
                    access_token: access.to_string(),
                    refresh_token: Some("refresh-1".to_string()),
                    token_expiry: expiry,
                    scopes: String::new(),
                },
            )
            .await
            .unwrap();
        store
    }

    fn executor(
        gateway: MockHttpGateway,
        store: Arc<LinkedAccountStore>,
    ) -> RequestExecutor<MockHttpGateway> {
        let gateway = Arc::new(gateway);
        let refresher = Arc::new(TokenRefresher::new(
            gateway.clone(),
            store,
            ProviderCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            ProviderCredentials {
                client_id: "gid".to_string(),
                client_secret: "gsecret".to_string(),
            },
            None,
        ));
        RequestExecutor::new(gateway, refresher)
    }

    fn user_auth() -> RequestAuth<'static> {
        RequestAuth::User {
            user_id: "u1",
            provider: Provider::Spotify,
        }
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 100_000
    }

    #[tokio::test]
    async fn test_success_returns_decoded_body() {
        let store = linked_store("good-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        gateway
            .expect_get()
            .withf(|url, bearer, _| url == API_URL && bearer == "good-token")
            .times(1)
            .returning(|_, _, _| Ok(response(200, r#"{"name":"Mix"}"#)));

        let executor = executor(gateway, store);
        let fetched = executor.get_json(user_auth(), API_URL, &[]).await.unwrap();
        let value = fetched.required().unwrap();
        assert_eq!(value["name"], "Mix");
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_replays() {
        let store = linked_store("stale-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_get()
            .withf(|_, bearer, _| bearer == "stale-token")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(401, "")));
        gateway
            .expect_post_form()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(response(
                    200,
                    r#"{"access_token":"fresh-token","expires_in":3600}"#,
                ))
            });
        gateway
            .expect_get()
            .withf(|_, bearer, _| bearer == "fresh-token")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(200, r#"{"name":"Mix"}"#)));

        let executor = executor(gateway, store);
        let fetched = executor.get_json(user_auth(), API_URL, &[]).await.unwrap();
        assert!(matches!(fetched, Fetched::Ok(_)));
    }

    #[tokio::test]
    async fn test_second_401_is_terminal() {
        let store = linked_store("stale-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        gateway
            .expect_get()
            .times(2)
            .returning(|_, _, _| Ok(response(401, "")));
        gateway.expect_post_form().times(1).returning(|_, _, _| {
            Ok(response(
                200,
                r#"{"access_token":"still-bad","expires_in":3600}"#,
            ))
        });

        let executor = executor(gateway, store);
        let err = executor
            .get_json(user_auth(), API_URL, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RefreshFailed(Provider::Spotify)));
    }

    #[tokio::test]
    async fn test_404_is_an_absent_signal() {
        let store = linked_store("good-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        gateway
            .expect_get()
            .times(1)
            .returning(|_, _, _| Ok(response(404, "")));

        let executor = executor(gateway, store);
        let fetched = executor.get_json(user_auth(), API_URL, &[]).await.unwrap();
        assert!(matches!(fetched, Fetched::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_honors_retry_after_then_succeeds() {
        let store = linked_store("good-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(WireResponse {
                    status: 429,
                    retry_after: Some(3),
                    body: String::new(),
                })
            });
        gateway
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(200, r#"{"name":"Mix"}"#)));

        let executor = executor(gateway, store);
        let started = tokio::time::Instant::now();
        let fetched = executor.get_json(user_auth(), API_URL, &[]).await.unwrap();
        assert!(matches!(fetched, Fetched::Ok(_)));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_default_backoff_when_header_missing() {
        let store = linked_store("good-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(429, "")));
        gateway
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(200, "{}")));

        let executor = executor(gateway, store);
        let started = tokio::time::Instant::now();
        executor.get_json(user_auth(), API_URL, &[]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_429_exhausts_retries() {
        let store = linked_store("good-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        // Initial request plus MAX_RATE_LIMIT_RETRIES replays, all limited.
        gateway
            .expect_get()
            .times(1 + MAX_RATE_LIMIT_RETRIES as usize)
            .returning(|_, _, _| Ok(response(429, "")));

        let executor = executor(gateway, store);
        let err = executor
            .get_json(user_auth(), API_URL, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_upstream_unavailable() {
        let store = linked_store("good-token", far_future()).await;

        let mut gateway = MockHttpGateway::new();
        gateway
            .expect_get()
            .times(1)
            .returning(|_, _, _| Ok(response(502, "bad gateway")));

        let executor = executor(gateway, store);
        let err = executor
            .get_json(user_auth(), API_URL, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UpstreamUnavailable { status: 502 }
        ));
    }

    #[tokio::test]
    async fn test_unlinked_user_fails_before_any_request() {
        let store = Arc::new(LinkedAccountStore::new(test_db().await));
        let executor = executor(MockHttpGateway::new(), store);

        let err = executor
            .get_json(user_auth(), API_URL, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotLinked(Provider::Spotify)));
    }

    #[tokio::test]
    async fn test_client_credentials_401_remints_and_replays() {
        let store = Arc::new(LinkedAccountStore::new(test_db().await));

        let mut gateway = MockHttpGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_post_form()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(response(200, r#"{"access_token":"app-1","expires_in":3600}"#))
            });
        gateway
            .expect_get()
            .withf(|_, bearer, _| bearer == "app-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(401, "")));
        gateway
            .expect_post_form()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(response(200, r#"{"access_token":"app-2","expires_in":3600}"#))
            });
        gateway
            .expect_get()
            .withf(|_, bearer, _| bearer == "app-2")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(response(200, "{}")));

        let executor = executor(gateway, store);
        let fetched = executor
            .get_json(RequestAuth::ClientCredentials, API_URL, &[])
            .await
            .unwrap();
        assert!(matches!(fetched, Fetched::Ok(_)));
    }
}
