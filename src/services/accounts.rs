use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use url::Url;

use crate::config::ProviderCredentials;
use crate::error::ProviderError;
use crate::ports::apple::DeveloperTokenProvider;
use crate::ports::http::HttpGateway;
use crate::provider::{GrantShape, Provider};
use crate::services::refresh::DEFAULT_TOKEN_TTL_SECS;
use crate::store::{LinkedAccountStore, OauthStateStore, TokenSet};

pub const SPOTIFY_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

const SPOTIFY_LINK_SCOPES: &str = "playlist-read-private playlist-read-collaborative";
const GOOGLE_LINK_SCOPES: &str = "https://www.googleapis.com/auth/youtube.readonly";

/// Where to send the user's browser to authorize a link, plus the state
/// token that ties the eventual callback back to this request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Linking and unlinking of provider accounts, including the two-legged
/// OAuth dance for Spotify and Google. YouTube Music and Google are linked
/// and unlinked as a pair since they share one grant.
pub struct AccountService<G> {
    store: Arc<LinkedAccountStore>,
    states: Arc<OauthStateStore>,
    gateway: Arc<G>,
    spotify: ProviderCredentials,
    google: ProviderCredentials,
    apple: Option<Arc<dyn DeveloperTokenProvider>>,
}

impl<G: HttpGateway> AccountService<G> {
    pub fn new(
        store: Arc<LinkedAccountStore>,
        states: Arc<OauthStateStore>,
        gateway: Arc<G>,
        spotify: ProviderCredentials,
        google: ProviderCredentials,
        apple: Option<Arc<dyn DeveloperTokenProvider>>,
    ) -> Self {
        Self {
            store,
            states,
            gateway,
            spotify,
            google,
            apple,
        }
    }

    pub async fn is_linked(&self, user_id: &str, provider: Provider) -> Result<bool, ProviderError> {
        Ok(self.store.get(user_id, provider).await?.is_some())
    }

    pub async fn linked_providers(&self, user_id: &str) -> Result<Vec<Provider>, ProviderError> {
        self.store.list_for_user(user_id).await
    }

    /// Store a linked account. Already-linked providers are left untouched;
    /// paired providers get a second row sharing the same tokens.
    pub async fn link(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: TokenSet,
    ) -> Result<(), ProviderError> {
        self.store
            .insert_if_absent(user_id, provider, tokens.clone())
            .await?;
        if let Some(partner) = provider.paired() {
            self.store.insert_if_absent(user_id, partner, tokens).await?;
        }
        Ok(())
    }

    /// Remove a linked account and its paired row, if any. Returns whether
    /// anything was removed.
    pub async fn unlink(&self, user_id: &str, provider: Provider) -> Result<bool, ProviderError> {
        let mut removed = self.store.delete(user_id, provider).await?;
        if let Some(partner) = provider.paired() {
            removed |= self.store.delete(user_id, partner).await?;
        }
        if removed {
            tracing::info!(user_id, %provider, "unlinked account");
        }
        Ok(removed)
    }

    /// Start an authorization-code flow: issue a state token and build the
    /// provider's consent URL.
    pub async fn begin_link(
        &self,
        user_id: &str,
        provider: Provider,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest, ProviderError> {
        if provider == Provider::AppleMusic {
            return Err(ProviderError::NoAuthorizationFlow(provider));
        }
        let state = self.states.create(user_id, provider).await?;
        let url = match provider {
            Provider::Spotify => authorize_url(
                SPOTIFY_AUTHORIZE_URL,
                &[
                    ("client_id", self.spotify.client_id.as_str()),
                    ("response_type", "code"),
                    ("redirect_uri", redirect_uri),
                    ("scope", SPOTIFY_LINK_SCOPES),
                    ("state", &state),
                ],
            )?,
            Provider::YoutubeMusic | Provider::Google => authorize_url(
                GOOGLE_AUTHORIZE_URL,
                &[
                    ("client_id", self.google.client_id.as_str()),
                    ("response_type", "code"),
                    ("redirect_uri", redirect_uri),
                    ("scope", GOOGLE_LINK_SCOPES),
                    // offline + consent makes Google issue a refresh token.
                    ("access_type", "offline"),
                    ("prompt", "consent"),
                    ("state", &state),
                ],
            )?,
            Provider::AppleMusic => unreachable!("rejected above"),
        };
        Ok(AuthorizationRequest { url, state })
    }

    /// Finish an authorization-code flow from the provider callback:
    /// redeem the state, exchange the code for tokens, and link.
    pub async fn complete_link(
        &self,
        state: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(String, Provider), ProviderError> {
        let (user_id, provider) = self.states.consume(state).await?;
        let tokens = self.exchange_code(provider, code, redirect_uri).await?;
        self.link(&user_id, provider, tokens).await?;
        Ok((user_id, provider))
    }

    /// The Apple Music developer token, handed to the client so MusicKit
    /// can mint a music user token.
    pub fn apple_developer_token(&self) -> Result<String, ProviderError> {
        let apple = self
            .apple
            .as_ref()
            .ok_or(ProviderError::NotLinked(Provider::AppleMusic))?;
        let (token, _) = apple.developer_token()?;
        Ok(token)
    }

    /// Link Apple Music. There is no code exchange: the developer token is
    /// the access credential, stored with its own expiry.
    pub async fn link_apple(&self, user_id: &str) -> Result<(), ProviderError> {
        let apple = self
            .apple
            .as_ref()
            .ok_or(ProviderError::NotLinked(Provider::AppleMusic))?;
        let (token, expiry) = apple.developer_token()?;
        self.link(
            user_id,
            Provider::AppleMusic,
            TokenSet {
                access_token: token,
                refresh_token: None,
                token_expiry: expiry,
                scopes: String::new(),
            },
        )
        .await
    }

    async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError> {
        let capabilities = provider.capabilities();
        let endpoint = capabilities
            .token_endpoint
            .ok_or(ProviderError::NoAuthorizationFlow(provider))?;

        let mut headers = Vec::new();
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
        ];
        match capabilities.grant {
            GrantShape::RefreshTokenBasicAuth => {
                let encoded = BASE64.encode(format!(
                    "{}:{}",
                    self.spotify.client_id, self.spotify.client_secret
                ));
                headers.push(("Authorization".to_string(), format!("Basic {encoded}")));
            }
            GrantShape::RefreshTokenClientFields => {
                form.push(("client_id".to_string(), self.google.client_id.clone()));
                form.push(("client_secret".to_string(), self.google.client_secret.clone()));
            }
            GrantShape::LocalDeveloperToken => {
                return Err(ProviderError::NoAuthorizationFlow(provider));
            }
        }

        let response = self.gateway.post_form(endpoint, &headers, &form).await?;
        if !response.is_success() {
            tracing::warn!(
                %provider,
                status = response.status,
                body = %response.body,
                "authorization code exchange rejected"
            );
            return Err(ProviderError::RefreshFailed(provider));
        }

        let exchanged: CodeExchangeResponse = response.json()?;
        Ok(TokenSet {
            access_token: exchanged.access_token,
            refresh_token: exchanged.refresh_token,
            token_expiry: chrono::Utc::now().timestamp()
                + exchanged.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            scopes: exchanged.scope.unwrap_or_default(),
        })
    }
}

fn authorize_url(endpoint: &str, params: &[(&str, &str)]) -> Result<String, ProviderError> {
    let url = Url::parse_with_params(endpoint, params)
        .map_err(|err| ProviderError::MalformedResponse(format!("bad authorize url: {err}")))?;
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::http::{MockHttpGateway, WireResponse};
    use crate::test_utils::test_db;

    fn credentials(id: &str) -> ProviderCredentials {
        ProviderCredentials {
            client_id: id.to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn tokens() -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_expiry: 2_000_000_000,
            scopes: String::new(),
        }
    }

    async fn service(
        gateway: MockHttpGateway,
        apple: Option<Arc<dyn DeveloperTokenProvider>>,
    ) -> (AccountService<MockHttpGateway>, Arc<LinkedAccountStore>) {
        let db = test_db().await;
        let store = Arc::new(LinkedAccountStore::new(db.clone()));
        let states = Arc::new(OauthStateStore::new(db));
        let service = AccountService::new(
            store.clone(),
            states,
            Arc::new(gateway),
            credentials("spotify-client"),
            credentials("google-client"),
            apple,
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_link_and_is_linked() {
        let (service, _) = service(MockHttpGateway::new(), None).await;

        assert!(!service.is_linked("u1", Provider::Spotify).await.unwrap());
        service.link("u1", Provider::Spotify, tokens()).await.unwrap();
        assert!(service.is_linked("u1", Provider::Spotify).await.unwrap());
    }

    #[tokio::test]
    async fn test_linking_youtube_also_links_google() {
        let (service, _) = service(MockHttpGateway::new(), None).await;

        service
            .link("u1", Provider::YoutubeMusic, tokens())
            .await
            .unwrap();

        assert!(service.is_linked("u1", Provider::YoutubeMusic).await.unwrap());
        assert!(service.is_linked("u1", Provider::Google).await.unwrap());

        let mut linked = service.linked_providers("u1").await.unwrap();
        linked.sort_by_key(|provider| provider.as_str());
        assert_eq!(linked, vec![Provider::Google, Provider::YoutubeMusic]);
    }

    #[tokio::test]
    async fn test_unlinking_google_also_unlinks_youtube() {
        let (service, _) = service(MockHttpGateway::new(), None).await;

        service
            .link("u1", Provider::YoutubeMusic, tokens())
            .await
            .unwrap();
        assert!(service.unlink("u1", Provider::Google).await.unwrap());

        assert!(!service.is_linked("u1", Provider::YoutubeMusic).await.unwrap());
        assert!(!service.is_linked("u1", Provider::Google).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlink_reports_nothing_removed() {
        let (service, _) = service(MockHttpGateway::new(), None).await;
        assert!(!service.unlink("u1", Provider::Spotify).await.unwrap());
    }

    #[tokio::test]
    async fn test_begin_link_builds_consent_url() {
        let (service, _) = service(MockHttpGateway::new(), None).await;

        let request = service
            .begin_link("u1", Provider::Spotify, "https://app.example/callback")
            .await
            .unwrap();

        assert!(request.url.starts_with(SPOTIFY_AUTHORIZE_URL));
        assert!(request.url.contains("client_id=spotify-client"));
        assert!(request.url.contains(&format!("state={}", request.state)));
        assert!(request.url.contains("response_type=code"));
    }

    #[tokio::test]
    async fn test_begin_link_rejects_apple() {
        let (service, _) = service(MockHttpGateway::new(), None).await;

        let err = service
            .begin_link("u1", Provider::AppleMusic, "https://app.example/callback")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::NoAuthorizationFlow(Provider::AppleMusic)
        ));
    }

    #[tokio::test]
    async fn test_complete_link_exchanges_code_and_links_pair() {
        let mut gateway = MockHttpGateway::new();
        gateway
            .expect_post_form()
            .withf(|url, _, form| {
                url == crate::provider::GOOGLE_TOKEN_URL
                    && form.contains(&("grant_type".to_string(), "authorization_code".to_string()))
                    && form.contains(&("code".to_string(), "auth-code".to_string()))
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(WireResponse {
                    status: 200,
                    retry_after: None,
                    body: r#"{"access_token":"g-access","expires_in":3600,"refresh_token":"g-refresh","scope":"youtube.readonly"}"#.to_string(),
                })
            });

        let (service, store) = service(gateway, None).await;
        let request = service
            .begin_link("u1", Provider::YoutubeMusic, "https://app.example/callback")
            .await
            .unwrap();

        let (user_id, provider) = service
            .complete_link(&request.state, "auth-code", "https://app.example/callback")
            .await
            .unwrap();
        assert_eq!(user_id, "u1");
        assert_eq!(provider, Provider::YoutubeMusic);

        let youtube = store.get("u1", Provider::YoutubeMusic).await.unwrap().unwrap();
        let google = store.get("u1", Provider::Google).await.unwrap().unwrap();
        assert_eq!(youtube.access_token, "g-access");
        assert_eq!(google.access_token, "g-access");
        assert_eq!(youtube.refresh_token.as_deref(), Some("g-refresh"));
        assert_eq!(youtube.scopes, "youtube.readonly");
    }

    #[tokio::test]
    async fn test_complete_link_with_unknown_state_is_stale() {
        let (service, _) = service(MockHttpGateway::new(), None).await;

        let err = service
            .complete_link("bogus", "code", "https://app.example/callback")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::StaleLinkState));
    }

    #[tokio::test]
    async fn test_rejected_code_exchange_does_not_link() {
        let mut gateway = MockHttpGateway::new();
        gateway.expect_post_form().times(1).returning(|_, _, _| {
            Ok(WireResponse {
                status: 400,
                retry_after: None,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            })
        });

        let (service, _) = service(gateway, None).await;
        let request = service
            .begin_link("u1", Provider::Spotify, "https://app.example/callback")
            .await
            .unwrap();

        let err = service
            .complete_link(&request.state, "bad-code", "https://app.example/callback")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RefreshFailed(Provider::Spotify)));
        assert!(!service.is_linked("u1", Provider::Spotify).await.unwrap());
    }

    #[tokio::test]
    async fn test_link_apple_stores_developer_token() {
        let expiry = chrono::Utc::now().timestamp() + 86_400;
        let mut apple = crate::ports::apple::MockDeveloperTokenProvider::new();
        apple
            .expect_developer_token()
            .returning(move || Ok(("dev-jwt".to_string(), expiry)));

        let (service, store) = service(MockHttpGateway::new(), Some(Arc::new(apple))).await;
        assert_eq!(service.apple_developer_token().unwrap(), "dev-jwt");

        service.link_apple("u1").await.unwrap();
        let account = store.get("u1", Provider::AppleMusic).await.unwrap().unwrap();
        assert_eq!(account.access_token, "dev-jwt");
        assert_eq!(account.token_expiry, expiry);
        assert!(account.refresh_token.is_none());
    }
}
