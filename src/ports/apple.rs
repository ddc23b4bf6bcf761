use crate::error::ProviderError;

/// Port trait for the Apple Music developer token. The token is a signed
/// JWT minted out of band; there is no remote exchange, so the provider
/// only hands out whatever capability it was configured with.
#[cfg_attr(test, mockall::automock)]
pub trait DeveloperTokenProvider: Send + Sync {
    /// The current developer token and its absolute expiry (unix seconds).
    fn developer_token(&self) -> Result<(String, i64), ProviderError>;
}

/// Developer token loaded once from config.
pub struct StaticDeveloperToken {
    token: String,
    expiry: i64,
}

impl StaticDeveloperToken {
    pub fn new(token: String, expiry: i64) -> Self {
        Self { token, expiry }
    }
}

impl DeveloperTokenProvider for StaticDeveloperToken {
    fn developer_token(&self) -> Result<(String, i64), ProviderError> {
        if self.expiry <= chrono::Utc::now().timestamp() {
            tracing::warn!("apple developer token is past its expiry");
            return Err(ProviderError::RefreshFailed(
                crate::provider::Provider::AppleMusic,
            ));
        }
        Ok((self.token.clone(), self.expiry))
    }
}
