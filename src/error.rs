use crate::provider::Provider;

/// Normalized error taxonomy crossing into route-handler code. Raw upstream
/// status codes and bodies are preserved in logs only, so callers stay
/// provider-agnostic.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No linked account exists for this (user, provider) pair.
    #[error("no linked {0} account, link it first")]
    NotLinked(Provider),

    /// The token endpoint rejected the refresh grant. Never auto-retried:
    /// a failed refresh usually means the refresh token itself is revoked.
    #[error("{0} token refresh rejected, re-authorization required")]
    RefreshFailed(Provider),

    /// Retry-After was honored up to the bound and the provider kept
    /// answering 429. Transient; the caller may retry the whole operation.
    #[error("rate limited, retries exhausted")]
    RateLimited,

    /// Any non-2xx/401/404/429 upstream response.
    #[error("upstream returned status {status}")]
    UpstreamUnavailable { status: u16 },

    /// The provider answered 2xx with a shape we cannot use.
    #[error("unexpected response shape: {0}")]
    MalformedResponse(String),

    /// An aggregation ran past its wall-clock budget.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The OAuth correlation token is unknown, already consumed, or expired.
    #[error("oauth state token is unknown or expired")]
    StaleLinkState,

    /// Authorization-code operations invoked for a provider that links
    /// through a locally supplied token instead (Apple Music).
    #[error("{0} does not use an authorization-code flow")]
    NoAuthorizationFlow(Provider),

    #[error("http transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}
