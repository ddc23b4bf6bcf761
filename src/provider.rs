use std::fmt;

/// External services a user can link to their internal identity.
///
/// `YoutubeMusic` and `Google` share one underlying Google OAuth grant: the
/// two rows are created, refreshed, and deleted together (see [`Provider::paired`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Spotify,
    AppleMusic,
    YoutubeMusic,
    Google,
}

/// How a provider exchanges a long-lived credential for a fresh access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantShape {
    /// `grant_type=refresh_token` with the client id/secret in a Basic
    /// Authorization header (Spotify).
    RefreshTokenBasicAuth,
    /// `grant_type=refresh_token` with the client id/secret as form fields
    /// (Google family).
    RefreshTokenClientFields,
    /// No remote exchange: the token is minted locally with its own expiry
    /// (Apple developer token).
    LocalDeveloperToken,
}

/// Static per-provider token plumbing. Not persisted.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    pub token_endpoint: Option<&'static str>,
    pub grant: GrantShape,
    pub has_refresh_token: bool,
}

pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Spotify => "spotify",
            Provider::AppleMusic => "apple_music",
            Provider::YoutubeMusic => "youtube_music",
            Provider::Google => "google",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "spotify" => Some(Provider::Spotify),
            "apple_music" => Some(Provider::AppleMusic),
            "youtube_music" => Some(Provider::YoutubeMusic),
            "google" => Some(Provider::Google),
            _ => None,
        }
    }

    /// The provider sharing the same OAuth grant, if any. Linking, token
    /// refresh, and unlinking must keep both rows of a pair in step.
    pub fn paired(&self) -> Option<Provider> {
        match self {
            Provider::YoutubeMusic => Some(Provider::Google),
            Provider::Google => Some(Provider::YoutubeMusic),
            _ => None,
        }
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        match self {
            Provider::Spotify => ProviderCapabilities {
                token_endpoint: Some(SPOTIFY_TOKEN_URL),
                grant: GrantShape::RefreshTokenBasicAuth,
                has_refresh_token: true,
            },
            Provider::AppleMusic => ProviderCapabilities {
                token_endpoint: None,
                grant: GrantShape::LocalDeveloperToken,
                has_refresh_token: false,
            },
            Provider::YoutubeMusic | Provider::Google => ProviderCapabilities {
                token_endpoint: Some(GOOGLE_TOKEN_URL),
                grant: GrantShape::RefreshTokenClientFields,
                has_refresh_token: true,
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
