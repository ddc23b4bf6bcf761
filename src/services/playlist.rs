use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::DurationCache;
use crate::error::ProviderError;
use crate::ports::http::HttpGateway;
use crate::provider::Provider;
use crate::services::executor::{Fetched, RequestAuth, RequestExecutor};
use crate::utils;

const SPOTIFY_API: &str = "https://api.spotify.com/v1";
const YOUTUBE_API: &str = "https://www.googleapis.com/youtube/v3";
const APPLE_API: &str = "https://api.music.apple.com/v1";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const PAGE_SIZE: u64 = 50;

/// Safety cap on pagination: a provider that keeps handing out next pages
/// past this is treated as pathological rather than followed forever.
pub const MAX_PAGES: u32 = 200;

/// Wall-clock budget for one aggregation, separate from per-call HTTP
/// timeouts.
pub const AGGREGATION_DEADLINE: Duration = Duration::from_secs(30);

/// Per-track detail collected while aggregating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub duration_ms: u64,
}

/// The aggregate handed to callers. Cache hits omit `tracks`; only the
/// totals are kept for the TTL window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistAggregate {
    pub playlist_id: String,
    pub provider: Provider,
    pub total_duration_ms: u64,
    pub formatted_duration: String,
    pub track_count: u64,
    pub tracks: Option<Vec<TrackInfo>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub track_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Default)]
struct TrackAccumulation {
    tracks: Vec<TrackInfo>,
    track_count: u64,
    total_duration_ms: u64,
}

/// Pages through provider playlist APIs, accumulating track durations and
/// writing totals through the duration cache. `Provider::Google` rows carry
/// the same grant as YouTube Music and are served by the YouTube API.
pub struct PlaylistService<G> {
    executor: Arc<RequestExecutor<G>>,
    cache: Arc<DurationCache>,
    page_cap: u32,
    deadline: Duration,
}

impl<G: HttpGateway> PlaylistService<G> {
    pub fn new(executor: Arc<RequestExecutor<G>>, cache: Arc<DurationCache>) -> Self {
        Self {
            executor,
            cache,
            page_cap: MAX_PAGES,
            deadline: AGGREGATION_DEADLINE,
        }
    }

    #[cfg(test)]
    fn with_limits(
        executor: Arc<RequestExecutor<G>>,
        cache: Arc<DurationCache>,
        page_cap: u32,
        deadline: Duration,
    ) -> Self {
        Self {
            executor,
            cache,
            page_cap,
            deadline,
        }
    }

    /// Total duration and track count for a user's playlist. Served from the
    /// cache when fresh; a nonexistent playlist yields an empty aggregate.
    pub async fn aggregate(
        &self,
        user_id: &str,
        provider: Provider,
        playlist_id: &str,
    ) -> Result<PlaylistAggregate, ProviderError> {
        let auth = RequestAuth::User { user_id, provider };
        self.aggregate_with(auth, provider, playlist_id).await
    }

    /// Aggregate a public Spotify playlist without a linked account, using
    /// the client-credentials token.
    pub async fn aggregate_public_spotify(
        &self,
        playlist_id: &str,
    ) -> Result<PlaylistAggregate, ProviderError> {
        self.aggregate_with(RequestAuth::ClientCredentials, Provider::Spotify, playlist_id)
            .await
    }

    async fn aggregate_with(
        &self,
        auth: RequestAuth<'_>,
        provider: Provider,
        playlist_id: &str,
    ) -> Result<PlaylistAggregate, ProviderError> {
        if let Some(cached) = self.cache.get(playlist_id).await {
            tracing::debug!(playlist_id, "serving aggregate from cache");
            return Ok(cached);
        }

        let deadline = tokio::time::Instant::now() + self.deadline;
        let accumulated = match provider {
            Provider::Spotify => self.spotify_tracks(auth, playlist_id, deadline).await?,
            Provider::YoutubeMusic | Provider::Google => {
                self.youtube_tracks(auth, playlist_id, deadline).await?
            }
            Provider::AppleMusic => self.apple_tracks(auth, playlist_id, deadline).await?,
        };

        let Some(accumulated) = accumulated else {
            // Playlist does not exist: empty aggregate, deliberately not
            // cached so a later-created playlist is seen promptly.
            return Ok(empty_aggregate(provider, playlist_id));
        };

        let aggregate = PlaylistAggregate {
            playlist_id: playlist_id.to_string(),
            provider,
            total_duration_ms: accumulated.total_duration_ms,
            formatted_duration: utils::ms_to_formatted_duration(accumulated.total_duration_ms),
            track_count: accumulated.track_count,
            tracks: Some(accumulated.tracks),
        };

        let mut cached = aggregate.clone();
        cached.tracks = None;
        self.cache.put(playlist_id, cached).await;

        Ok(aggregate)
    }

    /// The user's playlists on a provider, as lightweight summaries.
    pub async fn list_playlists(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Vec<PlaylistSummary>, ProviderError> {
        let auth = RequestAuth::User { user_id, provider };
        let deadline = tokio::time::Instant::now() + self.deadline;
        match provider {
            Provider::Spotify => self.spotify_playlists(auth, deadline).await,
            Provider::YoutubeMusic | Provider::Google => {
                self.youtube_playlists(auth, deadline).await
            }
            Provider::AppleMusic => self.apple_playlists(auth, deadline).await,
        }
    }

    /// The provider-side profile of the linked account. `None` when the
    /// provider reports no such resource.
    pub async fn fetch_profile(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<UserProfile>, ProviderError> {
        let auth = RequestAuth::User { user_id, provider };
        let fetched = match provider {
            Provider::Spotify => {
                self.executor
                    .get_json(auth, &format!("{SPOTIFY_API}/me"), &[])
                    .await?
            }
            Provider::YoutubeMusic | Provider::Google => {
                self.executor.get_json(auth, GOOGLE_USERINFO_URL, &[]).await?
            }
            Provider::AppleMusic => {
                self.executor
                    .get_json(auth, &format!("{APPLE_API}/me/storefront"), &[])
                    .await?
            }
        };

        let Fetched::Ok(value) = fetched else {
            return Ok(None);
        };

        let profile = match provider {
            Provider::Spotify => UserProfile {
                id: required_str(&value, "id")?,
                display_name: value["display_name"].as_str().map(str::to_string),
            },
            Provider::YoutubeMusic | Provider::Google => UserProfile {
                id: required_str(&value, "id")?,
                display_name: value["name"].as_str().map(str::to_string),
            },
            Provider::AppleMusic => {
                let storefront = value["data"][0]["id"].as_str().ok_or_else(|| {
                    ProviderError::MalformedResponse("storefront response missing data id".into())
                })?;
                UserProfile {
                    id: storefront.to_string(),
                    display_name: None,
                }
            }
        };
        Ok(Some(profile))
    }

    async fn spotify_tracks(
        &self,
        auth: RequestAuth<'_>,
        playlist_id: &str,
        deadline: tokio::time::Instant,
    ) -> Result<Option<TrackAccumulation>, ProviderError> {
        let url = format!("{SPOTIFY_API}/playlists/{playlist_id}/tracks");
        let mut accumulated = TrackAccumulation::default();
        let mut offset = 0u64;
        let mut pages = 0u32;

        loop {
            self.check_budget(pages, deadline)?;
            let params = vec![
                ("limit".to_string(), PAGE_SIZE.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            let value = match self.executor.get_json(auth, &url, &params).await? {
                Fetched::Ok(value) => value,
                Fetched::NotFound if pages == 0 => return Ok(None),
                Fetched::NotFound => break,
            };

            let items = value["items"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("tracks response missing items".into())
            })?;
            for item in items {
                accumulated.track_count += 1;
                let track = &item["track"];
                // Local files and removed tracks have no usable duration;
                // they count as zero-length.
                let duration_ms = track["duration_ms"].as_u64().unwrap_or(0);
                accumulated.total_duration_ms += duration_ms;
                if let Some(id) = track["id"].as_str() {
                    accumulated.tracks.push(TrackInfo {
                        id: id.to_string(),
                        title: track["name"].as_str().unwrap_or_default().to_string(),
                        duration_ms,
                    });
                }
            }

            pages += 1;
            offset += items.len() as u64;
            if items.is_empty() || value["next"].is_null() {
                break;
            }
        }

        Ok(Some(accumulated))
    }

    async fn youtube_tracks(
        &self,
        auth: RequestAuth<'_>,
        playlist_id: &str,
        deadline: tokio::time::Instant,
    ) -> Result<Option<TrackAccumulation>, ProviderError> {
        // Two phases: playlistItems yields video ids, videos yields the
        // ISO 8601 durations.
        let items_url = format!("{YOUTUBE_API}/playlistItems");
        let mut video_ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            self.check_budget(pages, deadline)?;
            let mut params = vec![
                ("part".to_string(), "contentDetails".to_string()),
                ("playlistId".to_string(), playlist_id.to_string()),
                ("maxResults".to_string(), PAGE_SIZE.to_string()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }

            let value = match self.executor.get_json(auth, &items_url, &params).await? {
                Fetched::Ok(value) => value,
                Fetched::NotFound if pages == 0 => return Ok(None),
                Fetched::NotFound => break,
            };

            let items = value["items"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("playlistItems response missing items".into())
            })?;
            for item in items {
                if let Some(id) = item["contentDetails"]["videoId"].as_str() {
                    video_ids.push(id.to_string());
                }
            }

            pages += 1;
            match value["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }

        let mut accumulated = TrackAccumulation::default();
        let videos_url = format!("{YOUTUBE_API}/videos");
        for chunk in video_ids.chunks(PAGE_SIZE as usize) {
            self.check_budget(pages, deadline)?;
            let params = vec![
                ("part".to_string(), "snippet,contentDetails".to_string()),
                ("id".to_string(), chunk.join(",")),
            ];
            let value = match self.executor.get_json(auth, &videos_url, &params).await? {
                Fetched::Ok(value) => value,
                Fetched::NotFound => continue,
            };
            pages += 1;

            let items = value["items"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("videos response missing items".into())
            })?;
            for item in items {
                accumulated.track_count += 1;
                let duration_ms = item["contentDetails"]["duration"]
                    .as_str()
                    .and_then(|iso| utils::iso8601_duration_to_ms(iso).ok())
                    .unwrap_or(0);
                accumulated.total_duration_ms += duration_ms;
                if let Some(id) = item["id"].as_str() {
                    accumulated.tracks.push(TrackInfo {
                        id: id.to_string(),
                        title: item["snippet"]["title"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        duration_ms,
                    });
                }
            }
        }

        Ok(Some(accumulated))
    }

    async fn apple_tracks(
        &self,
        auth: RequestAuth<'_>,
        playlist_id: &str,
        deadline: tokio::time::Instant,
    ) -> Result<Option<TrackAccumulation>, ProviderError> {
        let url = format!("{APPLE_API}/me/library/playlists/{playlist_id}/tracks");
        let mut accumulated = TrackAccumulation::default();
        let mut offset = 0u64;
        let mut pages = 0u32;

        loop {
            self.check_budget(pages, deadline)?;
            let params = vec![
                ("limit".to_string(), PAGE_SIZE.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            let value = match self.executor.get_json(auth, &url, &params).await? {
                Fetched::Ok(value) => value,
                Fetched::NotFound if pages == 0 => return Ok(None),
                Fetched::NotFound => break,
            };

            let data = value["data"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("library tracks response missing data".into())
            })?;
            for item in data {
                accumulated.track_count += 1;
                let duration_ms = item["attributes"]["durationInMillis"].as_u64().unwrap_or(0);
                accumulated.total_duration_ms += duration_ms;
                if let Some(id) = item["id"].as_str() {
                    accumulated.tracks.push(TrackInfo {
                        id: id.to_string(),
                        title: item["attributes"]["name"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        duration_ms,
                    });
                }
            }

            pages += 1;
            offset += data.len() as u64;
            if data.is_empty() || value["next"].is_null() {
                break;
            }
        }

        Ok(Some(accumulated))
    }

    async fn spotify_playlists(
        &self,
        auth: RequestAuth<'_>,
        deadline: tokio::time::Instant,
    ) -> Result<Vec<PlaylistSummary>, ProviderError> {
        let url = format!("{SPOTIFY_API}/me/playlists");
        let mut summaries = Vec::new();
        let mut offset = 0u64;
        let mut pages = 0u32;

        loop {
            self.check_budget(pages, deadline)?;
            let params = vec![
                ("limit".to_string(), PAGE_SIZE.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            let value = self
                .executor
                .get_json(auth, &url, &params)
                .await?
                .required()?;

            let items = value["items"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("playlists response missing items".into())
            })?;
            for item in items {
                let Some(id) = item["id"].as_str() else {
                    continue;
                };
                summaries.push(PlaylistSummary {
                    id: id.to_string(),
                    name: item["name"].as_str().unwrap_or_default().to_string(),
                    track_count: item["tracks"]["total"].as_u64(),
                });
            }

            pages += 1;
            offset += items.len() as u64;
            if items.is_empty() || value["next"].is_null() {
                break;
            }
        }

        Ok(summaries)
    }

    async fn youtube_playlists(
        &self,
        auth: RequestAuth<'_>,
        deadline: tokio::time::Instant,
    ) -> Result<Vec<PlaylistSummary>, ProviderError> {
        let url = format!("{YOUTUBE_API}/playlists");
        let mut summaries = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            self.check_budget(pages, deadline)?;
            let mut params = vec![
                ("part".to_string(), "snippet,contentDetails".to_string()),
                ("mine".to_string(), "true".to_string()),
                ("maxResults".to_string(), PAGE_SIZE.to_string()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }

            let value = self
                .executor
                .get_json(auth, &url, &params)
                .await?
                .required()?;

            let items = value["items"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("playlists response missing items".into())
            })?;
            for item in items {
                let Some(id) = item["id"].as_str() else {
                    continue;
                };
                summaries.push(PlaylistSummary {
                    id: id.to_string(),
                    name: item["snippet"]["title"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    track_count: item["contentDetails"]["itemCount"].as_u64(),
                });
            }

            pages += 1;
            match value["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(summaries)
    }

    async fn apple_playlists(
        &self,
        auth: RequestAuth<'_>,
        deadline: tokio::time::Instant,
    ) -> Result<Vec<PlaylistSummary>, ProviderError> {
        let url = format!("{APPLE_API}/me/library/playlists");
        let mut summaries = Vec::new();
        let mut offset = 0u64;
        let mut pages = 0u32;

        loop {
            self.check_budget(pages, deadline)?;
            let params = vec![
                ("limit".to_string(), PAGE_SIZE.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            let value = self
                .executor
                .get_json(auth, &url, &params)
                .await?
                .required()?;

            let data = value["data"].as_array().ok_or_else(|| {
                ProviderError::MalformedResponse("library playlists response missing data".into())
            })?;
            for item in data {
                let Some(id) = item["id"].as_str() else {
                    continue;
                };
                summaries.push(PlaylistSummary {
                    id: id.to_string(),
                    name: item["attributes"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    track_count: None,
                });
            }

            pages += 1;
            offset += data.len() as u64;
            if data.is_empty() || value["next"].is_null() {
                break;
            }
        }

        Ok(summaries)
    }

    fn check_budget(
        &self,
        pages: u32,
        deadline: tokio::time::Instant,
    ) -> Result<(), ProviderError> {
        if pages >= self.page_cap {
            tracing::warn!(pages, "pagination safety cap reached");
            return Err(ProviderError::MalformedResponse(
                "provider pagination did not terminate".into(),
            ));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ProviderError::DeadlineExceeded);
        }
        Ok(())
    }
}

fn empty_aggregate(provider: Provider, playlist_id: &str) -> PlaylistAggregate {
    PlaylistAggregate {
        playlist_id: playlist_id.to_string(),
        provider,
        total_duration_ms: 0,
        formatted_duration: utils::ms_to_formatted_duration(0),
        track_count: 0,
        tracks: Some(Vec::new()),
    }
}

fn required_str(value: &Value, key: &str) -> Result<String, ProviderError> {
    value[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MalformedResponse(format!("profile missing {key}")))
}
