use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::services::playlist::PlaylistAggregate;

/// How long an aggregated playlist stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    value: PlaylistAggregate,
    expires_at: Instant,
}

/// In-memory read-through cache for playlist aggregates, keyed by playlist
/// id. Entries are evicted lazily on lookup; there is no background sweeper.
pub struct DurationCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl DurationCache {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a fresh entry, purging it first if it has expired.
    pub async fn get(&self, playlist_id: &str) -> Option<PlaylistAggregate> {
        {
            let entries = self.entries.read().await;
            match entries.get(playlist_id) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it under the write lock, re-checking in case a
        // concurrent put replaced it between the two locks.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(playlist_id) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            entries.remove(playlist_id);
        }
        None
    }

    /// Store an aggregate, overwriting any existing entry and restarting
    /// its TTL.
    pub async fn put(&self, playlist_id: &str, value: PlaylistAggregate) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .write()
            .await
            .insert(playlist_id.to_string(), entry);
    }
}

impl Default for DurationCache {
    fn default() -> Self {
        Self::new()
    }
}
