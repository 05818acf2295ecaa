use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use futures::future::BoxFuture;
use herocast_core::models::Channel;
use thiserror::Error;

pub const CHANNEL_CACHE_CAPACITY: usize = 100;

/// Map with a fixed capacity that evicts the oldest inserted key first.
///
/// Overwriting an existing key keeps its original insertion position.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Inserts `value`, returning the entry evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    pub fn evict(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|candidate| candidate != key);
        Some(value)
    }

    pub fn evict_oldest(&mut self) -> Option<(K, V)> {
        while let Some(key) = self.order.pop_front() {
            if let Some(value) = self.entries.remove(&key) {
                return Some((key, value));
            }
        }
        None
    }
}

#[derive(Error, Debug)]
pub enum ChannelLookupError {
    #[error("channel lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("channel lookup returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Backing store consulted on cache misses.
pub trait ChannelSource: Send + Sync {
    fn find_by_url<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Option<Channel>, ChannelLookupError>>;
}

/// Reads channels from the Supabase REST API with the anon key.
pub struct SupabaseChannelSource {
    client: reqwest::Client,
    rest_url: String,
    anon_key: String,
}

impl SupabaseChannelSource {
    pub fn new(
        client: reqwest::Client,
        supabase_url: &str,
        anon_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            rest_url: format!("{}/rest/v1/channel", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.into(),
        }
    }
}

impl ChannelSource for SupabaseChannelSource {
    fn find_by_url<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Option<Channel>, ChannelLookupError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.rest_url)
                .query(&[("url", format!("eq.{url}")), ("select", "*".to_string())])
                .header("apikey", self.anon_key.as_str())
                .bearer_auth(&self.anon_key)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ChannelLookupError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let rows: Vec<Channel> = response.json().await?;
            Ok(rows.into_iter().next())
        })
    }
}

/// Long-lived channel resolver: cache first, then the source. Only hits are cached.
pub struct ChannelDirectory<S> {
    source: S,
    cache: Mutex<BoundedCache<String, Channel>>,
}

impl<S: ChannelSource> ChannelDirectory<S> {
    pub fn new(source: S) -> Self {
        Self::with_capacity(source, CHANNEL_CACHE_CAPACITY)
    }

    pub fn with_capacity(source: S, capacity: usize) -> Self {
        Self {
            source,
            cache: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    pub fn cached(&self, url: &str) -> Option<Channel> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&url.to_string())
            .cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn forget(&self, url: &str) -> Option<Channel> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evict(&url.to_string())
    }

    pub async fn lookup(&self, url: &str) -> Result<Option<Channel>, ChannelLookupError> {
        if url.is_empty() {
            return Ok(None);
        }
        if let Some(channel) = self.cached(url) {
            tracing::debug!(event = "channel_cache_hit", url, "resolved channel from cache");
            return Ok(Some(channel));
        }

        let Some(channel) = self.source.find_by_url(url).await? else {
            tracing::debug!(event = "channel_not_found", url, "no channel row for url");
            return Ok(None);
        };

        let evicted = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(url.to_string(), channel.clone());
        if let Some((evicted_url, _)) = evicted {
            tracing::debug!(
                event = "channel_cache_evicted",
                url = %evicted_url,
                "evicted oldest cached channel"
            );
        }
        Ok(Some(channel))
    }
}
