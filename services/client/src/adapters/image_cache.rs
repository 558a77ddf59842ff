//! services/client/src/adapters/image_cache.rs
//!
//! An in-memory HTTP image cache implementing the `ImageLoader` port.
//!
//! The cache holds at most `capacity` images and evicts the least recently used
//! one when full.

use async_trait::async_trait;
use bytes::Bytes;
use personalization_core::ports::{ImageLoader, PortError, PortResult};
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Enough for several decks' worth of hero images.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

#[derive(Default)]
struct ImageCache {
    entries: HashMap<String, Bytes>,
    /// Least recently used first.
    recency: VecDeque<String>,
}

impl ImageCache {
    fn touch(&mut self, url: &str) {
        if let Some(pos) = self.recency.iter().position(|u| u == url) {
            if let Some(entry) = self.recency.remove(pos) {
                self.recency.push_back(entry);
            }
        }
    }

    fn get(&mut self, url: &str) -> Option<Bytes> {
        let hit = self.entries.get(url).cloned()?;
        self.touch(url);
        Some(hit)
    }

    fn insert(&mut self, url: String, body: Bytes, capacity: usize) {
        if self.entries.insert(url.clone(), body).is_some() {
            self.touch(&url);
            return;
        }
        self.recency.push_back(url);
        while self.entries.len() > capacity {
            let Some(evicted) = self.recency.pop_front() else {
                break;
            };
            self.entries.remove(&evicted);
            debug!(url = %evicted, "Image evicted from cache.");
        }
    }
}

/// Downloads images once and keeps their bytes keyed by URL.
#[derive(Clone)]
pub struct HttpImageLoader {
    client: Client,
    capacity: usize,
    cache: Arc<Mutex<ImageCache>>,
}

impl HttpImageLoader {
    pub fn new(timeout: Duration) -> PortResult<Self> {
        Self::with_capacity(timeout, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(timeout: Duration, capacity: usize) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            capacity: capacity.max(1),
            cache: Arc::new(Mutex::new(ImageCache::default())),
        })
    }

    fn cache(&self) -> MutexGuard<'_, ImageCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached(&self, url: &str) -> Option<Bytes> {
        self.cache().get(url)
    }

    pub fn len(&self) -> usize {
        self.cache().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, url: &str, body: Bytes) {
        self.cache().insert(url.to_string(), body, self.capacity);
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, url: &str) -> PortResult<()> {
        if self.cached(url).is_some() {
            return Ok(());
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PortError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Rejected(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| PortError::Network(e.to_string()))?;

        debug!(url, size = body.len(), "Image cached.");
        self.store(url, body);
        Ok(())
    }
}
