//! services/client/src/engine/prefetch.rs
//!
//! Background image loads for the cards just ahead of the current one.

use personalization_core::{DeckCard, ImageLoader};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PREFETCH_WINDOW: usize = 2;

pub struct MediaPrefetcher {
    loader: Arc<dyn ImageLoader>,
    window: usize,
    /// Deck indices already handed to the loader.
    requested: HashSet<usize>,
}

impl MediaPrefetcher {
    pub fn new(loader: Arc<dyn ImageLoader>, window: usize) -> Self {
        Self {
            loader,
            window,
            requested: HashSet::new(),
        }
    }

    /// Requests images for `current + 1 ..= current + window`.
    ///
    /// Each index is requested at most once. Loads already in flight keep running
    /// when the window moves past them. Returns the URLs issued by this call.
    pub fn on_index_change(&mut self, deck: &[DeckCard], current: usize) -> Vec<String> {
        let mut issued = Vec::new();
        let end = current.saturating_add(self.window).min(deck.len().saturating_sub(1));

        for index in current + 1..=end {
            if !self.requested.insert(index) {
                continue;
            }
            let Some(url) = deck[index].hero_image_url.clone() else {
                continue;
            };

            let loader = self.loader.clone();
            let task_url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = loader.load(&task_url).await {
                    debug!(url = %task_url, "Image prefetch failed: {}", e);
                }
            });
            issued.push(url);
        }

        issued
    }

    /// Forgets what was requested, for a freshly loaded deck.
    pub fn reset(&mut self) {
        self.requested.clear();
    }
}
