//! Background population of the feed cache after a miss.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::FeedCache;

/// Spawns cache writes that outlive the request that triggered them, with at
/// most one outstanding write per user.
#[derive(Clone)]
pub struct CachePopulator {
    cache: Arc<dyn FeedCache>,
    in_flight: Arc<DashMap<String, ()>>,
}

/// Marks a population as outstanding until dropped.
pub(crate) struct PopulateGuard {
    user_id: String,
    in_flight: Arc<DashMap<String, ()>>,
}

impl Drop for PopulateGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.user_id);
    }
}

impl CachePopulator {
    pub fn new(cache: Arc<dyn FeedCache>) -> Self {
        Self {
            cache,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Claim the population slot for `user_id`; `None` while another holds it.
    pub(crate) fn acquire(&self, user_id: &str) -> Option<PopulateGuard> {
        match self.in_flight.entry(user_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(PopulateGuard {
                    user_id: user_id.to_string(),
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
            Entry::Occupied(_) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Write `post_ids` as the cached first page of `user_id` on a detached
    /// task. Returns `None` when a population for the user is already running.
    pub fn spawn(&self, user_id: String, post_ids: Vec<i64>) -> Option<JoinHandle<()>> {
        let Some(guard) = self.acquire(&user_id) else {
            debug!(
                target = "fanfeed::cache::populate",
                user_id = %user_id,
                "population already in flight"
            );
            return None;
        };
        let cache = Arc::clone(&self.cache);

        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = cache.set_feed(&user_id, post_ids).await {
                warn!(
                    target = "fanfeed::cache::populate",
                    user_id = %user_id,
                    error = %err,
                    "failed to populate feed cache"
                );
            }
        }))
    }
}
