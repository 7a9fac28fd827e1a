//! Cache cleaner: drop every seen submission id on a timer

use std::sync::Arc;
use tracing::info;

use crate::service::events::{BotEvent, EventBus};
use crate::state::SharedState;

/// Periodically forgets every seen submission id so the cache stays bounded.
pub struct CacheCleaner {
    state: Arc<SharedState>,
    events: EventBus,
}

impl CacheCleaner {
    pub fn new(state: Arc<SharedState>, events: EventBus) -> Self {
        Self { state, events }
    }

    /// Empty the cache. Queued submissions are left alone.
    pub fn run_cycle(&self) -> usize {
        let evicted = self.state.clear_cache();
        info!(evicted, "Cleared submission cache");
        self.events.emit(BotEvent::CacheCleared { evicted });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::image_submission;

    #[test]
    fn test_clears_cache_but_not_queue() {
        let state = Arc::new(SharedState::default());
        state.commit_batch(vec![
            image_submission("a", "pics", 1),
            image_submission("b", "pics", 2),
        ]);
        let cleaner = CacheCleaner::new(state.clone(), EventBus::default());

        assert_eq!(cleaner.run_cycle(), 2);
        assert_eq!(state.cache_len(), 0);
        assert_eq!(state.queue_len(), 2);
        assert_eq!(cleaner.run_cycle(), 0);
    }
}
