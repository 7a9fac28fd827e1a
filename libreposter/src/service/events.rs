//! In-process event bus
//!
//! Every pipeline component reports what it did here in addition to its
//! `tracing` output. Subscribers (tests, a future status endpoint) receive
//! events through `tokio::sync::broadcast`; with no subscriber, events are
//! dropped immediately.
//!
//! # Example
//!
//! ```
//! use libreposter::service::events::{BotEvent, EventBus};
//!
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(BotEvent::CacheCleared { evicted: 12 });
//! assert!(matches!(receiver.try_recv(), Ok(BotEvent::CacheCleared { evicted: 12 })));
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<BotEvent>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BotEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; lagging subscribers lose the
    /// oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: BotEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    /// A fetch cycle committed its batch
    FetchCompleted {
        fetched: usize,
        enqueued: usize,
        dropped: usize,
        rejected: usize,
    },

    /// A fetch cycle aborted before committing anything
    FetchFailed { error: String },

    /// One dequeued submission was handled
    ItemProcessed {
        submission_id: String,
        #[serde(flatten)]
        outcome: crate::types::UploadOutcome,
    },

    /// An upload cycle finished
    UploadCompleted {
        uploaded: usize,
        ignored: usize,
        failed: usize,
    },

    CacheCleared { evicted: usize },

    UserFollowed { user_pk: u64, username: String },

    /// The follower hit an error and is pausing
    FollowerCooldown { error: String },

    /// A liker job ran to completion
    LikerFinished {
        username: String,
        fetched: usize,
        liked: usize,
        aborted: bool,
    },

    /// A liker job was dropped because the backlog was full
    LikerJobDropped { username: String },
}
