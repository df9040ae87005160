//! Event bus for publish progress
//!
//! Built on `tokio::sync::broadcast`: any number of subscribers, and emitting
//! never blocks. With no subscribers, events are dropped on the spot; a
//! lagging subscriber loses the oldest events first.
//!
//! # Example
//!
//! ```
//! use libomnicast::service::events::{Event, EventBus};
//! use libomnicast::PostStatus;
//!
//! # async fn example() {
//! let bus = EventBus::new(16);
//! let mut progress = bus.subscribe();
//!
//! bus.emit(Event::PublishFinished {
//!     post_id: "post-7".to_string(),
//!     status: PostStatus::Partial,
//! });
//!
//! while let Ok(event) = progress.recv().await {
//!     if let Event::PublishFinished { post_id, status } = event {
//!         println!("{} finished as {}", post_id, status);
//!         break;
//!     }
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::publisher::PublishTrigger;
use crate::types::{Platform, PostStatus};

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging kicks in
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Progress of publish runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The run won the status transition and is fanning out
    PublishStarted {
        post_id: String,
        trigger: PublishTrigger,
        accounts: usize,
    },

    AccountPublished {
        post_id: String,
        account_id: String,
        platform: Platform,
        platform_post_id: String,
        platform_post_url: Option<String>,
    },

    AccountFailed {
        post_id: String,
        account_id: String,
        platform: Platform,
        code: String,
        message: String,
        retryable: bool,
    },

    PublishFinished {
        post_id: String,
        status: PostStatus,
    },

    /// Another run owns the post or it is not in a publishable state
    PublishSkipped {
        post_id: String,
        status: PostStatus,
    },
}

impl Event {
    pub fn post_id(&self) -> &str {
        match self {
            Event::PublishStarted { post_id, .. }
            | Event::AccountPublished { post_id, .. }
            | Event::AccountFailed { post_id, .. }
            | Event::PublishFinished { post_id, .. }
            | Event::PublishSkipped { post_id, .. } => post_id,
        }
    }
}
