//! Container-level visibility notifications
//!
//! Some hosts report visibility for a whole container rather than per page.
//! Pages subscribe by tag and receive a copy of every notification until
//! they unsubscribe.

use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::page::LifecycleEvent;

/// Visibility change of a whole container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerVisibility {
    /// Container is visible again
    Resumed,
    /// Container went to the background
    Paused,
}

impl From<ContainerVisibility> for LifecycleEvent {
    fn from(visibility: ContainerVisibility) -> Self {
        match visibility {
            ContainerVisibility::Resumed => LifecycleEvent::BecameActive,
            ContainerVisibility::Paused => LifecycleEvent::BecameInactive,
        }
    }
}

/// Fan-out of [`ContainerVisibility`] to subscribed pages
#[derive(Debug, Default)]
pub struct VisibilityBroadcast {
    subscribers: Mutex<HashMap<String, UnboundedSender<ContainerVisibility>, RandomState>>,
}

impl VisibilityBroadcast {
    /// Create a broadcast with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `tag`, replacing any earlier subscription for it
    pub fn subscribe(&self, tag: &str) -> UnboundedReceiver<ContainerVisibility> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(tag.to_string(), tx);
        rx
    }

    /// Drop the subscription for `tag`; its receiver then sees the end of
    /// the stream
    pub fn unsubscribe(&self, tag: &str) -> bool {
        self.subscribers.lock().remove(tag).is_some()
    }

    /// Send `visibility` to every subscriber, returning how many got it
    pub fn publish(&self, visibility: ContainerVisibility) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tag, tx| {
            let delivered = tx.send(visibility).is_ok();
            if !delivered {
                trace!("Dropping closed visibility subscriber '{}'", tag);
            }
            delivered
        });
        subscribers.len()
    }

    /// Whether `tag` is subscribed
    pub fn is_subscribed(&self, tag: &str) -> bool {
        self.subscribers.lock().contains_key(tag)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
