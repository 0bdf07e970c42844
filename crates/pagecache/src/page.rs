//! Contracts between the cache and the pages it serves

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Schema;
use crate::record::ScrollPosition;

/// A scrollable content surface owned by a page
pub trait ScrollSurface {
    /// Current scroll anchor
    fn scroll_position(&self) -> ScrollPosition;

    /// Jump to `position`
    fn scroll_to(&self, position: ScrollPosition);
}

/// A view-controller whose state survives recreation
///
/// Methods take `&self`; implementations keep their mutable UI state
/// behind their own synchronization.
pub trait Page: Send + Sync {
    /// Business data the page restores from
    type Data: Serialize + DeserializeOwned + Schema + Send + 'static;

    /// Scrollable surface type
    type Surface: ScrollSurface;

    /// Stable identity of this logical page
    fn tag(&self) -> &str;

    /// Hand previously saved data back to the page
    fn deliver_restored_state(&self, data: Self::Data);

    /// Data to save right now, if any has been loaded
    fn current_snapshot(&self) -> Option<Self::Data>;

    /// The scrollable surface, once its view exists
    fn scrollable_surface(&self) -> Option<&Self::Surface>;

    /// Called when the page resumes after staying hidden longer than its
    /// refresh threshold
    fn on_long_background(&self, elapsed: Duration);

    /// Keep this page's state in the non-evictable tier
    fn keep_in_memory(&self) -> bool {
        false
    }

    /// Keep saved state when the surrounding container finishes
    fn retain_after_finish(&self) -> bool {
        true
    }

    /// Stale-background threshold; `None` uses the cache default
    fn refresh_threshold(&self) -> Option<Duration> {
        None
    }
}

/// Lifecycle notifications driving a [`PageStateHelper`](crate::PageStateHelper)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Page instance created
    Attached,
    /// The page's content view now exists
    SurfaceReady,
    /// Primary-source pause; only the scroll anchor is captured
    Paused,
    /// Page hidden but not destroyed
    BecameInactive,
    /// Page visible again
    BecameActive,
    /// Page instance destroyed
    Detached {
        /// The surrounding container is going away too
        container_finishing: bool,
    },
}
