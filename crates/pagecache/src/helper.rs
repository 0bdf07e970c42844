//! Per-page lifecycle orchestration
//!
//! A `PageStateHelper` turns one page's lifecycle events into cache
//! operations: restore on attach, scroll replay once the surface exists,
//! save on hide, stale-background detection on resume and the final
//! save-or-clear on detach.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::broadcast::{ContainerVisibility, VisibilityBroadcast};
use crate::codec::{Codec, JsonCodec};
use crate::error::Result;
use crate::gate::ReplayGate;
use crate::manager::TieredCache;
use crate::page::{LifecycleEvent, Page, ScrollSurface};
use crate::record::{ScrollPosition, StateRecord};

/// Where a helper is in its page's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bound to the tag, restore not yet requested
    Unattached,
    /// Restore in flight
    PendingRestore,
    /// Restore finished, with or without data
    Resolved,
    /// Page destroyed; every further event is ignored
    Detached,
}

/// What gets replayed into the page once its surface exists
struct Replay<D> {
    data: Option<D>,
    scroll: ScrollPosition,
}

struct HelperState<D> {
    phase: Phase,
    gate: ReplayGate<Replay<D>>,
    scroll: ScrollPosition,
    page_index: u32,
    last_hidden: i64,
    restored: bool,
}

/// Binds one page to the cache for its attached lifetime
pub struct PageStateHelper<P: Page, C: Codec = JsonCodec> {
    cache: Arc<TieredCache<C>>,
    page: Arc<P>,
    tag: String,
    state: Mutex<HelperState<P::Data>>,
    broadcast: Mutex<Option<Arc<VisibilityBroadcast>>>,
}

impl<P: Page, C: Codec> PageStateHelper<P, C> {
    /// Bind `page` to `cache`
    ///
    /// Fails if another live helper already holds the page's tag.
    pub fn attach(cache: Arc<TieredCache<C>>, page: Arc<P>) -> Result<Self> {
        let tag = page.tag().to_string();
        cache.attach_tag(&tag)?;

        Ok(Self {
            cache,
            page,
            tag,
            state: Mutex::new(HelperState {
                phase: Phase::Unattached,
                gate: ReplayGate::new(),
                scroll: ScrollPosition::TOP,
                page_index: 1,
                last_hidden: 0,
                restored: false,
            }),
            broadcast: Mutex::new(None),
        })
    }

    /// Drive the helper with one event
    ///
    /// Only `Attached` suspends; every other event completes synchronously.
    pub async fn handle(&self, event: LifecycleEvent) -> Result<()> {
        match event {
            LifecycleEvent::Attached => {
                self.restore().await;
                Ok(())
            }
            LifecycleEvent::SurfaceReady => {
                self.on_surface_ready();
                Ok(())
            }
            LifecycleEvent::Paused => {
                self.on_paused();
                Ok(())
            }
            LifecycleEvent::BecameInactive => self.on_inactive(),
            LifecycleEvent::BecameActive => {
                self.on_active();
                Ok(())
            }
            LifecycleEvent::Detached {
                container_finishing,
            } => self.on_detach(container_finishing),
        }
    }

    /// Restore saved state for this page
    ///
    /// A miss leaves loading to the page. A completion arriving after
    /// detach is dropped.
    pub async fn restore(&self) {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Unattached {
                return;
            }
            state.phase = Phase::PendingRestore;
        }

        let restored = self.cache.restore(&self.tag).await;
        let replay = restored.and_then(|record| self.decode(record));
        let surface_present = self.page.scrollable_surface().is_some();

        let ready = {
            let mut state = self.state.lock();
            if state.phase == Phase::Detached {
                debug!("Restore for '{}' finished after detach, dropping it", self.tag);
                return;
            }
            state.phase = Phase::Resolved;

            match replay {
                Some((replay, page_index, last_hidden)) => {
                    state.restored = true;
                    state.scroll = replay.scroll;
                    state.page_index = page_index;
                    // Hidden while the restore was in flight.
                    if state.last_hidden == 0 {
                        state.last_hidden = last_hidden;
                    }

                    let ready = state.gate.resolve(replay);
                    if surface_present {
                        ready.or_else(|| state.gate.surface_ready())
                    } else {
                        ready
                    }
                }
                None => {
                    state.gate.close();
                    None
                }
            }
        };

        if let Some(replay) = ready {
            self.dispatch(replay);
        }
    }

    fn decode(&self, record: StateRecord) -> Option<(Replay<P::Data>, u32, i64)> {
        let data = match &record.payload {
            Some(payload) => match self.cache.decode::<P::Data>(payload) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Discarding undecodable state for '{}': {}", self.tag, e);
                    self.cache.stats().record_decode_failure();
                    return None;
                }
            },
            None => None,
        };

        let replay = Replay {
            data,
            scroll: record.scroll,
        };
        Some((replay, record.page_index, record.last_hidden))
    }

    fn dispatch(&self, replay: Replay<P::Data>) {
        if let Some(data) = replay.data {
            self.page.deliver_restored_state(data);
        }
        if replay.scroll.position < 0 {
            return;
        }
        if let Some(surface) = self.page.scrollable_surface() {
            surface.scroll_to(replay.scroll);
        }
    }

    /// The page's content view now exists
    pub fn on_surface_ready(&self) {
        let ready = {
            let mut state = self.state.lock();
            if state.phase == Phase::Detached {
                return;
            }
            state.gate.surface_ready()
        };

        if let Some(replay) = ready {
            self.dispatch(replay);
        }
    }

    /// Capture the scroll anchor without saving
    pub fn on_paused(&self) {
        let scroll = self.current_scroll();
        let mut state = self.state.lock();
        if state.phase == Phase::Detached {
            return;
        }
        if let Some(scroll) = scroll {
            state.scroll = scroll;
        }
    }

    /// Page hidden: remember when, then save
    ///
    /// Before the restore has resolved there is nothing of the page's own to
    /// save, so only the scratch state is updated.
    pub fn on_inactive(&self) -> Result<()> {
        let scroll = self.current_scroll();
        let now = self.cache.clock().now_millis();

        let record = {
            let mut state = self.state.lock();
            if state.phase == Phase::Detached {
                return Ok(());
            }
            if let Some(scroll) = scroll {
                state.scroll = scroll;
            }
            state.last_hidden = now;
            if state.phase != Phase::Resolved {
                return Ok(());
            }
            self.scratch_record(&state)
        };

        let record = self.with_snapshot(record, self.page.current_snapshot())?;
        self.cache
            .save(&self.tag, record, self.page.keep_in_memory(), false)
    }

    /// Page visible again: report a long background stay once
    pub fn on_active(&self) {
        let now = self.cache.clock().now_millis();

        let hidden_since = {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Detached | Phase::Unattached) {
                return;
            }
            std::mem::replace(&mut state.last_hidden, 0)
        };
        if hidden_since == 0 {
            return;
        }

        let elapsed = Duration::from_millis(now.saturating_sub(hidden_since).max(0) as u64);
        let threshold = self
            .page
            .refresh_threshold()
            .unwrap_or(self.cache.config().refresh_threshold);

        if elapsed > threshold {
            debug!(
                "'{}' was in the background for {:?}, longer than {:?}",
                self.tag, elapsed, threshold
            );
            self.page.on_long_background(elapsed);
        }
    }

    /// Page destroyed: save its final state or clear it
    ///
    /// When the container is finishing, pages that do not retain state are
    /// cleared everywhere; the rest are written through with the scroll
    /// anchor at the top.
    pub fn on_detach(&self, container_finishing: bool) -> Result<()> {
        let scroll = self.current_scroll();

        let (record, resolved) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Detached {
                return Ok(());
            }
            let resolved = state.phase == Phase::Resolved;
            state.phase = Phase::Detached;
            state.gate.close();
            if let Some(scroll) = scroll {
                state.scroll = scroll;
            }
            (self.scratch_record(&state), resolved)
        };
        self.release();

        if container_finishing && !self.page.retain_after_finish() {
            debug!("Container finishing, clearing '{}'", self.tag);
            return self.cache.clear(&self.tag);
        }

        let snapshot = self.page.current_snapshot();
        if !resolved && snapshot.is_none() {
            // Would replace whatever is saved with an empty record.
            debug!("'{}' detached before its state was restored, keeping saved copy", self.tag);
            return Ok(());
        }

        let mut record = self.with_snapshot(record, snapshot)?;
        if container_finishing {
            record.reset_scroll();
        }
        self.cache.save(
            &self.tag,
            record,
            self.page.keep_in_memory(),
            container_finishing,
        )
    }

    /// Receive container-level visibility changes from `broadcast`
    ///
    /// Pass the receiver to [`follow`](Self::follow). The subscription ends
    /// on detach.
    pub fn subscribe(
        &self,
        broadcast: &Arc<VisibilityBroadcast>,
    ) -> UnboundedReceiver<ContainerVisibility> {
        let rx = broadcast.subscribe(&self.tag);
        if let Some(previous) = self.broadcast.lock().replace(Arc::clone(broadcast)) {
            if !Arc::ptr_eq(&previous, broadcast) {
                previous.unsubscribe(&self.tag);
            }
        }
        rx
    }

    /// Apply visibility changes until the subscription ends
    pub async fn follow(&self, mut rx: UnboundedReceiver<ContainerVisibility>) -> Result<()> {
        while let Some(visibility) = rx.recv().await {
            self.handle(visibility.into()).await?;
        }
        Ok(())
    }

    fn release(&self) {
        if let Some(broadcast) = self.broadcast.lock().take() {
            broadcast.unsubscribe(&self.tag);
        }
        self.cache.detach_tag(&self.tag);
    }

    fn current_scroll(&self) -> Option<ScrollPosition> {
        self.page.scrollable_surface().map(|s| s.scroll_position())
    }

    fn scratch_record(&self, state: &HelperState<P::Data>) -> StateRecord {
        StateRecord::new(self.tag.as_str())
            .with_scroll(state.scroll)
            .with_page_index(state.page_index)
            .with_last_hidden(state.last_hidden)
    }

    fn with_snapshot(&self, record: StateRecord, snapshot: Option<P::Data>) -> Result<StateRecord> {
        match snapshot {
            Some(data) => Ok(record.with_payload(self.cache.encode(&data)?)),
            None => Ok(record),
        }
    }

    /// Page tag
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Whether the last restore found state
    pub fn is_restored(&self) -> bool {
        self.state.lock().restored
    }

    /// When the page was last hidden, 0 if it is not
    pub fn last_hidden_time(&self) -> i64 {
        self.state.lock().last_hidden
    }

    /// Override the last-hidden timestamp
    pub fn update_last_hidden_time(&self, millis: i64) {
        self.state.lock().last_hidden = millis;
    }

    /// Pagination cursor
    pub fn page_index(&self) -> u32 {
        self.state.lock().page_index
    }

    /// Set the pagination cursor saved with the next record
    pub fn set_page_index(&self, page_index: u32) {
        self.state.lock().page_index = page_index;
    }

    /// Last captured scroll anchor
    pub fn scroll_state(&self) -> ScrollPosition {
        self.state.lock().scroll
    }
}

impl<P: Page, C: Codec> Drop for PageStateHelper<P, C> {
    fn drop(&mut self) {
        if self.state.get_mut().phase != Phase::Detached {
            self.release();
        }
    }
}
