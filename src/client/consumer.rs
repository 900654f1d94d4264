//! Incremental Consumer: polls the feed while the enrichment job runs and
//! renders each feature identity at most once per overlay session.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::http::FeedSource;
use crate::feed::{Feature, FeedSnapshot};

/// Rendered map layer (or anything that plays that role).
pub trait FeatureLayer: Send {
    fn add(&mut self, feature: &Feature);
    fn clear(&mut self);
}

/// Layer that simply keeps what was rendered, in order.
#[derive(Debug, Default, Clone)]
pub struct MemoryLayer {
    features: Vec<Feature>,
}

impl MemoryLayer {
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FeatureLayer for MemoryLayer {
    fn add(&mut self, feature: &Feature) {
        self.features.push(feature.clone());
    }

    fn clear(&mut self) {
        self.features.clear();
    }
}

/// Identity keys already rendered in the active session. Append-only.
#[derive(Debug, Default)]
pub struct SeenIdSet {
    ids: HashSet<String>,
}

impl SeenIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the key was not seen before.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.ids.contains(key) {
            return false;
        }
        self.ids.insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ids.contains(key)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Feed could not be read or parsed; nothing rendered, nothing changed.
    Skipped,
    /// New features rendered; job still running (or status unknown).
    Continue { added: usize },
    /// Job reported not running; polling should stop.
    Finished { added: usize },
}

/// State owned by one activation of the overlay.
#[derive(Debug, Default)]
pub struct OverlaySession {
    seen: Mutex<SeenIdSet>,
    closed: AtomicBool,
}

impl OverlaySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_count(&self) -> usize {
        lock(&self.seen).len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Render the features of `snapshot` not yet seen. Features without a stable
    /// identity are always rendered.
    pub fn apply_snapshot<L: FeatureLayer>(&self, snapshot: &FeedSnapshot, layer: &Mutex<L>) -> usize {
        let mut layer = lock(layer);
        // checked under the layer lock so a deactivated session never draws again
        if self.is_closed() {
            return 0;
        }
        let mut seen = lock(&self.seen);
        let mut added = 0;
        for feature in &snapshot.features {
            let is_new = match feature.identity() {
                Some(key) => seen.insert(&key),
                None => true,
            };
            if is_new {
                layer.add(feature);
                added += 1;
            }
        }
        added
    }

    pub async fn poll_once<S, L>(&self, source: &S, layer: &Mutex<L>) -> PollOutcome
    where
        S: FeedSource + ?Sized,
        L: FeatureLayer,
    {
        let snapshot = match source.read_feed().await {
            Ok(s) => s,
            Err(e) => {
                debug!(target: "consumer", error = %e, "feed poll skipped");
                return PollOutcome::Skipped;
            }
        };
        let added = self.apply_snapshot(&snapshot, layer);

        match source.read_status().await {
            Ok(false) => PollOutcome::Finished { added },
            Ok(true) => PollOutcome::Continue { added },
            Err(e) => {
                // fail-open: keep polling
                warn!(target: "consumer", error = %e, "status check failed, polling continues");
                PollOutcome::Continue { added }
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Active {
    session: Arc<OverlaySession>,
    timer: JoinHandle<()>,
}

/// Current-events overlay: at most one active session at a time.
pub struct Overlay<S: FeedSource + 'static, L: FeatureLayer + 'static> {
    source: Arc<S>,
    layer: Arc<Mutex<L>>,
    interval: Duration,
    active: Option<Active>,
}

impl<S: FeedSource + 'static, L: FeatureLayer + 'static> Overlay<S, L> {
    pub fn new(source: Arc<S>, layer: L, interval: Duration) -> Self {
        Self {
            source,
            layer: Arc::new(Mutex::new(layer)),
            interval,
            active: None,
        }
    }

    pub fn layer(&self) -> Arc<Mutex<L>> {
        Arc::clone(&self.layer)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// True while the poll timer is alive.
    pub fn is_polling(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.timer.is_finished())
    }

    pub fn seen_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.session.seen_count())
    }

    /// Start a fresh session: immediate poll, then one poll per interval until the
    /// job reports complete. Must be called from within a tokio runtime.
    pub fn activate(&mut self) {
        if self.active.is_some() {
            self.deactivate();
        }
        let session = Arc::new(OverlaySession::new());
        let timer = tokio::spawn(poll_loop(
            Arc::clone(&session),
            Arc::clone(&self.source),
            Arc::clone(&self.layer),
            self.interval,
        ));
        info!(target: "consumer", interval_ms = self.interval.as_millis() as u64, "overlay activated");
        self.active = Some(Active { session, timer });
    }

    /// Cancel the timer, drop the seen set and clear the layer.
    pub fn deactivate(&mut self) {
        if let Some(active) = self.active.take() {
            active.session.close();
            active.timer.abort();
            lock(&self.layer).clear();
            info!(target: "consumer", "overlay deactivated");
        }
    }

    /// Wait for the current session's polling to stop on its own.
    pub async fn wait_finished(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if !active.timer.is_finished() {
                let _ = (&mut active.timer).await;
            }
        }
    }
}

impl<S: FeedSource + 'static, L: FeatureLayer + 'static> Drop for Overlay<S, L> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.session.close();
            active.timer.abort();
        }
    }
}

async fn poll_loop<S: FeedSource, L: FeatureLayer>(
    session: Arc<OverlaySession>,
    source: Arc<S>,
    layer: Arc<Mutex<L>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        // first tick completes immediately
        ticker.tick().await;
        match session.poll_once(source.as_ref(), &layer).await {
            PollOutcome::Finished { added } => {
                info!(target: "consumer", added, seen = session.seen_count(), "job complete, polling stopped");
                break;
            }
            PollOutcome::Continue { added } if added > 0 => {
                debug!(target: "consumer", added, seen = session.seen_count(), "rendered new features");
            }
            PollOutcome::Continue { .. } | PollOutcome::Skipped => {}
        }
    }
}
