use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::flags::{Counters, HasFlags, LatestFlags, TrackerFlags};
use crate::metrics::TrackerMetrics;
use crate::track::{DataKey, Track, TrackState};

/// Event emitted when the tracker's bookkeeping changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A new track was allocated
    Created { sn: u64 },
    /// A track applied a transition
    Transitioned { sn: u64, state: TrackState },
    /// The aggregate projections changed
    FlagsChanged(TrackerFlags),
}

/// Notification for a write to a shared data key.
///
/// `key` is the public key the write is published under, `source_key` the
/// private key that was written.
pub struct SharedDataEvent<V, E> {
    pub track: Track<V, E>,
    pub key: DataKey,
    pub source_key: DataKey,
    pub value: Value,
}

type SharedDataSink<V, E> = Rc<dyn Fn(&SharedDataEvent<V, E>)>;

/// State shared by a tracker handle and every track it created.
pub(crate) struct TrackerShared<V, E> {
    id: Uuid,
    name: String,

    total_created: Cell<u64>,
    latest_updating: Cell<u64>,
    latest_fulfilled: Cell<u64>,
    latest_rejected: Cell<u64>,
    /// Live calls not yet fulfilled or rejected
    unsettled: Cell<u64>,

    /// Last published aggregate snapshot
    flags: Cell<TrackerFlags>,

    event_sender: broadcast::Sender<TrackerEvent>,
    metrics: Option<TrackerMetrics>,
    sinks: RefCell<Vec<SharedDataSink<V, E>>>,
}

impl<V, E> TrackerShared<V, E> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn counters(&self) -> Counters {
        Counters {
            total_created: self.total_created.get(),
            latest_updating: self.latest_updating.get(),
            latest_fulfilled: self.latest_fulfilled.get(),
            latest_rejected: self.latest_rejected.get(),
            unsettled: self.unsettled.get(),
        }
    }

    fn allocate_sn(&self) -> u64 {
        let sn = self.total_created.get() + 1;
        self.total_created.set(sn);
        self.unsettled.set(self.unsettled.get() + 1);

        if let Some(metrics) = &self.metrics {
            metrics.track_created();
        }
        let _ = self.event_sender.send(TrackerEvent::Created { sn });
        self.publish_flags();
        sn
    }

    /// Raise the high-water mark for `state` to `sn` if it is not already past it.
    pub(crate) fn raise(&self, state: TrackState, sn: u64) {
        let (mark, record): (&Cell<u64>, fn(&TrackerMetrics)) = match state {
            TrackState::Updating => (&self.latest_updating, TrackerMetrics::track_updated),
            TrackState::Fulfilled => (&self.latest_fulfilled, TrackerMetrics::track_fulfilled),
            TrackState::Rejected => (&self.latest_rejected, TrackerMetrics::track_rejected),
            TrackState::Pending => return,
        };
        if sn >= mark.get() {
            mark.set(sn);
        }
        // Callers only raise a terminal state on the call's first settle.
        if state.is_terminal() {
            self.unsettled.set(self.unsettled.get().saturating_sub(1));
        }

        if let Some(metrics) = &self.metrics {
            record(metrics);
        }
        let _ = self
            .event_sender
            .send(TrackerEvent::Transitioned { sn, state });
        self.publish_flags();
    }

    /// A call was dropped before it settled. It no longer counts as in flight.
    pub(crate) fn call_abandoned(&self, sn: u64) {
        self.unsettled.set(self.unsettled.get().saturating_sub(1));
        debug!(tracker = %self.name, sn, "Call dropped before settling");
        self.publish_flags();
    }

    pub(crate) fn transition_ignored(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.transition_ignored();
        }
    }

    fn publish_flags(&self) {
        let flags = TrackerFlags::from(self.counters());
        if flags != self.flags.replace(flags) {
            debug!(tracker = %self.name, ?flags, "Tracker flags changed");
            let _ = self.event_sender.send(TrackerEvent::FlagsChanged(flags));
        }
    }

    pub(crate) fn notify_shared(&self, event: &SharedDataEvent<V, E>) {
        // Snapshot so sinks may register further sinks while being notified.
        let sinks: Vec<_> = self.sinks.borrow().iter().cloned().collect();
        for sink in sinks {
            sink(event);
        }
    }
}

/// Sequencing tracker for one logical tracked operation.
///
/// Cloning a `Tracker` creates a new handle to the same counters. Distinct
/// trackers never share counters.
pub struct Tracker<V, E> {
    shared: Rc<TrackerShared<V, E>>,
}

impl<V, E> Clone for Tracker<V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<V, E> fmt::Debug for Tracker<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("counters", &self.shared.counters())
            .finish()
    }
}

impl<V, E> Default for Tracker<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Tracker<V, E> {
    /// Create new tracker with default configuration and no metrics
    pub fn new() -> Self {
        Self::from_parts(TrackerConfig::default(), None)
    }

    /// Create tracker from configuration
    pub fn with_config(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let metrics = if config.metrics_enabled {
            Some(TrackerMetrics::new(&config.metrics_prefix)?)
        } else {
            None
        };
        Ok(Self::from_parts(config, metrics))
    }

    fn from_parts(config: TrackerConfig, metrics: Option<TrackerMetrics>) -> Self {
        let (tx, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = TrackerShared {
            id: Uuid::new_v4(),
            name: config.name,
            total_created: Cell::new(0),
            latest_updating: Cell::new(0),
            latest_fulfilled: Cell::new(0),
            latest_rejected: Cell::new(0),
            unsettled: Cell::new(0),
            flags: Cell::new(TrackerFlags::default()),
            event_sender: tx,
            metrics,
            sinks: RefCell::new(Vec::new()),
        };
        info!(tracker = %shared.name, id = %shared.id, "Created call tracker");
        Self {
            shared: Rc::new(shared),
        }
    }

    pub(crate) fn from_shared(shared: Rc<TrackerShared<V, E>>) -> Self {
        Self { shared }
    }

    /// Start tracking a new call with no initial payload
    pub fn track(&self) -> Track<V, E> {
        self.allocate(None)
    }

    /// Start tracking a new call whose payload starts as `initial`
    pub fn track_with(&self, initial: V) -> Track<V, E> {
        self.allocate(Some(initial))
    }

    fn allocate(&self, initial: Option<V>) -> Track<V, E> {
        let sn = self.shared.allocate_sn();
        debug!(tracker = %self.shared.name, sn, "Tracking new call");
        Track::new(sn, Rc::clone(&self.shared), initial)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.shared.event_sender.subscribe()
    }

    /// Register a sink for writes to shared data keys of any track
    pub fn on_shared_data(&self, sink: impl Fn(&SharedDataEvent<V, E>) + 'static) {
        self.shared.sinks.borrow_mut().push(Rc::new(sink));
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current values of the four high-water marks
    pub fn counters(&self) -> Counters {
        self.shared.counters()
    }

    pub fn has(&self) -> HasFlags {
        self.counters().into()
    }

    pub fn latest(&self) -> LatestFlags {
        self.counters().into()
    }

    pub fn flags(&self) -> TrackerFlags {
        self.counters().into()
    }

    pub fn metrics(&self) -> Option<&TrackerMetrics> {
        self.shared.metrics.as_ref()
    }

    /// Whether both handles refer to the same tracker
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}
