use std::borrow::{Borrow, Cow};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context_stack::TrackContext;
use crate::tracker::{SharedDataEvent, Tracker, TrackerShared};

/// Track state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackState {
    /// Call has been started, nothing reported yet
    Pending,

    /// Call has reported progress at least once
    Updating,

    /// Call completed successfully
    Fulfilled,

    /// Call failed
    Rejected,
}

impl TrackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackState::Fulfilled | TrackState::Rejected)
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackState::Pending => write!(f, "Pending"),
            TrackState::Updating => write!(f, "Updating"),
            TrackState::Fulfilled => write!(f, "Fulfilled"),
            TrackState::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Key into a track's side-data bag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataKey(Cow<'static, str>);

impl DataKey {
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for DataKey {
    fn from(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }
}

impl From<String> for DataKey {
    fn from(key: String) -> Self {
        Self(Cow::Owned(key))
    }
}

impl Borrow<str> for DataKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct TrackCore<V, E> {
    state: TrackState,
    value: Option<V>,
    error: Option<E>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TrackData {
    values: HashMap<DataKey, Value>,
    /// private key -> public key
    shared: HashMap<DataKey, DataKey>,
}

struct TrackInner<V, E> {
    sn: u64,
    tracker: Rc<TrackerShared<V, E>>,
    core: RefCell<TrackCore<V, E>>,
    data: RefCell<TrackData>,
}

/// One tracked call.
///
/// A `Track` is a cheap handle; clones refer to the same call. Once the call
/// is fulfilled or rejected, further transitions are accepted and discarded.
pub struct Track<V, E> {
    inner: Rc<TrackInner<V, E>>,
}

impl<V, E> Drop for TrackInner<V, E> {
    fn drop(&mut self) {
        if !self.core.get_mut().state.is_terminal() {
            self.tracker.call_abandoned(self.sn);
        }
    }
}

impl<V, E> Clone for Track<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V, E> fmt::Debug for Track<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("tracker", &self.inner.tracker.name())
            .field("sn", &self.inner.sn)
            .field("state", &self.state())
            .finish()
    }
}

impl<V, E> Track<V, E> {
    pub(crate) fn new(sn: u64, tracker: Rc<TrackerShared<V, E>>, initial: Option<V>) -> Self {
        let now = Utc::now();
        Self {
            inner: Rc::new(TrackInner {
                sn,
                tracker,
                core: RefCell::new(TrackCore {
                    state: TrackState::Pending,
                    value: initial,
                    error: None,
                    created_at: now,
                    updated_at: now,
                    settled_at: None,
                }),
                data: RefCell::new(TrackData::default()),
            }),
        }
    }

    pub fn sn(&self) -> u64 {
        self.inner.sn
    }

    pub fn state(&self) -> TrackState {
        self.inner.core.borrow().state
    }

    /// Handle to the tracker this call belongs to
    pub fn tracker(&self) -> Tracker<V, E> {
        Tracker::from_shared(Rc::clone(&self.inner.tracker))
    }

    /// Report progress. Returns `false` if the call was already settled.
    pub fn update(&self, value: V) -> bool {
        self.transition(TrackState::Updating, |core| core.value = Some(value))
    }

    /// Settle successfully. Returns `false` if the call was already settled.
    pub fn fulfill(&self, value: V) -> bool {
        self.transition(TrackState::Fulfilled, |core| core.value = Some(value))
    }

    /// Settle with an error. Returns `false` if the call was already settled.
    ///
    /// The last reported value is kept.
    pub fn reject(&self, error: E) -> bool {
        self.transition(TrackState::Rejected, |core| core.error = Some(error))
    }

    fn transition(&self, to: TrackState, store: impl FnOnce(&mut TrackCore<V, E>)) -> bool {
        let sn = self.inner.sn;
        {
            let mut core = self.inner.core.borrow_mut();
            if core.state.is_terminal() {
                debug!(
                    tracker = %self.inner.tracker.name(),
                    sn,
                    state = %core.state,
                    attempted = %to,
                    "Ignoring transition on settled call"
                );
                drop(core);
                self.inner.tracker.transition_ignored();
                return false;
            }

            store(&mut *core);
            let now = Utc::now();
            core.state = to;
            core.updated_at = now;
            if to.is_terminal() {
                core.settled_at = Some(now);
            }
        }

        // The borrow is released so event consumers may query this track.
        self.inner.tracker.raise(to, sn);
        if to.is_terminal() {
            debug!(tracker = %self.inner.tracker.name(), sn, state = %to, "Call settled");
        }
        true
    }

    /// No newer call has been created yet
    pub fn is_latest_call(&self) -> bool {
        self.inner.tracker.counters().total_created == self.inner.sn
    }

    /// This call's progress is the newest and no newer call has fulfilled
    pub fn is_latest_update(&self) -> bool {
        let c = self.inner.tracker.counters();
        let sn = self.inner.sn;
        self.state() == TrackState::Updating && c.latest_fulfilled < sn && c.latest_updating == sn
    }

    /// This call is the newest fulfilled one and no newer call reported progress
    pub fn is_latest_fulfill(&self) -> bool {
        let c = self.inner.tracker.counters();
        let sn = self.inner.sn;
        self.state() == TrackState::Fulfilled
            && c.latest_updating <= sn
            && c.latest_fulfilled == sn
    }

    /// This call is the newest finished one and no newer call reported progress
    pub fn is_latest_finish(&self) -> bool {
        let c = self.inner.tracker.counters();
        let sn = self.inner.sn;
        self.state().is_terminal() && c.latest_updating <= sn && c.latest_finished() == sn
    }

    /// Whether this call's payload has been superseded.
    ///
    /// A rejected call is always stale. Otherwise the payload is trusted until
    /// a newer call reports progress or finishes, in whatever order calls
    /// complete.
    pub fn is_stale_value(&self) -> bool {
        if self.state() == TrackState::Rejected {
            return true;
        }
        let c = self.inner.tracker.counters();
        let sn = self.inner.sn;
        c.latest_updating > sn || c.latest_finished() > sn
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TrackState::Pending
    }

    pub fn is_updating(&self) -> bool {
        self.state() == TrackState::Updating
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == TrackState::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == TrackState::Rejected
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn value(&self) -> Option<V>
    where
        V: Clone,
    {
        self.inner.core.borrow().value.clone()
    }

    /// Borrow the current value without cloning
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&V>) -> R) -> R {
        f(self.inner.core.borrow().value.as_ref())
    }

    pub fn error(&self) -> Option<E>
    where
        E: Clone,
    {
        self.inner.core.borrow().error.clone()
    }

    pub fn with_error<R>(&self, f: impl FnOnce(Option<&E>) -> R) -> R {
        f(self.inner.core.borrow().error.as_ref())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.core.borrow().created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.inner.core.borrow().updated_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.inner.core.borrow().settled_at
    }

    /// Store side data. If `key` is shared, the write is also published to
    /// the tracker's shared-data sinks before this returns.
    pub fn set_data(&self, key: impl Into<DataKey>, value: Value) {
        let key = key.into();
        let public = {
            let mut data = self.inner.data.borrow_mut();
            data.values.insert(key.clone(), value.clone());
            data.shared.get(&key).cloned()
        };

        if let Some(public) = public {
            let event = SharedDataEvent {
                track: self.clone(),
                key: public,
                source_key: key,
                value,
            };
            self.inner.tracker.notify_shared(&event);
        }
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.inner.data.borrow().values.get(key).cloned()
    }

    /// Get and clear a side-data entry
    pub fn take_data(&self, key: &str) -> Option<Value> {
        self.inner.data.borrow_mut().values.remove(key)
    }

    /// Publish later writes to `private_key` under `public_key`
    pub fn share_data(&self, private_key: impl Into<DataKey>, public_key: impl Into<DataKey>) {
        self.inner
            .data
            .borrow_mut()
            .shared
            .insert(private_key.into(), public_key.into());
    }

    /// Whether both handles refer to the same call
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V: 'static, E: 'static> Track<V, E> {
    /// Ambient context exposing this call's side-data bag
    pub fn context(&self) -> TrackContext {
        let getter = self.clone();
        let setter = self.clone();
        TrackContext::new(
            self.inner.sn,
            move |key| getter.get_data(key),
            move |key, value| setter.set_data(key, value),
        )
    }
}
