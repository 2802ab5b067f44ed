//! Lock-guarded telemetry store shared between the transport thread and the
//! consumers.
//!
//! A [`SharedStore`] aggregates one [`ChannelBuffer`] per known channel, the
//! bounded debug ring and the current [`ConnectionState`]. Every operation
//! takes the single store lock for its own duration only; nothing inside a
//! critical section performs I/O or waits on another thread.
//!
//! | Operation | Cost under the lock |
//! |---|---|
//! | [`SharedStore::append`] | O(1) amortized ring push/evict |
//! | [`SharedStore::log_event`] | O(1) amortized ring prepend/evict |
//! | [`SharedStore::snapshot`] | O(N) copy of one buffer |
//! | [`SharedStore::clear_all`] | O(channels) |
//!
//! # Example
//!
//! ```
//! use iotdash_middleware::store::SharedStore;
//!
//! let store = SharedStore::new(["temp", "hum"]);
//! store.append("temp", 23.5);
//! store.append("wind", 4.0); // unknown channel: dropped
//!
//! assert_eq!(store.latest("temp"), Some(23.5));
//! assert_eq!(store.snapshot("wind"), None);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use iotdash_types::{ConnectionState, DEFAULT_CHANNELS, DebugRecord};
use serde::Serialize;

/// Samples retained per channel unless configured otherwise.
pub const DEFAULT_BUFFER_CAPACITY: usize = 200;

/// Debug records retained unless configured otherwise.
pub const DEFAULT_DEBUG_CAPACITY: usize = 400;

// ────────────────────────────────────────────────────────────────────────────
// ChannelBuffer
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity FIFO of samples for one channel.
///
/// Pushing beyond capacity evicts the oldest sample, so the buffer always
/// holds the most recent `capacity` values in arrival order.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl ChannelBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Oldest-first copy of the current contents.
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Snapshot types
// ────────────────────────────────────────────────────────────────────────────

/// One channel inside a [`StoreSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelView {
    pub name: String,
    /// Oldest-first.
    pub values: Vec<f64>,
}

impl ChannelView {
    pub fn latest(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// A consistent frame of the whole store taken under a single lock
/// acquisition. This is what renderers draw from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub connection: ConnectionState,
    /// Channels in construction order.
    pub channels: Vec<ChannelView>,
    /// Most recent first.
    pub debug: Vec<String>,
}

impl StoreSnapshot {
    pub fn channel(&self, name: &str) -> Option<&ChannelView> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn latest(&self, name: &str) -> Option<f64> {
        self.channel(name).and_then(ChannelView::latest)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SharedStore
// ────────────────────────────────────────────────────────────────────────────

struct StoreInner {
    buffers: HashMap<String, ChannelBuffer>,
    debug: VecDeque<DebugRecord>,
    debug_capacity: usize,
    connection: ConnectionState,
    // Bumped on every supervisor start/stop so callbacks from a thread that
    // has been superseded cannot overwrite the current connection state.
    session: u64,
}

/// The single piece of state shared between the background transport
/// thread and foreground consumers.
///
/// Construct it once and hand out `Arc<SharedStore>` clones; there is no
/// global instance.
pub struct SharedStore {
    // Immutable after construction, so it lives outside the lock.
    order: Vec<String>,
    buffer_capacity: usize,
    inner: Mutex<StoreInner>,
}

impl SharedStore {
    /// Create a store for `channels` with the default capacities.
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_capacity(channels, DEFAULT_BUFFER_CAPACITY, DEFAULT_DEBUG_CAPACITY)
    }

    /// Create a store with explicit per-channel and debug-ring capacities.
    ///
    /// Duplicate channel names are collapsed; the first occurrence fixes the
    /// display order.
    pub fn with_capacity<I, S>(channels: I, buffer_capacity: usize, debug_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let buffer_capacity = buffer_capacity.max(1);
        let mut order = Vec::new();
        let mut buffers = HashMap::new();
        for name in channels {
            let name = name.into();
            if buffers.contains_key(&name) {
                continue;
            }
            buffers.insert(name.clone(), ChannelBuffer::new(buffer_capacity));
            order.push(name);
        }
        let debug_capacity = debug_capacity.max(1);
        Self {
            order,
            buffer_capacity,
            inner: Mutex::new(StoreInner {
                buffers,
                debug: VecDeque::with_capacity(debug_capacity),
                debug_capacity,
                connection: ConnectionState::Disconnected,
                session: 0,
            }),
        }
    }

    /// Known channel names in construction order.
    pub fn channels(&self) -> &[String] {
        &self.order
    }

    pub fn is_known_channel(&self, channel: &str) -> bool {
        self.order.iter().any(|c| c == channel)
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn debug_capacity(&self) -> usize {
        self.lock().debug_capacity
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Append `value` to `channel`.
    ///
    /// Returns `false` (and changes nothing) when `channel` is not one of the
    /// known channels.
    pub fn append(&self, channel: &str, value: f64) -> bool {
        let mut inner = self.lock();
        match inner.buffers.get_mut(channel) {
            Some(buffer) => {
                buffer.push(value);
                true
            }
            None => false,
        }
    }

    /// Empty every channel buffer in one critical section.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        for buffer in inner.buffers.values_mut() {
            buffer.clear();
        }
    }

    /// Prepend `record` to the debug ring, evicting the oldest entry when full.
    pub fn log_event(&self, record: DebugRecord) {
        let mut inner = self.lock();
        if inner.debug.len() == inner.debug_capacity {
            inner.debug.pop_back();
        }
        inner.debug.push_front(record);
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.lock().connection = state;
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Open a new connection session and mark the state as
    /// [`ConnectionState::Connecting`]. Returns the session id that the
    /// transport callbacks must present to update the state.
    pub fn begin_session(&self) -> u64 {
        let mut inner = self.lock();
        inner.session += 1;
        inner.connection = ConnectionState::Connecting;
        inner.session
    }

    /// Close the current session and mark the state as
    /// [`ConnectionState::Disconnected`]. Later updates from the closed
    /// session are ignored.
    pub fn end_session(&self) {
        let mut inner = self.lock();
        inner.session += 1;
        inner.connection = ConnectionState::Disconnected;
    }

    /// Set the connection state on behalf of `session`.
    ///
    /// Returns `false` without changing anything when `session` is no longer
    /// the current one.
    pub fn set_session_state(&self, session: u64, state: ConnectionState) -> bool {
        let mut inner = self.lock();
        if inner.session != session {
            return false;
        }
        inner.connection = state;
        true
    }

    // -----------------------------------------------------------------------
    // Reads (copy-on-read)
    // -----------------------------------------------------------------------

    /// Oldest-first copy of `channel`, or `None` for an unknown channel.
    pub fn snapshot(&self, channel: &str) -> Option<Vec<f64>> {
        self.lock().buffers.get(channel).map(ChannelBuffer::to_vec)
    }

    /// Most recent value of `channel`, or `None` when unknown or empty.
    pub fn latest(&self, channel: &str) -> Option<f64> {
        self.lock().buffers.get(channel).and_then(ChannelBuffer::latest)
    }

    /// Copy of every channel in a single critical section.
    pub fn snapshot_all(&self) -> BTreeMap<String, Vec<f64>> {
        self.lock()
            .buffers
            .iter()
            .map(|(name, buffer)| (name.clone(), buffer.to_vec()))
            .collect()
    }

    /// Debug ring rendered as text, most recent first.
    pub fn snapshot_debug(&self) -> Vec<String> {
        self.lock().debug.iter().map(ToString::to_string).collect()
    }

    /// Debug ring as structured records, most recent first.
    pub fn debug_records(&self) -> Vec<DebugRecord> {
        self.lock().debug.iter().cloned().collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Take a [`StoreSnapshot`] of channels, connection state and the newest
    /// `debug_limit` debug lines.
    pub fn frame(&self, debug_limit: usize) -> StoreSnapshot {
        let inner = self.lock();
        let channels = self
            .order
            .iter()
            .map(|name| ChannelView {
                name: name.clone(),
                values: inner
                    .buffers
                    .get(name)
                    .map(ChannelBuffer::to_vec)
                    .unwrap_or_default(),
            })
            .collect();
        StoreSnapshot {
            connection: inner.connection,
            channels,
            debug: inner
                .debug
                .iter()
                .take(debug_limit)
                .map(ToString::to_string)
                .collect(),
        }
    }

    // A panic on another thread while holding the lock must not take the
    // consumers down with it; every mutation leaves the data valid.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS)
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("channels", &self.order)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("connection", &self.connection_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn buffer_keeps_last_capacity_values_in_order() {
        let mut buffer = ChannelBuffer::new(5);
        for i in 0..12 {
            buffer.push(i as f64);
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.to_vec(), vec![7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(buffer.latest(), Some(11.0));
    }

    #[test]
    fn zero_capacity_buffer_holds_one_value() {
        let mut buffer = ChannelBuffer::new(0);
        buffer.push(1.0);
        buffer.push(2.0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec![2.0]);
    }

    #[test]
    fn duplicates_are_not_suppressed() {
        let store = SharedStore::new(["temp"]);
        store.append("temp", 1.0);
        store.append("temp", 1.0);
        assert_eq!(store.snapshot("temp"), Some(vec![1.0, 1.0]));
    }

    #[test]
    fn append_to_unknown_channel_is_noop() {
        let store = SharedStore::default();
        assert!(!store.append("wind", 3.0));
        assert!(store.snapshot("wind").is_none());
        assert!(store.snapshot_all().values().all(Vec::is_empty));
    }

    #[test]
    fn latest_is_none_until_first_value() {
        let store = SharedStore::default();
        assert_eq!(store.latest("hum"), None);
        store.append("hum", 48.2);
        assert_eq!(store.latest("hum"), Some(48.2));
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let store = SharedStore::new(["temp"]);
        store.append("temp", 1.0);
        let snap = store.snapshot("temp").unwrap();
        store.append("temp", 2.0);
        assert_eq!(snap, vec![1.0]);
    }

    #[test]
    fn clear_all_empties_every_channel() {
        let store = SharedStore::default();
        for name in DEFAULT_CHANNELS {
            store.append(name, 10.0);
        }
        store.clear_all();
        for name in DEFAULT_CHANNELS {
            assert_eq!(store.snapshot(name), Some(vec![]));
            assert_eq!(store.latest(name), None);
        }
    }

    #[test]
    fn duplicate_channel_names_are_collapsed() {
        let store = SharedStore::new(["temp", "hum", "temp"]);
        assert_eq!(store.channels(), ["temp".to_string(), "hum".to_string()]);
    }

    #[test]
    fn debug_ring_is_bounded_and_newest_first() {
        let store = SharedStore::with_capacity(["temp"], 10, 4);
        for i in 0..1_000 {
            store.log_event(DebugRecord::lifecycle("test", format!("event {i}")));
            assert!(store.debug_records().len() <= 4);
        }
        let lines = store.snapshot_debug();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "[test] event 999");
        assert_eq!(lines[3], "[test] event 996");
    }

    #[test]
    fn stale_session_cannot_overwrite_state() {
        let store = SharedStore::default();
        let old = store.begin_session();
        store.end_session();
        let current = store.begin_session();

        assert!(!store.set_session_state(old, ConnectionState::Connected));
        assert_eq!(store.connection_state(), ConnectionState::Connecting);

        assert!(store.set_session_state(current, ConnectionState::Connected));
        assert_eq!(store.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn frame_preserves_channel_order_and_limits_debug() {
        let store = SharedStore::new(["prox", "temp"]);
        store.append("temp", 20.0);
        for i in 0..10 {
            store.log_event(DebugRecord::lifecycle("test", i.to_string()));
        }
        let frame = store.frame(3);
        let names: Vec<_> = frame.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["prox", "temp"]);
        assert_eq!(frame.latest("temp"), Some(20.0));
        assert_eq!(frame.latest("prox"), None);
        assert_eq!(frame.debug.len(), 3);
        assert_eq!(frame.debug[0], "[test] 9");
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let store = Arc::new(SharedStore::new(["temp"]));
        store.append("temp", 1.0);

        let poisoner = Arc::clone(&store);
        let result = thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the store lock");
        })
        .join();
        assert!(result.is_err());

        store.append("temp", 2.0);
        assert_eq!(store.snapshot("temp"), Some(vec![1.0, 2.0]));
    }

    /// Every snapshot taken while several producers append concurrently must
    /// fit the capacity and be a contiguous window of the global append
    /// order, which means each producer's values appear as a consecutive run.
    #[test]
    fn concurrent_appends_and_snapshots_stay_consistent() {
        const CAPACITY: usize = 32;
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 2_000;
        const STRIDE: u64 = 1_000_000;

        let store = Arc::new(SharedStore::with_capacity(["temp"], CAPACITY, 8));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        store.append("temp", (p * STRIDE + i) as f64);
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = store.snapshot("temp").unwrap_or_default();
                        assert!(snap.len() <= CAPACITY);
                        let mut last_seen: HashMap<u64, u64> = HashMap::new();
                        for value in snap {
                            let value = value as u64;
                            let (producer, seq) = (value / STRIDE, value % STRIDE);
                            if let Some(prev) = last_seen.insert(producer, seq) {
                                assert_eq!(seq, prev + 1, "gap in producer {producer} run");
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in producers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        let final_snap = store.snapshot("temp").unwrap();
        assert_eq!(final_snap.len(), CAPACITY);
    }

    #[test]
    fn clear_during_appends_leaves_only_post_clear_values() {
        let store = Arc::new(SharedStore::with_capacity(["temp"], 1_000, 8));
        for i in 0..100 {
            store.append("temp", i as f64);
        }
        store.clear_all();
        assert_eq!(store.snapshot("temp"), Some(vec![]));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..50 {
                    store.append("temp", (1_000 + i) as f64);
                }
            })
        };
        writer.join().unwrap();
        let snap = store.snapshot("temp").unwrap();
        assert_eq!(snap.len(), 50);
        assert!(snap.iter().all(|v| *v >= 1_000.0));
    }
}
