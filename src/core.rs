use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet},
    future::poll_fn,
    marker::PhantomData,
    mem::{replace, take},
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

use derive_ex::derive_ex;
use parse_display::Display;


/// Upper bound on cascade rounds within one flush cycle.
///
/// A subscriber that runs in round `k` may write further signals, which are
/// handled in round `k + 1`. Cascades deeper than this are not an error; the
/// records they dirtied stay queued and are handled by the next flush.
const CASCADE_BUDGET: u32 = 3;

thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

/// Identifies a signal within its thread. Monotonic, assigned at creation,
/// never reassigned even after [`Runtime`] teardown.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[display("signal #{0}")]
pub struct SignalId(u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub(crate) struct Slot(u32);

impl Slot {
    // Slots 0 and 1 are reserved for record metadata.
    const FIRST: Slot = Slot(2);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub(crate) struct ObserverId(u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum BatchMode {
    Deferred,
    Immediate,
}

/// A callback installed in one or more dependency records.
pub(crate) trait Subscriber: 'static {
    fn id(&self) -> ObserverId;
    fn run(self: Rc<Self>);
}

/// Per-signal subscriber table.
///
/// Subscribers are held weakly; the strong reference lives in the
/// [`Subscription`](crate::Subscription) returned by `observe`. Slot numbers
/// are handed out by a counter that only moves forward, so a disposed slot is
/// never revived by a later subscription.
pub(crate) struct DepRecord {
    id: SignalId,
    next_slot: Slot,
    subscribers: BTreeMap<Slot, Weak<dyn Subscriber>>,
}

pub(crate) type SharedRecord = Rc<RefCell<DepRecord>>;

impl DepRecord {
    fn new(id: SignalId) -> Self {
        Self {
            id,
            next_slot: Slot::FIRST,
            subscribers: BTreeMap::new(),
        }
    }
    pub(crate) fn id(&self) -> SignalId {
        self.id
    }
    pub(crate) fn subscribe(&mut self, subscriber: Weak<dyn Subscriber>) -> Slot {
        let slot = self.next_slot;
        self.next_slot = Slot(slot.0 + 1);
        self.subscribers.insert(slot, subscriber);
        slot
    }
    pub(crate) fn unsubscribe(&mut self, slot: Slot) {
        self.subscribers.remove(&slot);
    }
    /// Upgrades the live subscribers in slot order and drops dead entries.
    fn live_subscribers(&mut self) -> Vec<Rc<dyn Subscriber>> {
        let mut live = Vec::with_capacity(self.subscribers.len());
        self.subscribers.retain(|_, subscriber| {
            if let Some(subscriber) = subscriber.upgrade() {
                live.push(subscriber);
                true
            } else {
                false
            }
        });
        live
    }
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// All engine state of one thread. Mutated only from synchronous,
/// non-reentrant call sites; queues are swapped out before callbacks run so
/// the cell is never borrowed across user code.
struct Globals {
    is_runtime_exists: bool,
    next_signal_id: u64,
    next_observer_id: u64,
    track: Option<BTreeMap<SignalId, SharedRecord>>,
    mode: BatchMode,
    dirty: Vec<SharedRecord>,
    entered: HashSet<SignalId>,
    invoked: HashSet<ObserverId>,
    pending: bool,
    next_ticks: Vec<Box<dyn FnOnce()>>,
    waker: Option<Waker>,
}

impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            next_signal_id: 0,
            next_observer_id: 0,
            track: None,
            mode: BatchMode::Deferred,
            dirty: Vec::new(),
            entered: HashSet::new(),
            invoked: HashSet::new(),
            pending: false,
            next_ticks: Vec::new(),
            waker: None,
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn assert_runtime(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
    fn poll_pending(&mut self, cx: &Context) -> Poll<()> {
        if self.pending {
            Poll::Ready(())
        } else {
            self.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

pub(crate) fn new_record() -> SharedRecord {
    let id = Globals::with(|g| {
        let id = SignalId(g.next_signal_id);
        g.next_signal_id += 1;
        id
    });
    Rc::new(RefCell::new(DepRecord::new(id)))
}

pub(crate) fn new_observer_id() -> ObserverId {
    Globals::with(|g| {
        let id = ObserverId(g.next_observer_id);
        g.next_observer_id += 1;
        id
    })
}

/// Registers a record into the active tracking session, if any. Registering
/// the same record twice within one session is a no-op.
pub(crate) fn track_read(record: &SharedRecord) {
    Globals::with(|g| {
        if let Some(track) = &mut g.track {
            track
                .entry(record.borrow().id)
                .or_insert_with(|| record.clone());
        }
    })
}

/// Runs `f` under a fresh tracking session and returns its result together
/// with the records it read, in signal-id order.
///
/// The previous session is saved and restored around the call, so sessions
/// nest without losing the outer session's collection.
pub(crate) fn with_tracking<T>(f: impl FnOnce() -> T) -> (T, Vec<SharedRecord>) {
    struct Guard {
        saved: Option<Option<BTreeMap<SignalId, SharedRecord>>>,
    }
    impl Drop for Guard {
        fn drop(&mut self) {
            if let Some(saved) = self.saved.take() {
                Globals::with(|g| g.track = saved);
            }
        }
    }
    let saved = Globals::with(|g| replace(&mut g.track, Some(BTreeMap::new())));
    let mut guard = Guard { saved: Some(saved) };
    let value = f();
    let saved = guard.saved.take().flatten();
    let collected = Globals::with(|g| replace(&mut g.track, saved));
    let records = collected.map(|c| c.into_values().collect()).unwrap_or_default();
    (value, records)
}

/// Calls `f` with dependency tracking disabled, so signal reads inside it do
/// not subscribe. Nests freely inside an active `observe` run; the outer
/// session is restored on return.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    struct Guard {
        saved: Option<BTreeMap<SignalId, SharedRecord>>,
    }
    impl Drop for Guard {
        fn drop(&mut self) {
            Globals::with(|g| g.track = self.saved.take());
        }
    }
    let _guard = Guard {
        saved: Globals::with(|g| g.track.take()),
    };
    f()
}

/// Notification entry point for signal writes.
///
/// In deferred mode the record is queued and a flush is scheduled; in
/// immediate mode ([`without_batch`]) its subscribers run synchronously. A
/// signal already queued in the current flush cycle is skipped either way.
pub(crate) fn notify(record: &SharedRecord) {
    let run_now = Globals::with(|g| {
        let id = record.borrow().id;
        if !g.entered.insert(id) {
            return false;
        }
        match g.mode {
            BatchMode::Deferred => {
                g.assert_runtime();
                g.dirty.push(record.clone());
                if !g.pending {
                    g.pending = true;
                    g.wake();
                }
                false
            }
            BatchMode::Immediate => true,
        }
    });
    if run_now {
        run_subscribers(record);
    }
}

/// Invokes the record's subscribers that have not yet run in the current
/// flush cycle, marking each before it runs.
fn run_subscribers(record: &SharedRecord) {
    let live = record.borrow_mut().live_subscribers();
    for subscriber in live {
        if Globals::with(|g| g.invoked.insert(subscriber.id())) {
            subscriber.run();
        }
    }
}

/// One flush cycle: up to [`CASCADE_BUDGET`] rounds over the dirty queue,
/// then dedup-state reset, then the next-tick drain.
fn flush() {
    let mut budget = CASCADE_BUDGET;
    while budget > 0 {
        budget -= 1;
        let round = Globals::with(|g| take(&mut g.dirty));
        if round.is_empty() {
            break;
        }
        for record in &round {
            run_subscribers(record);
        }
    }
    Globals::with(|g| {
        g.entered.clear();
        g.invoked.clear();
        g.pending = false;
    });
    let ticks = Globals::with(|g| take(&mut g.next_ticks));
    for tick in ticks {
        tick();
    }
}

/// Runs `f` with immediate, non-batched notification: every effective write
/// inside it invokes the affected subscribers synchronously.
///
/// The batched mode is restored when `f` returns (also on panic). If no flush
/// is pending at that point, the dedup sets are reset so the sequence leaves
/// no state behind for the next batched write.
pub fn without_batch(f: impl FnOnce()) {
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            Globals::with(|g| {
                g.mode = BatchMode::Deferred;
                if !g.pending {
                    g.entered.clear();
                    g.invoked.clear();
                }
            });
        }
    }
    Globals::with(|g| g.mode = BatchMode::Immediate);
    let _guard = Guard;
    f();
}

/// Queues `f` to run exactly once, after the next flush cycle completes.
///
/// Callbacks run in the order they were queued. If no flush is ever
/// scheduled, queued callbacks never run; there is no timer-based drain.
pub fn next_tick(f: impl FnOnce() + 'static) {
    Globals::with(|g| g.next_ticks.push(Box::new(f)));
}

/// Drives flushes for the signals of one thread.
///
/// Writes coalesce into a pending flush; the host decides when that flush
/// runs by calling [`update`](Runtime::update), typically after
/// [`wait_for_ready`](Runtime::wait_for_ready) resolves. Dropping the
/// `Runtime` resets the engine state of the thread (signal ids excepted), so
/// each test can construct a fresh engine.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    _single_thread: PhantomData<Rc<()>>,
}

impl Runtime {
    pub fn new() -> Self {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        }
        Self {
            _single_thread: PhantomData,
        }
    }

    /// Runs flush cycles while one is pending.
    ///
    /// A flush's next-tick callbacks may write signals and schedule a further
    /// flush; `update` keeps going until nothing is pending.
    ///
    /// Returns `true` if any flush was performed.
    pub fn update(&mut self) -> bool {
        let mut handled = false;
        while Globals::with(|g| g.pending) {
            flush();
            handled = true;
        }
        handled
    }

    /// Waits until a flush is pending.
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Globals::with(|g| g.poll_pending(cx))).await
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        Globals::with(|g| {
            let next_signal_id = g.next_signal_id;
            let next_observer_id = g.next_observer_id;
            *g = Globals::new();
            g.next_signal_id = next_signal_id;
            g.next_observer_id = next_observer_id;
        });
    }
}
