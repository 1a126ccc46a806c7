use std::{cell::RefCell, mem::take, rc::Rc};

use crate::{
    core::{self, ObserverId, SharedRecord, Slot, Subscriber},
    Subscription,
};


/// Runs `f` under dependency tracking and re-runs it whenever a signal it
/// read changes.
///
/// Returns `f`'s result together with a [`Subscription`]; dropping the
/// subscription removes exactly the subscriber slots this observer installed.
/// A run that reads no signals returns [`Subscription::empty`] and never
/// re-runs.
///
/// Every re-run is tracked again: the subscription set always mirrors the
/// signals the latest run actually read, so conditional reads subscribe and
/// unsubscribe as the condition flips.
pub fn observe<T>(mut f: impl FnMut() -> T + 'static) -> (T, Subscription) {
    let (value, records) = core::with_tracking(|| f());
    install(
        move || {
            f();
        },
        value,
        records,
    )
}

/// Like [`observe`], but collects dependencies from `probe` while installing
/// `f` as the callback.
///
/// `probe` runs once, tracked, and its result is returned; `f` is what
/// re-runs on changes (itself tracked, so its own reads take over the
/// subscription set from the first re-run on).
pub fn observe_with<T>(f: impl FnMut() + 'static, probe: impl FnOnce() -> T) -> (T, Subscription) {
    let (value, records) = core::with_tracking(probe);
    install(f, value, records)
}

fn install<T>(f: impl FnMut() + 'static, value: T, records: Vec<SharedRecord>) -> (T, Subscription) {
    if records.is_empty() {
        return (value, Subscription::empty());
    }
    let node = ObserverNode::new(f);
    node.attach(records);
    (value, Subscription::from_rc(node))
}

struct ObserverNode<F> {
    id: ObserverId,
    f: RefCell<F>,
    subscribed: RefCell<Vec<(SharedRecord, Slot)>>,
}

impl<F: FnMut() + 'static> ObserverNode<F> {
    fn new(f: F) -> Rc<Self> {
        Rc::new(Self {
            id: core::new_observer_id(),
            f: RefCell::new(f),
            subscribed: RefCell::new(Vec::new()),
        })
    }
    fn attach(self: &Rc<Self>, records: Vec<SharedRecord>) {
        let subscriber: Rc<dyn Subscriber> = self.clone();
        let mut subscribed = self.subscribed.borrow_mut();
        for record in records {
            let slot = record.borrow_mut().subscribe(Rc::downgrade(&subscriber));
            subscribed.push((record, slot));
        }
    }
    fn detach(&self) {
        for (record, slot) in take(&mut *self.subscribed.borrow_mut()) {
            record.borrow_mut().unsubscribe(slot);
        }
    }
}

impl<F: FnMut() + 'static> Subscriber for ObserverNode<F> {
    fn id(&self) -> ObserverId {
        self.id
    }
    fn run(self: Rc<Self>) {
        self.detach();
        let records = {
            let Ok(mut f) = self.f.try_borrow_mut() else {
                panic!("detect cyclic dependency");
            };
            let ((), records) = core::with_tracking(|| (*f)());
            records
        };
        self.attach(records);
    }
}

impl<F> Drop for ObserverNode<F> {
    fn drop(&mut self) {
        for (record, slot) in take(self.subscribed.get_mut()) {
            record.borrow_mut().unsubscribe(slot);
        }
    }
}
