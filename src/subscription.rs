use std::{any::Any, mem::take, rc::Rc};

/// Disposer for an observer's subscriptions.
///
/// Dropping it removes exactly the subscriber slots the observer installed
/// and nothing else; the in-flight flush, if any, is not cancelled. Already
/// queued next-tick callbacks are unaffected.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    /// The noop disposer, returned when an observed computation read no
    /// signals.
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub(crate) fn from_rc(rc: Rc<dyn Any>) -> Self {
        Subscription(RawSubscription::Rc(rc))
    }
    /// Dispose now instead of at end of scope.
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::Rc(_) => {}
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    Rc(#[allow(unused)] Rc<dyn Any>),
}

/// Owns a batch of subscriptions so they can be torn down together.
#[derive(Default)]
pub struct SubscriptionBag(Vec<Subscription>);

impl SubscriptionBag {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, subscription: Subscription) {
        self.0.push(subscription);
    }
    /// Disposes everything added so far. The bag can keep collecting
    /// afterwards.
    pub fn dispose(&mut self) {
        self.0.clear();
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
