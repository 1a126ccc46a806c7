use std::{cell::RefCell, rc::Rc};

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::core::{self, SharedRecord, SignalId};


/// Decides whether a write carries a change worth notifying.
///
/// Fixed at signal creation. [`AlwaysNotify`](Equality::AlwaysNotify) treats
/// every write as a change; a comparator judging the previous and next value
/// equal turns the write into a no-op.
pub enum Equality<T> {
    AlwaysNotify,
    Comparator(Rc<dyn Fn(&T, &T) -> bool>),
}

impl<T> Equality<T> {
    /// The default policy: values compare with `==`.
    pub fn partial_eq() -> Self
    where
        T: PartialEq,
    {
        Self::Comparator(Rc::new(|prev, next| prev == next))
    }
    pub fn comparator(f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::Comparator(Rc::new(f))
    }
    fn judges_equal(&self, prev: &T, next: &T) -> bool {
        match self {
            Self::AlwaysNotify => false,
            Self::Comparator(f) => f(prev, next),
        }
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        match self {
            Self::AlwaysNotify => Self::AlwaysNotify,
            Self::Comparator(f) => Self::Comparator(f.clone()),
        }
    }
}

struct SignalNode<T: 'static> {
    value: RefCell<T>,
    equality: Equality<T>,
    record: SharedRecord,
}

impl<T: 'static> SignalNode<T> {
    fn new(value: T, equality: Equality<T>) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            equality,
            record: core::new_record(),
        })
    }
    fn id(&self) -> SignalId {
        self.record.borrow().id()
    }
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        core::track_read(&self.record);
        f(&self.value.borrow())
    }
    fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }
    fn set(&self, next: T) {
        if self.equality.judges_equal(&self.value.borrow(), &next) {
            return;
        }
        *self.value.borrow_mut() = next;
        core::notify(&self.record);
    }
    fn set_with(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.value.borrow());
        self.set(next);
    }
    fn fmt_debug(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    where
        T: std::fmt::Debug,
    {
        match self.value.try_borrow() {
            Ok(value) => value.fmt(f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}

/// A reactive value cell with change notification.
///
/// Cloning is cheap and every clone addresses the same cell. Reads inside an
/// active `observe` run subscribe the observer to this signal; writes are
/// coalesced into the next flush unless [`without_batch`](crate::without_batch)
/// is active.
#[derive_ex(Clone, bound())]
pub struct Signal<T: 'static>(Rc<SignalNode<T>>);

impl<T: 'static> Signal<T> {
    /// Create a signal with the default equality policy: a write whose value
    /// compares equal to the current one is a no-op.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, Equality::partial_eq())
    }

    pub fn with_equality(value: T, equality: Equality<T>) -> Self {
        Self(SignalNode::new(value, equality))
    }

    pub fn id(&self) -> SignalId {
        self.0.id()
    }

    /// Gets the current value, subscribing the active tracking session.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.get()
    }

    /// Calls `f` with a reference to the current value, subscribing the
    /// active tracking session. Avoids the `Clone` bound of [`get`](Self::get).
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.0.with(f)
    }

    /// Sets the value and schedules notification, unless the equality policy
    /// judges the new value equal to the current one.
    pub fn set(&self, value: T) {
        self.0.set(value);
    }

    /// Sets the value computed from the current one. `f` runs exactly once
    /// per call; the result goes through the same equality gate as
    /// [`set`](Self::set).
    pub fn set_with(&self, f: impl FnOnce(&T) -> T) {
        self.0.set_with(f);
    }

    /// Splits the signal into a getter half and a setter half addressing the
    /// same cell.
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (ReadSignal(self.0.clone()), WriteSignal(self.0.clone()))
    }
}

/// The getter half of a signal.
#[derive_ex(Clone, bound())]
pub struct ReadSignal<T: 'static>(Rc<SignalNode<T>>);

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> SignalId {
        self.0.id()
    }
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.get()
    }
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.0.with(f)
    }
}

/// The setter half of a signal.
#[derive_ex(Clone, bound())]
pub struct WriteSignal<T: 'static>(Rc<SignalNode<T>>);

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> SignalId {
        self.0.id()
    }
    pub fn set(&self, value: T) {
        self.0.set(value);
    }
    pub fn set_with(&self, f: impl FnOnce(&T) -> T) {
        self.0.set_with(f);
    }
}

/// Create a signal as a `(getter, setter)` pair with the default equality
/// policy.
pub fn create_signal<T: PartialEq + 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(value).split()
}

/// Create a signal as a `(getter, setter)` pair with an explicit equality
/// policy.
pub fn create_signal_with<T: 'static>(
    value: T,
    equality: Equality<T>,
) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::with_equality(value, equality).split()
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt_debug(f)
    }
}
impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt_debug(f)
    }
}

impl<T> Serialize for Signal<T>
where
    T: Serialize + 'static,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match self.0.value.try_borrow() {
            Ok(value) => T::serialize(&*value, serializer),
            Err(_) => Err(serde::ser::Error::custom("borrowed")),
        }
    }
}
impl<'de, T> Deserialize<'de> for Signal<T>
where
    T: Deserialize<'de> + PartialEq + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Signal<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Signal::new)
    }
}
