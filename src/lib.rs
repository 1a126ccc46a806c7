//! A fine-grained signal engine: dependency-tracking value cells plus a
//! batched update scheduler that coalesces writes into one deduplicated
//! flush, driven by an explicit [`core::Runtime`].

pub mod core;
mod observe;
mod signal;
mod subscription;

pub use observe::{observe, observe_with};
pub use signal::{create_signal, create_signal_with, Equality, ReadSignal, Signal, WriteSignal};
pub use subscription::{Subscription, SubscriptionBag};

pub use crate::core::{next_tick, untrack, without_batch, SignalId};
