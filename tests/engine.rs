use std::{
    cell::Cell,
    future::Future,
    pin::pin,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Wake, Waker},
};

use assert_call::{call, CallRecorder};
use sigcell::{core::Runtime, create_signal, next_tick, observe, untrack, without_batch};

#[test]
fn coalesced_writes_settle_on_last_value() {
    let mut rt = Runtime::new();
    let runs = Rc::new(Cell::new(0));
    let seen = Rc::new(Cell::new(-1));
    let (get, set) = create_signal(0);
    let (_, _s) = observe({
        let runs = runs.clone();
        let seen = seen.clone();
        move || {
            runs.set(runs.get() + 1);
            seen.set(get.get());
        }
    });
    assert_eq!((runs.get(), seen.get()), (1, 0));

    set.set(1);
    set.set(2);
    rt.update();
    assert_eq!(seen.get(), 2);
    assert_eq!(runs.get(), 2);
}

#[test]
fn flush_follows_dirty_insertion_order() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let (a, set_a) = create_signal(0);
    let (b, set_b) = create_signal(0);
    let (_, _s1) = observe(move || call!("a {}", a.get()));
    let (_, _s2) = observe(move || call!("b {}", b.get()));
    cr.verify(["a 0", "b 0"]);

    set_b.set(1);
    set_a.set(1);
    rt.update();
    cr.verify(["b 1", "a 1"]);
}

#[test]
fn wait_for_ready_wakes_on_write() {
    struct Flag(AtomicBool);
    impl Wake for Flag {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let mut rt = Runtime::new();
    let (a, set) = create_signal(0);
    let (_, _s) = observe(move || {
        a.get();
    });

    let flag = Arc::new(Flag(AtomicBool::new(false)));
    let waker = Waker::from(flag.clone());
    let mut cx = Context::from_waker(&waker);
    {
        let mut ready = pin!(rt.wait_for_ready());
        assert!(ready.as_mut().poll(&mut cx).is_pending());
        assert!(!flag.0.load(Ordering::SeqCst));

        set.set(1);
        assert!(flag.0.load(Ordering::SeqCst));
        assert!(ready.as_mut().poll(&mut cx).is_ready());
    }
    assert!(rt.update());
}

#[test]
fn mixed_session_end_to_end() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let (items, set_items) = create_signal(vec!["a".to_string()]);
    let (selection, set_selection) = create_signal(0usize);

    let items2 = items.clone();
    let (_, _render) = observe(move || {
        let label = items2.with(|v| v.join(","));
        let selected = untrack(|| selection.get());
        call!("render {label} sel={selected}");
    });
    cr.verify("render a sel=0");

    // Selection changes alone never re-render; it is read untracked.
    set_selection.set(1);
    rt.update();
    cr.verify(());

    // A batched edit plus a queued follow-up.
    next_tick(|| call!("saved"));
    set_items.set_with(|v| {
        let mut v = v.clone();
        v.push("b".to_string());
        v
    });
    rt.update();
    cr.verify(["render a,b sel=1", "saved"]);

    // An immediate edit outside the batch.
    without_batch(|| set_items.set_with(|v| v[..1].to_vec()));
    cr.verify("render a sel=1");
}
