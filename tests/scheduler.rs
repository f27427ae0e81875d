//! End-to-end tests against the public API.
//!
//! Scheduler state is thread-local, and the default test harness runs
//! each test on its own OS thread, so these do not need any shared
//! fixture or teardown between them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn preallocate_then_free_unused_round_trips_the_pool() {
    for n in [0, 7, 14, 21] {
        uthreads::preallocate(n).unwrap();
        assert_eq!(uthreads::pool_size(), n);
        assert_eq!(uthreads::free_unused(), n);
        assert_eq!(uthreads::pool_size(), 0);
    }
}

#[test]
fn yield_with_no_uthreads_is_a_no_op() {
    uthreads::yield_now();
    assert_eq!(uthreads::queue_size(), 0);
    assert_eq!(uthreads::pool_size(), 0);
}

#[test]
fn single_uthread_runs_to_completion() {
    let ran = Rc::new(Cell::new(false));
    let ran_in_thread = ran.clone();
    uthreads::create(move || {
        assert_eq!(uthreads::this_run_count(), 1);
        // The running uthread stays linked into the run queue as its
        // own head until it yields or retires.
        assert_eq!(uthreads::queue_size(), 1);
        ran_in_thread.set(true);
    })
    .unwrap();

    assert_eq!(uthreads::queue_size(), 1);
    uthreads::yield_now();

    assert!(ran.get());
    assert_eq!(uthreads::queue_size(), 0);
    assert_eq!(uthreads::pool_size(), 1, "the finished TCB returns to the pool");
}

#[test]
fn thirteen_uthreads_run_without_yielding() {
    const N: usize = 13;
    let count = Rc::new(Cell::new(0usize));
    for _ in 0..N {
        let count = count.clone();
        uthreads::create(move || {
            count.set(count.get() + 1);
        })
        .unwrap();
    }

    uthreads::yield_now();

    assert_eq!(count.get(), N);
    assert_eq!(uthreads::queue_size(), 0);
    assert_eq!(uthreads::pool_size(), N);
}

#[test]
fn single_uthread_tracks_run_count_across_internal_yields() {
    let history = Rc::new(RefCell::new(Vec::new()));
    let history_in_thread = history.clone();
    uthreads::create(move || {
        history_in_thread.borrow_mut().push(uthreads::this_run_count());
        uthreads::yield_now();
        history_in_thread.borrow_mut().push(uthreads::this_run_count());
        uthreads::yield_now();
        history_in_thread.borrow_mut().push(uthreads::this_run_count());
    })
    .unwrap();

    uthreads::yield_now();

    assert_eq!(*history.borrow(), vec![1, 2, 3]);
}

#[test]
fn thirteen_uthreads_interleave_round_robin_across_two_yields() {
    const N: usize = 13;
    let log = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..N {
        let log = log.clone();
        uthreads::create(move || {
            log.borrow_mut().push((uthreads::this_id(), uthreads::this_run_count()));
            uthreads::yield_now();
            log.borrow_mut().push((uthreads::this_id(), uthreads::this_run_count()));
            uthreads::yield_now();
            log.borrow_mut().push((uthreads::this_id(), uthreads::this_run_count()));
        })
        .unwrap();
    }

    uthreads::yield_now();

    let log = log.borrow();
    assert_eq!(log.len(), 3 * N);
    let first_round_ids: Vec<usize> = log[0..N].iter().map(|(id, _)| *id).collect();
    for round in 0..3 {
        let chunk = &log[round * N..(round + 1) * N];
        let ids: Vec<usize> = chunk.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, first_round_ids, "round {round} out of FIFO order");
        for (_, run_cnt) in chunk {
            assert_eq!(*run_cnt, round + 1);
        }
    }
}

#[test]
fn a_uthread_can_create_another_uthread_while_running() {
    let total = Rc::new(Cell::new(0));

    let total_outer = total.clone();
    uthreads::create(move || {
        total_outer.set(total_outer.get() + 1);
        let total_inner = total_outer.clone();
        uthreads::create(move || {
            total_inner.set(total_inner.get() + 1);
        })
        .unwrap();
        uthreads::yield_now();
    })
    .unwrap();

    uthreads::yield_now();

    assert_eq!(total.get(), 2);
    assert_eq!(uthreads::queue_size(), 0);
    assert_eq!(uthreads::pool_size(), 2, "both TCBs ever created return to the pool");
}
