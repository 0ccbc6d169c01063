//! Behavior tests for the parallel check queue and its RAII scope.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bitcoin_policy::{CheckQueue, QueueScope};

/// A check that counts its evaluations and returns a fixed result.
fn counting(counter: &Arc<AtomicUsize>, result: bool) -> impl FnOnce() -> bool + Send {
    let counter = Arc::clone(counter);
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        result
    }
}

#[test]
fn all_passing_checks_succeed() {
    let queue = CheckQueue::new(4);
    queue.start();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut scope = QueueScope::new(Some(&queue));
    scope.add((0..1000).map(|_| counting(&counter, true)).collect());
    assert!(scope.wait());
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
}

#[test]
fn single_failure_fails_the_batch() {
    let queue = CheckQueue::new(4);
    queue.start();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut scope = QueueScope::new(Some(&queue));
    scope.add((0..1000).map(|i| counting(&counter, i != 500)).collect());
    assert!(!scope.wait());
    // Work picked up after the failure may be skipped, never repeated
    assert!(counter.load(Ordering::SeqCst) <= 1000);
    drop(scope);

    // The queue came back reset: a fresh series succeeds
    let mut scope = QueueScope::new(Some(&queue));
    scope.add((0..100).map(|_| counting(&counter, true)).collect());
    assert!(scope.wait());
}

#[test]
fn checks_run_at_most_once() {
    let queue = CheckQueue::new(4);
    queue.start();

    let counters: Vec<Arc<AtomicUsize>> =
        (0..800).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let mut scope = QueueScope::new(Some(&queue));
    scope.add(
        counters
            .iter()
            .enumerate()
            .map(|(i, counter)| counting(counter, i != 400))
            .collect(),
    );
    assert!(!scope.wait());

    for counter in &counters {
        assert!(counter.load(Ordering::SeqCst) <= 1);
    }
}

#[test]
fn dropping_a_scope_waits_for_its_checks() {
    let queue = CheckQueue::new(4);
    queue.start();
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let mut scope = QueueScope::new(Some(&queue));
        scope.add((0..1000).map(|_| counting(&counter, true)).collect());
        // No explicit wait: the drop must finish the series
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1000);

    // The implicit wait left the queue reusable
    let mut scope = QueueScope::new(Some(&queue));
    scope.add((0..10).map(|_| counting(&counter, true)).collect());
    assert!(scope.wait());
}

#[test]
fn waiting_twice_returns_the_same_verdict() {
    let queue = CheckQueue::new(4);
    queue.start();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut scope = QueueScope::new(Some(&queue));
    scope.add((0..100).map(|i| counting(&counter, i != 7)).collect());
    assert!(!scope.wait());
    assert!(!scope.wait());
    assert!(counter.load(Ordering::SeqCst) <= 100);
}

#[test]
fn scope_without_a_queue_is_a_no_op() {
    let mut scope: QueueScope<'_, fn() -> bool> = QueueScope::new(None);
    scope.add(Vec::new());
    assert!(scope.wait());
}

#[test]
fn many_small_batches_across_many_series() {
    let queue = CheckQueue::new(4);
    queue.start();

    for series in 0..50 {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scope = QueueScope::new(Some(&queue));
        let mut total = 0;
        for batch in 0..7 {
            let len = 1 + (series * 7 + batch) % 37;
            total += len;
            scope.add((0..len).map(|_| counting(&counter, true)).collect());
        }
        assert!(scope.wait());
        assert_eq!(counter.load(Ordering::SeqCst), total);
    }
}

#[test]
fn closures_are_accepted_as_checks() {
    let queue = CheckQueue::new(2);
    queue.start();

    let mut scope = QueueScope::new(Some(&queue));
    scope.add((0..256).map(|i| move || i + 1 > i).collect::<Vec<_>>());
    assert!(scope.wait());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "add after wait")]
fn adding_after_wait_is_a_contract_violation() {
    fn pass() -> bool {
        true
    }

    let queue: CheckQueue<fn() -> bool> = CheckQueue::new(1);
    queue.start();

    let mut scope = QueueScope::new(Some(&queue));
    scope.add(vec![pass as fn() -> bool]);
    scope.wait();
    scope.add(vec![pass as fn() -> bool]);
}
