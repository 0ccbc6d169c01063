use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::debug;

/// Number of completion slots in the termination protocol: the master plus
/// up to fifteen workers. The master always occupies slot 0, and every slot
/// without a live worker stays pre-armed as done.
pub const WORKER_SLOTS: usize = 16;

/// Most work items a thread grabs per lock acquisition, so the tail of a
/// batch spreads across the pool instead of ending up on one thread.
const MAX_GRAB: usize = 16;

/// A unit of verification work. The queue treats it as an opaque callable
/// returning whether the check passed.
pub trait Check: Send {
    fn check(self) -> bool;
}

impl<F> Check for F
where
    F: FnOnce() -> bool + Send,
{
    fn check(self) -> bool {
        self()
    }
}

/// Queue for verifications that have to be performed.
///
/// One thread (the master) pushes batches of checks onto the queue, where
/// they are processed by worker threads. When the master is done adding
/// work it calls [`wait`] and temporarily joins the pool as one more
/// worker until every check has been evaluated. Evaluation short-circuits:
/// the first failed check flips a shared flag and the remaining work is
/// discarded unevaluated.
///
/// Evaluation order is unspecified. Each check is evaluated at most once,
/// and [`wait`] returns only after every check added before it has been
/// evaluated or deliberately skipped.
///
/// # Example
/// ```
/// use bitcoin_policy::{CheckQueue, QueueScope};
///
/// let queue = CheckQueue::new(4);
/// queue.start();
///
/// let mut scope = QueueScope::new(Some(&queue));
/// scope.add((0..1000).map(|_| || true).collect());
/// assert!(scope.wait());
/// ```
///
/// [`wait`]: CheckQueue::wait
pub struct CheckQueue<T: Check> {
    shared: Arc<QueueShared<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared between the owning queue and its worker threads.
struct QueueShared<T> {
    /// Work buffer; order doesn't matter for booleans, so it is used as a
    /// stack
    buffer: Mutex<Vec<T>>,

    /// Workers block on this when out of work
    condition: Condvar,

    /// The running evaluation result; cleared by the first failed check,
    /// re-armed by the master at the end of each batch series
    all_ok: AtomicBool,

    /// Raised by the master when no more work is coming for this series
    all_added: AtomicBool,

    /// True between batch series; sleeping workers wait for the first add
    /// of the next series
    idle: AtomicBool,

    /// Shuts the worker threads down
    stopped: AtomicBool,

    /// Per-thread completion flags for the termination protocol; slots
    /// without a live worker are pre-armed true
    done: [AtomicBool; WORKER_SLOTS],

    /// Number of live worker threads (excluding the master)
    workers: usize,
}

impl<T: Check> CheckQueue<T> {
    /// Creates a queue served by `workers` threads plus the master.
    /// The count is clamped to the available non-master slots.
    pub fn new(workers: usize) -> Self {
        let workers = workers.min(WORKER_SLOTS - 1);
        let shared = Arc::new(QueueShared {
            buffer: Mutex::new(Vec::new()),
            condition: Condvar::new(),
            all_ok: AtomicBool::new(true),
            all_added: AtomicBool::new(false),
            idle: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            done: std::array::from_fn(|_| AtomicBool::new(false)),
            workers,
        });
        shared.reset_done();
        Self {
            shared,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Number of worker threads this queue was created with.
    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Spawns the worker threads. Called once, before the first batch.
    pub fn start(&self)
    where
        T: 'static,
    {
        let mut handles = self.handles.lock().unwrap();
        debug_assert!(handles.is_empty());

        for id in 1..=self.shared.workers {
            let shared = Arc::clone(&self.shared);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("checkqueue-{id}"))
                    .spawn(move || shared.worker_loop(id))
                    .expect("failed to spawn check queue worker"),
            );
        }
        debug!("check queue started with {} workers", self.shared.workers);
    }

    /// Wakes and joins the worker threads. The queue must be idle: every
    /// batch series has been closed with [`wait`].
    ///
    /// [`wait`]: CheckQueue::wait
    pub fn stop(&self) {
        debug_assert!(
            self.shared.idle.load(Ordering::SeqCst),
            "stopping a check queue in the middle of a batch series"
        );
        {
            let _buffer = self.shared.buffer.lock().unwrap();
            self.shared.stopped.store(true, Ordering::SeqCst);
        }
        self.shared.condition.notify_all();

        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Transfers a batch of checks into the queue. Sleeping workers are
    /// woken; evaluation begins immediately, concurrently with further
    /// `add` calls.
    pub fn add(&self, checks: Vec<T>) {
        if checks.is_empty() {
            return;
        }
        {
            let mut buffer = self.shared.buffer.lock().unwrap();
            self.shared.idle.store(false, Ordering::SeqCst);
            buffer.extend(checks);
        }
        self.shared.condition.notify_all();
    }

    /// Waits until every queued check has been evaluated (or skipped after
    /// a failure) and returns whether all of them passed. The calling
    /// thread joins the pool as slot 0 for the duration.
    ///
    /// Afterwards the queue is reset and ready for the next batch series.
    pub fn wait(&self) -> bool {
        {
            let _buffer = self.shared.buffer.lock().unwrap();
            self.shared.all_added.store(true, Ordering::SeqCst);
        }
        self.shared.condition.notify_all();
        self.shared.master_loop()
    }
}

impl<T: Check> Drop for CheckQueue<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T> QueueShared<T>
where
    T: Check,
{
    /// Re-arms the completion flags: participating slots to false, the rest
    /// permanently done.
    fn reset_done(&self) {
        for (slot, done) in self.done.iter().enumerate() {
            done.store(slot > self.workers, Ordering::SeqCst);
        }
    }

    /// Takes up to [`MAX_GRAB`] checks off the buffer.
    fn grab(&self, buffer: &mut Vec<T>, batch: &mut Vec<T>) {
        let take = buffer.len().min(MAX_GRAB);
        batch.extend(buffer.drain(buffer.len() - take..));
    }

    /// Evaluates a local batch, folding the results into the shared flag.
    /// A batch picked up after some check already failed is discarded
    /// unevaluated.
    fn execute(&self, batch: &mut Vec<T>) {
        let mut ok = self.all_ok.load(Ordering::SeqCst);
        for check in batch.drain(..) {
            if ok {
                ok = check.check();
            }
        }
        if !ok {
            self.all_ok.store(false, Ordering::SeqCst);
        }
    }

    /// Body of a worker thread.
    ///
    /// Sleeps whenever the buffer is empty: either the series is over
    /// (`all_added`, after raising its completion flag for the master) or
    /// work simply hasn't arrived yet. Every publication broadcasts while
    /// holding the buffer lock, so a sleeping worker cannot miss it.
    fn worker_loop(&self, id: usize) {
        let mut batch = Vec::with_capacity(MAX_GRAB);
        loop {
            {
                let mut buffer = self.buffer.lock().unwrap();
                loop {
                    if self.stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    if !buffer.is_empty() {
                        break;
                    }
                    if self.all_added.load(Ordering::SeqCst) {
                        self.done[id].store(true, Ordering::SeqCst);
                    }
                    buffer = self.condition.wait(buffer).unwrap();
                }
                self.grab(&mut buffer, &mut batch);
            }
            self.execute(&mut batch);
        }
    }

    /// Body of the master inside `wait`: drain the buffer alongside the
    /// workers, then busy-poll the completion flags rather than sleeping,
    /// so a missed wakeup can never strand the series.
    fn master_loop(&self) -> bool {
        let mut batch = Vec::with_capacity(MAX_GRAB);
        loop {
            {
                let mut buffer = self.buffer.lock().unwrap();
                if buffer.is_empty() {
                    drop(buffer);
                    return self.finish();
                }
                self.grab(&mut buffer, &mut batch);
            }
            self.execute(&mut batch);
        }
    }

    /// Termination: rendezvous with the workers, collect the verdict, and
    /// reset the queue for the next batch series.
    fn finish(&self) -> bool {
        self.done[0].store(true, Ordering::SeqCst);

        let mut reached = [false; WORKER_SLOTS];
        loop {
            let mut all_done = true;
            for (slot, done) in self.done.iter().enumerate() {
                reached[slot] = reached[slot] || done.load(Ordering::SeqCst);
                all_done = all_done && reached[slot];
            }
            if all_done {
                break;
            }
            std::hint::spin_loop();
        }

        // Every worker is parked: the verdict is final.
        let result = self.all_ok.swap(true, Ordering::SeqCst);

        // Reset under the lock: workers examine `all_added` and raise their
        // completion flag while holding it, so a parked worker can never
        // observe the old series state after the flags are re-armed.
        {
            let _buffer = self.buffer.lock().unwrap();
            self.all_added.store(false, Ordering::SeqCst);
            self.idle.store(true, Ordering::SeqCst);
            self.reset_done();
        }
        result
    }
}

/// RAII controller for a [`CheckQueue`] that guarantees the queued checks
/// are finished before the scope is left.
///
/// All `add` calls between the scope's creation and its [`wait`] form one
/// batch series. If the scope is dropped without an explicit `wait`, the
/// drop waits and discards the verdict, so no batch ever outlives the scope
/// that submitted it.
///
/// [`wait`]: QueueScope::wait
pub struct QueueScope<'a, T: Check> {
    queue: Option<&'a CheckQueue<T>>,
    result: Option<bool>,
}

impl<'a, T: Check> QueueScope<'a, T> {
    /// Creates a scope over `queue`; `None` makes every operation a no-op
    /// (and `wait` vacuously true).
    pub fn new(queue: Option<&'a CheckQueue<T>>) -> Self {
        Self {
            queue,
            result: None,
        }
    }

    /// Forwards a batch of checks to the queue. Adding after `wait` is a
    /// contract violation; the batch is dropped.
    pub fn add(&mut self, checks: Vec<T>) {
        debug_assert!(self.result.is_none(), "add after wait on the same scope");
        if self.result.is_some() {
            return;
        }
        if let Some(queue) = self.queue {
            queue.add(checks);
        }
    }

    /// Closes the batch series and returns whether every check passed.
    /// A second call returns the first call's verdict without touching the
    /// queue.
    pub fn wait(&mut self) -> bool {
        if let Some(result) = self.result {
            return result;
        }
        let result = match self.queue {
            Some(queue) => queue.wait(),
            None => true,
        };
        self.result = Some(result);
        result
    }
}

impl<T: Check> Drop for QueueScope<'_, T> {
    fn drop(&mut self) {
        if self.result.is_none() {
            self.wait();
        }
    }
}
