use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// how long to wait for a completion before logging and retrying.
/// a wait that returns nothing is not an error, it just means every
/// in-flight task is slow.
const WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// in-flight window per worker
const WINDOW_PER_WORKER: usize = 5;

/// fixed-size worker pool for filesystem-bound batch work.
///
/// the pool itself is just a size; threads are scoped to each
/// [`imap_unordered`](WorkerPool::imap_unordered) call and joined when its
/// iterator is dropped, on every exit path.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPool {
    jobs: usize,
}

impl WorkerPool {
    /// create a pool, defaulting to available hardware concurrency
    pub fn new(jobs: Option<usize>) -> Self {
        let jobs = jobs
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1);
        Self { jobs }
    }

    /// worker count
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// maximum number of submitted-but-unconsumed tasks
    pub fn window(&self) -> usize {
        self.jobs * WINDOW_PER_WORKER
    }

    /// lazily apply `f` to `items` across the pool, yielding results as they
    /// complete, unordered.
    ///
    /// tasks are not materialized up front: at most `5 x jobs` items are in
    /// flight, and a completed slot is refilled from the pending iterator as
    /// results are consumed. `f` must handle its own per-item failures (return
    /// a `Result` and deal with it at the call site); a panic inside `f` is an
    /// unexpected scheduling failure and is propagated to the consumer.
    pub fn imap_unordered<I, T, R, F>(&self, items: I, f: F) -> ImapUnordered<I::IntoIter, T, R>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let window = self.window();
        let (task_tx, task_rx) = mpsc::sync_channel::<T>(window);
        let (result_tx, result_rx) = mpsc::channel::<R>();

        let task_rx = Arc::new(Mutex::new(task_rx));
        let f = Arc::new(f);
        let stop = Arc::new(AtomicBool::new(false));

        let workers = (0..self.jobs)
            .map(|i| {
                let task_rx = Arc::clone(&task_rx);
                let result_tx = result_tx.clone();
                let f = Arc::clone(&f);
                let stop = Arc::clone(&stop);
                std::thread::Builder::new()
                    .name(format!("silo-worker-{i}"))
                    .spawn(move || worker_loop(&task_rx, &result_tx, f.as_ref(), &stop))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ImapUnordered {
            source: items.into_iter(),
            source_done: false,
            task_tx: Some(task_tx),
            result_rx: Some(result_rx),
            in_flight: 0,
            window,
            stop,
            workers,
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(None)
    }
}

fn worker_loop<T, R, F: Fn(T) -> R>(
    task_rx: &Mutex<Receiver<T>>,
    result_tx: &Sender<R>,
    f: &F,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let item = {
            let rx = match task_rx.lock() {
                Ok(rx) => rx,
                Err(_) => return,
            };
            rx.recv()
        };
        let item = match item {
            Ok(item) => item,
            // sender dropped: no more tasks
            Err(_) => return,
        };
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let result = f(item);
        // receiver dropped: consumer stopped iterating
        if result_tx.send(result).is_err() {
            return;
        }
    }
}

/// lazy unordered result stream of [`WorkerPool::imap_unordered`].
///
/// dropping it (early break, error propagation, normal exhaustion) stops the
/// workers and joins them before returning.
pub struct ImapUnordered<I, T, R> {
    source: I,
    source_done: bool,
    task_tx: Option<SyncSender<T>>,
    result_rx: Option<Receiver<R>>,
    in_flight: usize,
    window: usize,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl<I, T, R> ImapUnordered<I, T, R>
where
    I: Iterator<Item = T>,
{
    /// top up the in-flight window from the pending iterator.
    /// sends never block: queued tasks are bounded by `in_flight`, which is
    /// kept strictly below the channel capacity before each send.
    fn refill(&mut self) {
        while !self.source_done && self.in_flight < self.window {
            match self.source.next() {
                Some(item) => {
                    let tx = self.task_tx.as_ref().expect("task channel closed early");
                    if tx.send(item).is_err() {
                        // every worker died; surface it below via the result channel
                        self.source_done = true;
                        return;
                    }
                    self.in_flight += 1;
                }
                None => {
                    self.source_done = true;
                    // close the task channel so idle workers exit
                    self.task_tx = None;
                }
            }
        }
    }
}

impl<I, T, R> ImapUnordered<I, T, R> {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.task_tx = None;
        self.result_rx = None;
        for handle in self.workers.drain(..) {
            // a worker panic here is re-raised unless we are already unwinding
            if let Err(payload) = handle.join() {
                if !std::thread::panicking() {
                    std::panic::resume_unwind(payload);
                }
            }
        }
    }
}

impl<I, T, R> Iterator for ImapUnordered<I, T, R>
where
    I: Iterator<Item = T>,
{
    type Item = R;

    fn next(&mut self) -> Option<R> {
        loop {
            self.refill();
            if self.in_flight == 0 {
                if self.source_done {
                    self.shutdown();
                    return None;
                }
                continue;
            }

            let rx = self.result_rx.as_ref().expect("result channel closed early");
            match rx.recv_timeout(WAIT_TIMEOUT) {
                Ok(result) => {
                    self.in_flight -= 1;
                    return Some(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        in_flight = self.in_flight,
                        "no task completed within {}s, still waiting",
                        WAIT_TIMEOUT.as_secs()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // workers are gone with tasks outstanding; join to
                    // propagate whatever killed them
                    self.shutdown();
                    unreachable!("worker pool terminated with tasks in flight");
                }
            }
        }
    }
}

impl<I, T, R> Drop for ImapUnordered<I, T, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
