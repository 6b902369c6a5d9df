//! A fixed-size, work-stealing pool of background threads.

use std::any::Any;
use std::cell::Cell;
use std::iter;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Stealer, Worker};

use super::latch::{Latch, LockLatch};
use crate::errors::{Error, Result};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The type for a panic handling closure. Note that this same closure
/// may be invoked multiple times in parallel.
pub type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

// Every pool gets an unique non-zero id, zero marks threads not owned by any pool.
static POOL_COUNTER: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static WORKER_THREAD_STATE: Cell<usize> = Cell::new(0);
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

struct PoolShared {
    id: usize,
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    watcher: Watcher,
    terminated: AtomicBool,
    panic_handler: Option<Box<PanicHandler>>,
}

impl ThreadPool {
    /// Spawns `num` named worker threads. A pool with zero threads is valid, it
    /// simply refuses every job.
    pub fn new(name: &str, num: usize, panic_handler: Option<Box<PanicHandler>>) -> Result<Self> {
        let workers: Vec<_> = (0..num).map(|_| Worker::new_fifo()).collect();
        let stealers = workers.iter().map(|v| v.stealer()).collect();

        let shared = Arc::new(PoolShared {
            id: POOL_COUNTER.fetch_add(1, Ordering::Relaxed),
            injector: Injector::new(),
            stealers,
            watcher: Watcher::new(),
            terminated: AtomicBool::new(false),
            panic_handler,
        });

        let pool = ThreadPool {
            shared,
            threads: Mutex::new(Vec::with_capacity(num)),
        };

        for (index, worker) in workers.into_iter().enumerate() {
            let primed = Arc::new(LockLatch::new());

            let sc = pool.shared.clone();
            let p = primed.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || PoolShared::main_loop(sc, index, worker, &p))
                .map_err(|err| Error::Spawn(err.to_string()))?;

            primed.wait();
            pool.threads.lock().unwrap().push(handle);
        }

        Ok(pool)
    }

    /// Gets the number of threads in this pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.stealers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the calling thread is one of the threads of this pool.
    #[inline]
    pub fn is_worker_thread(&self) -> bool {
        WORKER_THREAD_STATE.with(|v| v.get()) == self.shared.id
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Spawns an asynchronous job. Returns false if the pool has no threads or has
    /// been terminated, the job is dropped without being executed in that case.
    pub fn spawn<F>(&self, func: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_empty() || self.is_terminated() {
            return false;
        }

        self.shared.injector.push(Box::new(func));
        self.shared.watcher.notify_one();
        true
    }

    /// Signals the workers to quit once the pending jobs are drained, and blocks current
    /// thread until all of them finished gracefully.
    pub fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        self.shared.watcher.notify_all();

        let threads: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for v in threads {
            // The last owner of the pool might be one of its own jobs.
            if v.thread().id() == thread::current().id() {
                continue;
            }

            if v.join().is_err() {
                error!("Worker thread of pool {} exited abnormally.", self.shared.id);
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl PoolShared {
    fn main_loop(shared: Arc<PoolShared>, index: usize, worker: Worker<Job>, primed: &LockLatch) {
        WORKER_THREAD_STATE.with(|v| {
            assert_eq!(v.get(), 0);
            v.set(shared.id);
        });

        primed.set();

        let mut ms = 1;
        loop {
            if let Some(job) = shared.find_job(index, &worker) {
                shared.execute(job);
                ms = 1;
                continue;
            }

            if shared.terminated.load(Ordering::SeqCst) {
                break;
            }

            shared.watcher.wait_timeout(ms);
            ms = (ms * 2).min(48);
        }
    }

    fn find_job(&self, index: usize, local: &Worker<Job>) -> Option<Job> {
        local.pop().or_else(|| {
            iter::repeat_with(|| {
                self.injector.steal_batch_and_pop(local).or_else(|| {
                    self.stealers
                        .iter()
                        .enumerate()
                        .filter(|&(i, _)| i != index)
                        .map(|(_, v)| v.steal())
                        .collect()
                })
            })
            .find(|v| !v.is_retry())
            .and_then(|v| v.success())
        })
    }

    fn execute(&self, job: Job) {
        if let Err(err) = panic::catch_unwind(AssertUnwindSafe(job)) {
            // Unhandled panics abort the process.
            let guard = AbortOnDrop;
            if let Some(ref handler) = self.panic_handler {
                handler(err);
                mem::forget(guard);
            }
        }
    }
}

struct AbortOnDrop;

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        eprintln!("Job of thread {:?} panicked, aborting.", thread::current().name());
        process::abort();
    }
}

/// Timed wake-ups for threads that ran out of work.
pub struct Watcher(Mutex<()>, Condvar);

impl Watcher {
    pub fn new() -> Self {
        Watcher(Mutex::new(()), Condvar::new())
    }

    #[inline]
    pub fn wait_timeout(&self, ms: u64) {
        let v = self.0.lock().unwrap();
        let _ = self.1.wait_timeout(v, Duration::from_millis(ms));
    }

    #[inline]
    pub fn notify_one(&self) {
        self.1.notify_one()
    }

    #[inline]
    pub fn notify_all(&self) {
        self.1.notify_all()
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Watcher::new()
    }
}
