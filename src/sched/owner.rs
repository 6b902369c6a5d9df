//! Jobs bound to the thread which created the queue.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use super::pool::Job;

/// A FIFO of jobs which are only ever executed on the owner thread. Any thread may
/// push; only the owner pops.
pub struct OwnerQueue {
    owner: ThreadId,
    jobs: Mutex<VecDeque<Job>>,
}

impl OwnerQueue {
    /// Creates a queue owned by the calling thread.
    pub fn new() -> Self {
        OwnerQueue {
            owner: thread::current().id(),
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn push(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executes the oldest pending job. Returns false if there was nothing to do.
    ///
    /// # Panics
    ///
    /// Panics when called from any thread but the owner.
    pub fn run_one(&self) -> bool {
        assert!(
            self.is_owner_thread(),
            "Owner jobs must be executed on thread {:?}, not {:?}.",
            self.owner,
            thread::current().id()
        );

        // The lock is released before running the job, jobs may push new ones.
        let job = self.jobs.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Executes pending jobs until the queue is empty. Returns the number of executed jobs.
    pub fn run_all(&self) -> usize {
        let mut n = 0;
        while self.run_one() {
            n += 1;
        }
        n
    }

    /// Drops all pending jobs without executing them.
    pub fn clear(&self) -> usize {
        let jobs: Vec<_> = self.jobs.lock().unwrap().drain(..).collect();
        let n = jobs.len();
        drop(jobs);
        n
    }
}

impl Default for OwnerQueue {
    fn default() -> Self {
        OwnerQueue::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fifo() {
        let queue = Arc::new(OwnerQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..4 {
            let c = counter.clone();
            let q = queue.clone();
            thread::spawn(move || {
                q.push(Box::new(move || {
                    c.fetch_add(i, Ordering::SeqCst);
                }))
            })
            .join()
            .unwrap();
        }

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.run_all(), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert!(!queue.run_one());
    }

    #[test]
    fn owner_only() {
        let queue = Arc::new(OwnerQueue::new());
        queue.push(Box::new(|| {}));

        let q = queue.clone();
        assert!(thread::spawn(move || q.run_one()).join().is_err());
        assert_eq!(queue.clear(), 1);
    }
}
