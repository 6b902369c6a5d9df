use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A latch is a primitive signaling mechanism. It starts as false. Eventually
/// someone calls `set()` and it becomes true. You can test if it has been set
/// by calling `is_set()`.
pub trait Latch {
    /// Set the latch, signalling others.
    fn set(&self);
    /// Test if the latch is set.
    fn is_set(&self) -> bool;
}

/// A latch you can block on until it becomes true.
#[derive(Debug, Default)]
pub struct LockLatch {
    m: Mutex<bool>,
    v: Condvar,
}

impl LockLatch {
    #[inline]
    pub fn new() -> LockLatch {
        LockLatch {
            m: Mutex::new(false),
            v: Condvar::new(),
        }
    }

    /// Block until latch is set.
    pub fn wait(&self) {
        let mut guard = self.m.lock().unwrap();
        while !*guard {
            guard = self.v.wait(guard).unwrap();
        }
    }

    /// Block until latch is set or `timeout` elapsed. Returns whether the latch is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.m.lock().unwrap();
        if *guard {
            return true;
        }

        let (guard, _) = self.v.wait_timeout(guard, timeout).unwrap();
        *guard
    }
}

impl Latch for LockLatch {
    #[inline]
    fn set(&self) {
        let mut guard = self.m.lock().unwrap();
        *guard = true;
        self.v.notify_all();
    }

    #[inline]
    fn is_set(&self) -> bool {
        *self.m.lock().unwrap()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn cross_thread() {
        let latch = Arc::new(LockLatch::new());
        assert!(!latch.is_set());
        assert!(!latch.wait_timeout(Duration::from_millis(1)));

        let l = latch.clone();
        let t = thread::spawn(move || l.set());

        latch.wait();
        assert!(latch.is_set());
        t.join().unwrap();
    }
}
