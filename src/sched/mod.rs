//! Worker threads for the resource manager.
//!
//! Two kinds of executors live here. A `ThreadPool` runs blocking I/O jobs on a fixed set
//! of background threads, while an `OwnerQueue` collects jobs that must run on one
//! designated thread and only executes them when that thread pumps it.

pub mod latch;
pub mod owner;
pub mod pool;

pub use self::latch::{Latch, LockLatch};
pub use self::owner::OwnerQueue;
pub use self::pool::{Job, PanicHandler, ThreadPool, Watcher};
