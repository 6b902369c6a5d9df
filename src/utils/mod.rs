//! Commonly used utilities like hashing and timing.

pub mod hash;
pub mod time;

pub use self::hash::{hash64, FastHashMap, FastHashSet};
pub use self::time::{Clock, ManualClock, SystemClock, Timestamp};
