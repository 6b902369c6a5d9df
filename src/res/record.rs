//! Per-resource state. `ResourceRecord` is shared with handles and workers, while the
//! bookkeeping in `ResourceInfo` is only ever touched under the manager lock.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use super::handle::ResourceHandle;
use super::loader::ResourceLoader;
use super::resource::{
    MemoryUsage, Resource, ResourceId, ResourceLoadDesc, ResourcePriority, ResourceState,
    ResourceType,
};
use crate::utils::time::Timestamp;

bitflags! {
    /// Independent booleans describing a resource.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u8 {
        /// Queued for loading or owned by a worker. Acts as the mutual-exclusion token
        /// of all content transitions.
        const PRELOADING = 1 << 0;
        /// The content may be reloaded when its source changed.
        const RELOADABLE = 1 << 1;
        /// The next load uses a one-shot custom loader.
        const HAS_CUSTOM_LOADER = 1 << 2;
        /// Ordinary file based reloads are ignored.
        const PREVENT_FILE_RELOAD = 1 << 3;
        /// A low resolution preview has been applied.
        const HAS_LOW_RES_DATA = 1 << 4;
        /// The content was created in code rather than loaded.
        const IS_CREATED = 1 << 5;
    }
}

/// One uniquely identified resource instance.
pub struct ResourceRecord {
    id: ResourceId,
    key: String,
    kind: ResourceType,
    pub(crate) reference_count: AtomicI32,
    pub(crate) lock_count: AtomicI32,
    pub(crate) content: RwLock<Box<dyn Resource>>,
}

impl ResourceRecord {
    pub(crate) fn new(id: ResourceId, key: String, kind: ResourceType, content: Box<dyn Resource>) -> Self {
        ResourceRecord {
            id,
            key,
            kind,
            reference_count: AtomicI32::new(0),
            lock_count: AtomicI32::new(0),
            content: RwLock::new(content),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The canonical key, with aliases already resolved.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    #[inline]
    pub fn reference_count(&self) -> i32 {
        self.reference_count.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn lock_count(&self) -> i32 {
        self.lock_count.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("reference_count", &self.reference_count())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

/// The bookkeeping of a record.
pub struct ResourceInfo {
    pub desc: ResourceLoadDesc,
    pub flags: ResourceFlags,
    pub priority: ResourcePriority,
    /// Explicit due date requested by `preload`, cleared once a worker claims the record.
    pub due_date: Option<Timestamp>,
    pub last_acquire: Timestamp,
    pub memory: Option<MemoryUsage>,
    pub modification_time: Option<SystemTime>,
    pub description: String,
    pub custom_loader: Option<Arc<dyn ResourceLoader>>,
    pub loading_fallback: Option<ResourceHandle>,
}

impl ResourceInfo {
    pub fn new(priority: ResourcePriority, reloadable: bool, now: Timestamp) -> Self {
        let mut flags = ResourceFlags::empty();
        flags.set(ResourceFlags::RELOADABLE, reloadable);

        ResourceInfo {
            desc: ResourceLoadDesc::unloaded(),
            flags,
            priority,
            due_date: None,
            last_acquire: now,
            memory: None,
            modification_time: None,
            description: String::new(),
            custom_loader: None,
            loading_fallback: None,
        }
    }

    #[inline]
    pub fn is_preloading(&self) -> bool {
        self.flags.contains(ResourceFlags::PRELOADING)
    }

    /// The state visible to users. Records waiting for their first quality level report
    /// `Loading`.
    pub fn state(&self) -> ResourceState {
        if self.is_preloading() && self.desc.state < ResourceState::Loading {
            ResourceState::Loading
        } else {
            self.desc.state
        }
    }

    /// Computes the deadline of a queued record. It is never older than `now`.
    pub fn deadline(&self, now: Timestamp, has_fallback: bool) -> Timestamp {
        if let Some(due) = self.due_date {
            return due.max(now);
        }

        let base = if self.desc.state >= ResourceState::Loaded {
            Duration::from_secs(5)
        } else if has_fallback {
            Duration::from_secs(1)
        } else {
            return now;
        };

        now + base * self.priority.factor()
    }

    /// Returns true if the record has been acquired within `window`.
    #[inline]
    pub fn is_recently_used(&self, now: Timestamp, window: Duration) -> bool {
        now - self.last_acquire < window
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state() {
        let mut info = ResourceInfo::new(ResourcePriority::Medium, true, Timestamp::default());
        assert_eq!(info.state(), ResourceState::Unloaded);

        info.flags.insert(ResourceFlags::PRELOADING);
        assert_eq!(info.state(), ResourceState::Loading);

        info.desc = ResourceLoadDesc::loaded().with_quality(0, 1);
        assert_eq!(info.state(), ResourceState::Loaded);
    }

    #[test]
    fn deadline() {
        let now = Timestamp::from_millis(1000);
        let mut info = ResourceInfo::new(ResourcePriority::Critical, true, now);
        assert_eq!(info.deadline(now, false), now);
        assert_eq!(info.deadline(now, true), now + Duration::from_secs(1));

        info.priority = ResourcePriority::Medium;
        assert_eq!(info.deadline(now, true), now + Duration::from_secs(4));

        info.desc = ResourceLoadDesc::loaded().with_quality(1, 1);
        assert_eq!(info.deadline(now, false), now + Duration::from_secs(20));

        info.due_date = Some(Timestamp::from_millis(10));
        assert_eq!(info.deadline(now, false), now);

        info.due_date = Some(Timestamp::from_millis(1500));
        assert_eq!(info.deadline(now, false), Timestamp::from_millis(1500));
    }
}
