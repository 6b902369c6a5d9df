use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLockReadGuard};

use super::record::ResourceRecord;
use super::resource::{Resource, ResourceId, ResourceType};

/// A counted reference to a resource. Records are only evicted once every handle
/// has been dropped.
pub struct ResourceHandle {
    record: Arc<ResourceRecord>,
}

impl ResourceHandle {
    /// Callers must hold the manager lock, or another handle to the same record.
    pub(crate) fn new(record: Arc<ResourceRecord>) -> Self {
        record.reference_count.fetch_add(1, Ordering::SeqCst);
        ResourceHandle { record }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.record.id()
    }

    #[inline]
    pub fn key(&self) -> &str {
        self.record.key()
    }

    #[inline]
    pub fn kind(&self) -> ResourceType {
        self.record.kind()
    }

    #[inline]
    pub fn reference_count(&self) -> i32 {
        self.record.reference_count()
    }

    #[inline]
    pub fn lock_count(&self) -> i32 {
        self.record.lock_count()
    }

    #[inline]
    pub fn record(&self) -> &Arc<ResourceRecord> {
        &self.record
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        ResourceHandle::new(self.record.clone())
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        let prev = self.record.reference_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Unbalanced reference count of resource {}.", self.record.key());
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.record, &rhs.record)
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResourceHandle({:?}, {})", self.kind(), self.key())
    }
}

/// How far `acquire` drives the loading of a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquireMode {
    /// Never loads, the content is returned in whatever state it is.
    PointerOnly,
    /// Blocks until meta information is available.
    MetaInfo,
    /// Returns the loading fallback if the resource is not loaded yet, and queues it.
    AllowLoadingFallback,
    /// Blocks until the resource is loaded or known to be missing.
    BlockTillLoaded,
}

/// What kind of content an acquired lock points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// The content of the acquired resource itself.
    Final,
    /// The loading fallback, the resource is still being loaded.
    LoadingFallback,
    /// The missing fallback of the resource type, the resource is missing.
    MissingFallback,
    /// The resource is missing and there is no fallback. The content is whatever the
    /// type leaves in an unloaded instance.
    Missing,
}

/// Scoped access to the content of a resource. The lock count of the resource is
/// raised while this lives.
///
/// Content guards returned by `read` must not be held across another blocking `acquire`,
/// or across `reload` and `free_unused_resources` of the same resource.
pub struct ResourceLock {
    handle: ResourceHandle,
    result: AcquireResult,
}

impl ResourceLock {
    pub(crate) fn new(handle: ResourceHandle, result: AcquireResult, max_depth: i32) -> Self {
        let depth = handle.record.lock_count.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > max_depth {
            handle.record.lock_count.fetch_sub(1, Ordering::SeqCst);
            panic!(
                "Resource {} has been acquired {} times without release.",
                handle.key(),
                depth
            );
        }

        ResourceLock { handle, result }
    }

    #[inline]
    pub(crate) fn with_result(mut self, result: AcquireResult) -> Self {
        self.result = result;
        self
    }

    #[inline]
    pub fn result(&self) -> AcquireResult {
        self.result
    }

    /// The resource whose content is locked. Differs from the acquired one when a
    /// fallback has been returned.
    #[inline]
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<Box<dyn Resource>> {
        self.handle.record.content.read().unwrap()
    }

    /// Calls `func` with the content if it has type `T`.
    pub fn with<T, F, R>(&self, func: F) -> Option<R>
    where
        T: Resource,
        F: FnOnce(&T) -> R,
    {
        let content = self.read();
        content.downcast_ref::<T>().map(func)
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        let prev = self.handle.record.lock_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Unbalanced lock count of resource {}.", self.handle.key());
    }
}

impl fmt::Debug for ResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("handle", &self.handle)
            .field("result", &self.result)
            .finish()
    }
}
