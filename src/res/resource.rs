//! The content side of a resource: the trait every resource type implements and the
//! descriptors the manager keeps about it.

use std::any::{Any, TypeId};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::utils::hash64;

/// The loading state of a resource. States are ordered, a resource with state `s` has
/// satisfied every request for a state `<= s`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// No content has been loaded, the resource is only a placeholder.
    Unloaded,
    /// Meta information like dimensions are known, but no content has been loaded.
    UnloadedMetaInfoAvailable,
    /// Some quality levels are available.
    Loading,
    /// All required quality levels are available.
    Loaded,
    /// The loader could not find the content. Terminal until explicitly reloaded.
    LoadedResourceMissing,
}

impl Default for ResourceState {
    fn default() -> Self {
        ResourceState::Unloaded
    }
}

/// Describes the state of a resource after its content has been changed.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLoadDesc {
    pub state: ResourceState,
    /// Quality levels that could be unloaded to free memory.
    pub quality_discardable: u16,
    /// Quality levels that could still be streamed in.
    pub quality_loadable: u16,
}

impl ResourceLoadDesc {
    #[inline]
    pub fn new(state: ResourceState) -> Self {
        ResourceLoadDesc {
            state,
            quality_discardable: 0,
            quality_loadable: 0,
        }
    }

    #[inline]
    pub fn unloaded() -> Self {
        ResourceLoadDesc::new(ResourceState::Unloaded)
    }

    #[inline]
    pub fn loaded() -> Self {
        ResourceLoadDesc::new(ResourceState::Loaded)
    }

    #[inline]
    pub fn missing() -> Self {
        ResourceLoadDesc::new(ResourceState::LoadedResourceMissing)
    }

    #[inline]
    pub fn with_quality(mut self, discardable: u16, loadable: u16) -> Self {
        self.quality_discardable = discardable;
        self.quality_loadable = loadable;
        self
    }

    /// Returns true if there is no further loading work for this resource.
    #[inline]
    pub fn is_fully_loaded(&self) -> bool {
        self.state >= ResourceState::Loaded && self.quality_loadable == 0
    }
}

/// Memory held by the content of a resource, in bytes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub cpu: u64,
    pub gpu: u64,
}

impl MemoryUsage {
    #[inline]
    pub fn new(cpu: u64, gpu: u64) -> Self {
        MemoryUsage { cpu, gpu }
    }
}

/// How much content `Resource::unload_data` should release.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Unload {
    OneQualityLevel,
    AllQualityLevels,
}

/// Priorities scale the deadline of queued resources. `Critical` ones are serviced first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourcePriority {
    Critical,
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ResourcePriority {
    /// The multiplier applied to computed deadlines.
    #[inline]
    pub fn factor(self) -> u32 {
        self as u32 + 1
    }
}

impl Default for ResourcePriority {
    fn default() -> Self {
        ResourcePriority::Medium
    }
}

/// Where `Resource::update_content` is allowed to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateThread {
    /// Any thread, content is applied right on the I/O worker which fetched it.
    AnyThread,
    /// Only the owner thread of the manager, content is handed over to the
    /// finalization queue.
    OwnerThread,
}

/// The type-specific payload of a resource.
pub trait Resource: Any + Send + Sync {
    /// Applies the content read from `stream`. The returned state must not be `Unloaded`.
    fn update_content(&mut self, stream: &mut dyn Read) -> ResourceLoadDesc;

    /// Releases content and returns the state afterwards.
    fn unload_data(&mut self, what: Unload) -> ResourceLoadDesc;

    /// Memory currently held by the content.
    fn memory_usage(&self) -> MemoryUsage;

    /// Called by `ResourceManager::reset_all_resources`.
    fn reset(&mut self) {}
}

impl dyn Resource {
    #[inline]
    pub fn is<T: Resource>(&self) -> bool {
        Any::type_id(self) == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        if self.is::<T>() {
            unsafe { Some(&*(self as *const dyn Resource as *const T)) }
        } else {
            None
        }
    }

    pub fn downcast_mut<T: Resource>(&mut self) -> Option<&mut T> {
        if self.is::<T>() {
            unsafe { Some(&mut *(self as *mut dyn Resource as *mut T)) }
        } else {
            None
        }
    }
}

/// The kind tag of a resource, e.g. `ResourceType::new("Texture")`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType(&'static str);

impl ResourceType {
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        ResourceType(name)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stable hash of the canonical key of a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(u64);

impl ResourceId {
    #[inline]
    pub fn new<T: AsRef<str>>(key: T) -> Self {
        ResourceId(hash64(key.as_ref()))
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl<'a> From<&'a str> for ResourceId {
    fn from(key: &'a str) -> Self {
        ResourceId::new(key)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub type ResourceFactory = dyn Fn() -> Box<dyn Resource> + Send + Sync;

/// Everything the manager needs to know about a resource type.
#[derive(Clone)]
pub struct ResourceTypeDesc {
    pub factory: Arc<ResourceFactory>,
    pub update_thread: UpdateThread,
    pub priority: ResourcePriority,
}

impl ResourceTypeDesc {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn Resource> + Send + Sync + 'static,
    {
        ResourceTypeDesc {
            factory: Arc::new(factory),
            update_thread: UpdateThread::AnyThread,
            priority: ResourcePriority::default(),
        }
    }

    /// Allocates new instances with `T::default()`.
    pub fn of<T: Resource + Default>() -> Self {
        ResourceTypeDesc::new(|| Box::new(T::default()))
    }

    /// Content of this type must be applied on the owner thread.
    pub fn owner_thread(mut self) -> Self {
        self.update_thread = UpdateThread::OwnerThread;
        self
    }

    pub fn priority(mut self, priority: ResourcePriority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub fn create(&self) -> Box<dyn Resource> {
        (self.factory)()
    }
}

impl fmt::Debug for ResourceTypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResourceTypeDesc")
            .field("update_thread", &self.update_thread)
            .field("priority", &self.priority)
            .finish()
    }
}
