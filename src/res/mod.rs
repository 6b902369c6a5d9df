//! The `ResourceManager` turns string keys into live resources and streams their content
//! in asynchronously.
//!
//! # Resource
//!
//! A _resource_ is an in-memory object with a stable identity. It is created the first
//! time its key is requested, in the `Unloaded` state, and stays at the same address for
//! its whole life. Users hold it through reference counted `ResourceHandle`s, and read its
//! content through scoped `ResourceLock`s.
//!
//! # Loading
//!
//! Content is read by a `ResourceLoader`, selected in this order: a one-shot custom
//! loader of the resource, the default loader registered for its type, and the global
//! default loader which reads files below `ResourceManagerParams::file_root`.
//!
//! Loading is driven by the preload queue. `preload` puts a resource into it with a
//! deadline, and the I/O workers claim its head one resource at a time. Threads that
//! block in `acquire` do not idle, they claim queued work themselves. This makes it safe
//! for a resource to acquire other resources while its own content is being applied.
//!
//! Some resource types can only be touched on one thread, e.g. GPU resources. They are
//! registered with `ResourceTypeDesc::owner_thread`, and their content is handed over to
//! the thread which created the manager, which applies it in `per_frame_update`.
//!
//! # Eviction
//!
//! Resources without handles are reclaimed by `free_unused_resources`, or incrementally
//! by `per_frame_update` if `auto_free_unused_timeout` is configured.
//!
//! # Events
//!
//! Listeners registered with `subscribe` observe the lifecycle of every resource. Events
//! are delivered in the order they happened, after the internal lock has been released.

pub mod alias;
pub mod dispatch;
pub mod event;
pub mod handle;
pub mod loader;
pub mod params;
pub mod queue;
pub mod record;
pub mod registry;
pub mod resource;

mod evict;
mod loading;
mod manager;
mod reload;
mod worker;

pub use self::evict::CleanupCallback;
pub use self::manager::{ResourceManager, ResourceManagerShared};

pub mod prelude {
    pub use super::event::{ListenerHandle, ResourceEvent};
    pub use super::handle::{AcquireMode, AcquireResult, ResourceHandle, ResourceLock};
    pub use super::loader::{FileLoader, LoadData, LoadRequest, MemoryLoader, ResourceLoader};
    pub use super::params::ResourceManagerParams;
    pub use super::record::ResourceFlags;
    pub use super::resource::{
        MemoryUsage, Resource, ResourceId, ResourceLoadDesc, ResourcePriority, ResourceState,
        ResourceType, ResourceTypeDesc, Unload, UpdateThread,
    };
    pub use super::{CleanupCallback, ResourceManager, ResourceManagerShared};
}
