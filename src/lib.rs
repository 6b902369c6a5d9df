//! # What is This?
//!
//! An asynchronous resource streaming and cache manager. It turns opaque resource
//! identifiers into live in-memory objects, loads their content off the critical path
//! on a small pool of I/O threads, finalizes thread-affine content on a designated owner
//! thread, orders pending loads by deadline and reclaims resources nobody references
//! anymore.
//!
//! ```rust,ignore
//! use crayon_streaming::prelude::*;
//!
//! let manager = ResourceManager::new(ResourceManagerParams::default())?;
//! manager.register_resource_type(TEXTURE, ResourceTypeDesc::of::<Texture>());
//!
//! let handle = manager.get_resource(TEXTURE, "textures/crate.png", true);
//! manager.preload(&handle, Duration::from_millis(0));
//!
//! let lock = manager.acquire(&handle, AcquireMode::BlockTillLoaded);
//! lock.with(|texture: &Texture| println!("{:?}", texture.dimensions()));
//! ```

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;

pub extern crate crossbeam_deque;
pub extern crate smallvec;

pub mod errors;
pub mod utils;
pub mod res;
pub mod sched;

pub mod prelude {
    pub use crate::errors::{Error, Result};
    pub use crate::res::prelude::*;
    pub use crate::utils::time::{Clock, ManualClock, SystemClock, Timestamp};
}
