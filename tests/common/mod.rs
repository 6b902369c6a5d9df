#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crayon_streaming::prelude::*;

pub const BLOB: ResourceType = ResourceType::new("Blob");
pub const GPU_BLOB: ResourceType = ResourceType::new("GpuBlob");

/// Content is the raw bytes of its data stream. Streams starting with `low:` only
/// provide the first quality level.
#[derive(Debug, Default)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub resets: usize,
}

impl Resource for Blob {
    fn update_content(&mut self, stream: &mut dyn Read) -> ResourceLoadDesc {
        self.bytes.clear();
        stream.read_to_end(&mut self.bytes).unwrap();

        if self.bytes.starts_with(b"low:") {
            ResourceLoadDesc::new(ResourceState::Loading).with_quality(0, 1)
        } else {
            ResourceLoadDesc::loaded()
        }
    }

    fn unload_data(&mut self, _: Unload) -> ResourceLoadDesc {
        self.bytes.clear();
        ResourceLoadDesc::unloaded()
    }

    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage::new(self.bytes.len() as u64, 0)
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Serves in-memory files and records every stream it opens.
#[derive(Clone, Default)]
pub struct TestLoader {
    files: Arc<Mutex<HashMap<String, (Vec<u8>, SystemTime)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl TestLoader {
    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(key.to_owned(), (bytes.to_vec(), SystemTime::now()));
    }

    /// Replaces a file and bumps its modification time.
    pub fn touch(&self, key: &str, bytes: &[u8]) {
        let mut files = self.files.lock().unwrap();
        let time = files
            .get(key)
            .map(|v| v.1 + Duration::from_secs(1))
            .unwrap_or_else(SystemTime::now);

        files.insert(key.to_owned(), (bytes.to_vec(), time));
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_owned());
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn opened_count(&self, key: &str) -> usize {
        self.opened.lock().unwrap().iter().filter(|v| *v == key).count()
    }
}

impl ResourceLoader for TestLoader {
    fn open_data_stream(&self, request: &LoadRequest) -> ::std::result::Result<LoadData, failure::Error> {
        self.opened.lock().unwrap().push(request.key.clone());

        if self.failing.lock().unwrap().contains(&request.key) {
            return Err(failure::format_err!("{} is broken.", request.key));
        }

        match self.files.lock().unwrap().get(&request.key) {
            Some((bytes, time)) => Ok(LoadData::new(Cursor::new(bytes.clone()))
                .with_modification_time(Some(*time))
                .with_description(format!("test:{}", request.key))),
            None => Ok(LoadData::not_found()),
        }
    }

    fn is_resource_outdated(&self, request: &LoadRequest) -> bool {
        match self.files.lock().unwrap().get(&request.key) {
            Some((_, time)) => request.modification_time != Some(*time),
            None => false,
        }
    }
}

pub struct Testbed {
    pub manager: ResourceManager,
    pub clock: Arc<ManualClock>,
    pub loader: TestLoader,
}

/// A manager without I/O workers, content is loaded by the threads that wait for it.
pub fn testbed() -> Testbed {
    testbed_with(ResourceManagerParams {
        io_workers: 0,
        ..ResourceManagerParams::default()
    })
}

pub fn testbed_with(params: ResourceManagerParams) -> Testbed {
    let _ = env_logger::try_init();

    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let manager = ResourceManager::with_clock(params, clock.clone()).unwrap();
    manager.register_resource_type(BLOB, ResourceTypeDesc::of::<Blob>());
    manager.register_resource_type(GPU_BLOB, ResourceTypeDesc::of::<Blob>().owner_thread());

    let loader = TestLoader::default();
    manager.set_default_loader(loader.clone());

    Testbed {
        manager,
        clock,
        loader,
    }
}

pub fn bytes_of(lock: &ResourceLock) -> Vec<u8> {
    lock.with(|blob: &Blob| blob.bytes.clone()).unwrap()
}

/// Collects every event fired by `manager`.
pub fn record_events(manager: &ResourceManager) -> Arc<Mutex<Vec<ResourceEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    manager.subscribe(move |v| e.lock().unwrap().push(*v));
    events
}
