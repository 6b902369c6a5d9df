//! Loaders fetch the bytes of a resource. They are called from I/O worker threads.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::resource::{ResourceId, ResourceType};

/// Describes the resource a loader is asked to open.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub id: ResourceId,
    pub key: String,
    pub kind: ResourceType,
    /// The modification time of the content that is currently loaded.
    pub modification_time: Option<SystemTime>,
}

/// An opened data stream. A `None` stream is the "not found" sentinel.
pub struct LoadData {
    pub stream: Option<Box<dyn Read + Send>>,
    pub modification_time: Option<SystemTime>,
    pub description: String,
}

impl LoadData {
    pub fn new<T: Read + Send + 'static>(stream: T) -> Self {
        LoadData {
            stream: Some(Box::new(stream)),
            modification_time: None,
            description: String::new(),
        }
    }

    /// The content does not exist.
    pub fn not_found() -> Self {
        LoadData {
            stream: None,
            modification_time: None,
            description: String::new(),
        }
    }

    #[inline]
    pub fn with_modification_time(mut self, time: Option<SystemTime>) -> Self {
        self.modification_time = time;
        self
    }

    #[inline]
    pub fn with_description<T: Into<String>>(mut self, description: T) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    pub fn is_found(&self) -> bool {
        self.stream.is_some()
    }
}

impl fmt::Debug for LoadData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LoadData")
            .field("found", &self.is_found())
            .field("modification_time", &self.modification_time)
            .field("description", &self.description)
            .finish()
    }
}

pub trait ResourceLoader: Send + Sync {
    /// Opens the content of a resource. `Err` is a transient failure, while a
    /// `LoadData::not_found()` says the content does not exist. Both leave the resource
    /// missing.
    fn open_data_stream(&self, request: &LoadRequest) -> Result<LoadData, failure::Error>;

    /// Releases the stream once its content has been applied.
    fn close_data_stream(&self, _: &LoadRequest, _: LoadData) {}

    /// Returns true if the loaded content is older than its source.
    fn is_resource_outdated(&self, _: &LoadRequest) -> bool {
        false
    }
}

/// Reads resources from files below a root directory, keyed by relative path.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new<T: Into<PathBuf>>(root: T) -> Self {
        FileLoader { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file of a resource. Keys which would leave the root directory have none.
    pub fn path(&self, request: &LoadRequest) -> Option<PathBuf> {
        let key = Path::new(&request.key);
        let escapes = key.components().any(|v| match v {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => true,
            _ => false,
        });

        if escapes {
            None
        } else {
            Some(self.root.join(key))
        }
    }
}

impl ResourceLoader for FileLoader {
    fn open_data_stream(&self, request: &LoadRequest) -> Result<LoadData, failure::Error> {
        let path = match self.path(request) {
            Some(v) => v,
            None => {
                warn!("Resource key {} points outside of {}.", request.key, self.root.display());
                return Ok(LoadData::not_found().with_description(request.key.clone()));
            }
        };

        if !path.is_file() {
            return Ok(LoadData::not_found().with_description(path.display().to_string()));
        }

        let file = File::open(&path)?;
        let modified = file.metadata()?.modified().ok();
        Ok(LoadData::new(BufReader::new(file))
            .with_modification_time(modified)
            .with_description(path.display().to_string()))
    }

    fn is_resource_outdated(&self, request: &LoadRequest) -> bool {
        let modified = self
            .path(request)
            .and_then(|v| fs::metadata(v).ok())
            .and_then(|v| v.modified().ok());

        match (modified, request.modification_time) {
            (Some(v), Some(loaded)) => v != loaded,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Serves one in-memory blob, usually installed as a custom loader.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    bytes: Arc<Vec<u8>>,
    modification_time: Option<SystemTime>,
}

impl MemoryLoader {
    pub fn new<T: Into<Vec<u8>>>(bytes: T) -> Self {
        MemoryLoader {
            bytes: Arc::new(bytes.into()),
            modification_time: None,
        }
    }

    pub fn with_modification_time(mut self, time: SystemTime) -> Self {
        self.modification_time = Some(time);
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn open_data_stream(&self, _: &LoadRequest) -> Result<LoadData, failure::Error> {
        Ok(LoadData::new(Cursor::new(SharedBytes(self.bytes.clone())))
            .with_modification_time(self.modification_time)
            .with_description("memory"))
    }

    fn is_resource_outdated(&self, request: &LoadRequest) -> bool {
        self.modification_time.is_some() && self.modification_time != request.modification_time
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
