//! Selects the loader servicing a resource.

use std::sync::Arc;

use super::loader::ResourceLoader;
use super::record::{ResourceFlags, ResourceInfo};
use super::resource::ResourceType;
use crate::utils::FastHashMap;

/// Loader lookup in precedence order: the one-shot custom loader of the record, the
/// default loader registered for its type, then the global default loader.
pub struct LoaderDispatch {
    fallback: Arc<dyn ResourceLoader>,
    loaders: FastHashMap<ResourceType, Arc<dyn ResourceLoader>>,
}

impl LoaderDispatch {
    pub fn new(fallback: Arc<dyn ResourceLoader>) -> Self {
        LoaderDispatch {
            fallback,
            loaders: FastHashMap::default(),
        }
    }

    /// Replaces the global default loader.
    pub fn set_fallback(&mut self, loader: Arc<dyn ResourceLoader>) {
        self.fallback = loader;
    }

    /// Registers the default loader of `kind`. Later registrations win.
    pub fn register(&mut self, kind: ResourceType, loader: Arc<dyn ResourceLoader>) {
        if self.loaders.insert(kind, loader).is_some() {
            debug!("Default loader of {} has been replaced.", kind);
        }
    }

    pub fn unregister(&mut self, kind: ResourceType) -> bool {
        self.loaders.remove(&kind).is_some()
    }

    /// The loader of `kind`, ignoring custom loaders.
    pub fn loader_for(&self, kind: ResourceType) -> Arc<dyn ResourceLoader> {
        self.loaders
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// The loader the next load of a record would use, without consuming anything.
    pub fn peek(&self, kind: ResourceType, info: &ResourceInfo) -> Arc<dyn ResourceLoader> {
        match info.custom_loader {
            Some(ref loader) => loader.clone(),
            None => self.loader_for(kind),
        }
    }

    /// The loader for a load pass that is about to start. A custom loader is consumed,
    /// and ordinary file reloads are prevented from then on.
    pub fn select(&self, kind: ResourceType, info: &mut ResourceInfo) -> Arc<dyn ResourceLoader> {
        match info.custom_loader.take() {
            Some(loader) => {
                info.flags.remove(ResourceFlags::HAS_CUSTOM_LOADER);
                info.flags.insert(ResourceFlags::PREVENT_FILE_RELOAD);
                loader
            }
            None => self.loader_for(kind),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::super::loader::{LoadData, LoadRequest};
    use super::super::resource::ResourcePriority;
    use super::*;
    use crate::utils::time::Timestamp;

    struct Tagged(&'static str);

    impl ResourceLoader for Tagged {
        fn open_data_stream(&self, _: &LoadRequest) -> Result<LoadData, failure::Error> {
            Ok(LoadData::new(self.0.as_bytes()))
        }
    }

    fn tag(loader: &Arc<dyn ResourceLoader>) -> String {
        let request = LoadRequest {
            id: "x".into(),
            key: "x".into(),
            kind: ResourceType::new("T"),
            modification_time: None,
        };

        let mut data = loader.open_data_stream(&request).unwrap();
        let mut s = String::new();
        data.stream.as_mut().unwrap().read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn precedence() {
        let texture = ResourceType::new("Texture");
        let mesh = ResourceType::new("Mesh");

        let mut dispatch = LoaderDispatch::new(Arc::new(Tagged("default")));
        dispatch.register(texture, Arc::new(Tagged("texture")));

        let mut info = ResourceInfo::new(ResourcePriority::Medium, true, Timestamp::default());
        assert_eq!(tag(&dispatch.select(mesh, &mut info)), "default");
        assert_eq!(tag(&dispatch.select(texture, &mut info)), "texture");

        dispatch.register(texture, Arc::new(Tagged("texture2")));
        assert_eq!(tag(&dispatch.loader_for(texture)), "texture2");

        info.custom_loader = Some(Arc::new(Tagged("custom")));
        info.flags.insert(ResourceFlags::HAS_CUSTOM_LOADER);
        assert_eq!(tag(&dispatch.peek(texture, &info)), "custom");
        assert_eq!(tag(&dispatch.select(texture, &mut info)), "custom");
        assert!(info.flags.contains(ResourceFlags::PREVENT_FILE_RELOAD));
        assert!(!info.flags.contains(ResourceFlags::HAS_CUSTOM_LOADER));
        assert_eq!(tag(&dispatch.select(texture, &mut info)), "texture2");

        assert!(dispatch.unregister(texture));
        assert_eq!(tag(&dispatch.loader_for(texture)), "default");
    }
}
