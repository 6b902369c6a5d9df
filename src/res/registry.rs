//! The `ResourceRegistry` is the single source of truth mapping resource ids to records.
//! It also keeps the named aliases, the resource type table, the per-type fallbacks and
//! the loader registrations.

use std::sync::Arc;

use super::alias::AliasResolver;
use super::dispatch::LoaderDispatch;
use super::handle::ResourceHandle;
use super::loader::{LoadRequest, ResourceLoader};
use super::record::{ResourceInfo, ResourceRecord};
use super::resource::{ResourceId, ResourceType, ResourceTypeDesc};
use crate::utils::time::Timestamp;
use crate::utils::FastHashMap;

pub struct RegistryEntry {
    pub record: Arc<ResourceRecord>,
    pub info: ResourceInfo,
}

impl RegistryEntry {
    pub fn load_request(&self) -> LoadRequest {
        LoadRequest {
            id: self.record.id(),
            key: self.record.key().to_owned(),
            kind: self.record.kind(),
            modification_time: self.info.modification_time,
        }
    }
}

/// Decides from the canonical key whether a resource is created with an override type.
pub type OverrideDecider = dyn Fn(&str) -> bool + Send + Sync;

// Bounds the length of override chains.
const MAX_OVERRIDE_DEPTH: usize = 16;

#[derive(Clone)]
struct TypeOverride {
    derived: ResourceType,
    decider: Arc<OverrideDecider>,
}

#[derive(Default)]
pub struct TypeFallbacks {
    pub loading: Option<ResourceHandle>,
    pub missing: Option<ResourceHandle>,
}

pub struct ResourceRegistry {
    entries: FastHashMap<ResourceId, RegistryEntry>,
    aliases: AliasResolver,
    types: FastHashMap<ResourceType, ResourceTypeDesc>,
    fallbacks: FastHashMap<ResourceType, TypeFallbacks>,
    overrides: FastHashMap<ResourceType, Vec<TypeOverride>>,
    loaders: LoaderDispatch,
}

impl ResourceRegistry {
    pub fn new(default_loader: Arc<dyn ResourceLoader>) -> Self {
        ResourceRegistry {
            entries: FastHashMap::default(),
            aliases: AliasResolver::new(),
            types: FastHashMap::default(),
            fallbacks: FastHashMap::default(),
            overrides: FastHashMap::default(),
            loaders: LoaderDispatch::new(default_loader),
        }
    }

    pub fn register_type(&mut self, kind: ResourceType, desc: ResourceTypeDesc) {
        if self.types.insert(kind, desc).is_some() {
            warn!("Resource type {} has been registered twice.", kind);
        }
    }

    /// # Panics
    ///
    /// Panics if `kind` has never been registered.
    pub fn type_desc(&self, kind: ResourceType) -> &ResourceTypeDesc {
        match self.types.get(&kind) {
            Some(desc) => desc,
            None => panic!("Resource type {} has not been registered.", kind),
        }
    }

    pub fn type_desc_mut(&mut self, kind: ResourceType) -> &mut ResourceTypeDesc {
        match self.types.get_mut(&kind) {
            Some(desc) => desc,
            None => panic!("Resource type {} has not been registered.", kind),
        }
    }

    #[inline]
    pub fn has_type(&self, kind: ResourceType) -> bool {
        self.types.contains_key(&kind)
    }

    #[inline]
    pub fn aliases(&self) -> &AliasResolver {
        &self.aliases
    }

    #[inline]
    pub fn aliases_mut(&mut self) -> &mut AliasResolver {
        &mut self.aliases
    }

    #[inline]
    pub fn loaders(&self) -> &LoaderDispatch {
        &self.loaders
    }

    #[inline]
    pub fn loaders_mut(&mut self) -> &mut LoaderDispatch {
        &mut self.loaders
    }

    /// Registers the default loader of `kind`. Later registrations win.
    pub fn register_default_loader(&mut self, kind: ResourceType, loader: Arc<dyn ResourceLoader>) {
        self.loaders.register(kind, loader);
    }

    /// Resources of `base` whose key satisfies `decider` are created as `derived`.
    pub fn register_override(&mut self, base: ResourceType, derived: ResourceType, decider: Arc<OverrideDecider>) {
        assert!(base != derived, "Resource type {} can not override itself.", base);
        self.overrides
            .entry(base)
            .or_insert_with(Vec::new)
            .push(TypeOverride { derived, decider });
    }

    /// Removes every override to `derived`. Returns false if there was none.
    pub fn unregister_override(&mut self, derived: ResourceType) -> bool {
        let mut found = false;
        for v in self.overrides.values_mut() {
            let len = v.len();
            v.retain(|o| o.derived != derived);
            found |= v.len() != len;
        }

        self.overrides.retain(|_, v| !v.is_empty());
        found
    }

    /// The type a resource of `kind` with the canonical key `key` is created with.
    /// Overrides of the override are followed as well.
    pub fn find_type_override(&self, kind: ResourceType, key: &str) -> ResourceType {
        let mut kind = kind;
        for _ in 0..MAX_OVERRIDE_DEPTH {
            let next = self
                .overrides
                .get(&kind)
                .and_then(|v| v.iter().find(|o| (o.decider)(key)))
                .map(|o| o.derived);

            match next {
                Some(derived) => kind = derived,
                None => return kind,
            }
        }

        warn!("Resource type overrides of {} are too deep.", key);
        kind
    }

    /// Resolves aliases of `key` and returns the canonical key with its id.
    pub fn canonical<'a>(&'a self, key: &'a str) -> (&'a str, ResourceId) {
        let canonical = self.aliases.resolve(key);
        (canonical, ResourceId::new(canonical))
    }

    /// Returns the record of `key`, allocating an `Unloaded` one on a miss. The second
    /// value is true if the record has been created by this call.
    ///
    /// # Panics
    ///
    /// Panics if the record exists with another type, or `kind` is not registered.
    pub fn get_or_create(
        &mut self,
        kind: ResourceType,
        key: &str,
        reloadable: bool,
        now: Timestamp,
    ) -> (&mut RegistryEntry, bool) {
        let (canonical, id) = self.canonical(key);
        let canonical = canonical.to_owned();
        let kind = self.find_type_override(kind, &canonical);

        let types = &self.types;
        let mut created = false;
        let entry = self.entries.entry(id).or_insert_with(|| {
            let desc = match types.get(&kind) {
                Some(desc) => desc,
                None => panic!("Resource type {} has not been registered.", kind),
            };

            trace!("Create resource {} ({}).", canonical, kind);
            created = true;

            RegistryEntry {
                info: ResourceInfo::new(desc.priority, reloadable, now),
                record: Arc::new(ResourceRecord::new(id, canonical, kind, desc.create())),
            }
        });

        Self::check_type(entry, kind);
        (entry, created)
    }

    /// Looks up an existing record.
    pub fn get(&self, kind: ResourceType, key: &str) -> Option<&RegistryEntry> {
        let (canonical, id) = self.canonical(key);
        let kind = self.find_type_override(kind, canonical);
        let entry = self.entries.get(&id)?;
        Self::check_type(entry, kind);
        Some(entry)
    }

    /// Looks up the entry of `record`.
    ///
    /// # Panics
    ///
    /// Panics if the record has been evicted, which can only happen to records without
    /// any handle.
    pub fn entry(&self, record: &Arc<ResourceRecord>) -> &RegistryEntry {
        match self.entries.get(&record.id()) {
            Some(v) if Arc::ptr_eq(&v.record, record) => v,
            _ => panic!("Resource {} is not registered anymore.", record.key()),
        }
    }

    pub fn entry_mut(&mut self, record: &Arc<ResourceRecord>) -> &mut RegistryEntry {
        match self.entries.get_mut(&record.id()) {
            Some(v) if Arc::ptr_eq(&v.record, record) => v,
            _ => panic!("Resource {} is not registered anymore.", record.key()),
        }
    }

    /// Like `entry`, but tolerates records which have been evicted.
    pub fn try_entry(&self, record: &Arc<ResourceRecord>) -> Option<&RegistryEntry> {
        match self.entries.get(&record.id()) {
            Some(v) if Arc::ptr_eq(&v.record, record) => Some(v),
            _ => None,
        }
    }

    /// The loader the next load pass of `record` would use.
    pub fn peek_loader(&self, record: &Arc<ResourceRecord>) -> Arc<dyn ResourceLoader> {
        self.loaders.peek(record.kind(), &self.entry(record).info)
    }

    /// Selects the loader of a load pass which is about to start, consuming the custom
    /// loader of `record` if there is one.
    pub fn select_loader(&mut self, record: &Arc<ResourceRecord>) -> Arc<dyn ResourceLoader> {
        let entry = match self.entries.get_mut(&record.id()) {
            Some(v) if Arc::ptr_eq(&v.record, record) => v,
            _ => panic!("Resource {} is not registered anymore.", record.key()),
        };

        self.loaders.select(record.kind(), &mut entry.info)
    }

    /// Like `entry_mut`, but tolerates records which have been evicted.
    pub fn try_entry_mut(&mut self, record: &Arc<ResourceRecord>) -> Option<&mut RegistryEntry> {
        match self.entries.get_mut(&record.id()) {
            Some(v) if Arc::ptr_eq(&v.record, record) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn get_by_id(&self, id: ResourceId) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    #[inline]
    pub fn get_by_id_mut(&mut self, id: ResourceId) -> Option<&mut RegistryEntry> {
        self.entries.get_mut(&id)
    }

    /// Removes a record, no matter whether it is still referenced.
    #[inline]
    pub fn remove(&mut self, id: ResourceId) -> Option<RegistryEntry> {
        self.entries.remove(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegistryEntry> {
        self.entries.values_mut()
    }

    #[inline]
    pub fn ids(&self) -> Vec<ResourceId> {
        self.entries.keys().cloned().collect()
    }

    pub fn fallbacks(&self, kind: ResourceType) -> Option<&TypeFallbacks> {
        self.fallbacks.get(&kind)
    }

    pub fn fallbacks_mut(&mut self, kind: ResourceType) -> &mut TypeFallbacks {
        self.fallbacks.entry(kind).or_insert_with(TypeFallbacks::default)
    }

    /// Returns true if `entry` could display a loading fallback.
    pub fn has_loading_fallback(&self, entry: &RegistryEntry) -> bool {
        entry.info.loading_fallback.is_some()
            || self
                .fallbacks(entry.record.kind())
                .map(|v| v.loading.is_some())
                .unwrap_or(false)
    }

    /// Takes every fallback handle out of the registry.
    pub fn take_fallbacks(&mut self) -> Vec<ResourceHandle> {
        let mut handles = Vec::new();

        for (_, v) in self.fallbacks.drain() {
            handles.extend(v.loading);
            handles.extend(v.missing);
        }

        for v in self.entries.values_mut() {
            handles.extend(v.info.loading_fallback.take());
        }

        handles
    }

    fn check_type(entry: &RegistryEntry, kind: ResourceType) {
        assert!(
            entry.record.kind() == kind,
            "Resource {} has type {}, but has been requested as {}.",
            entry.record.key(),
            entry.record.kind(),
            kind
        );
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::super::loader::FileLoader;
    use super::super::resource::*;
    use super::*;

    #[derive(Default)]
    struct Nothing;

    impl Resource for Nothing {
        fn update_content(&mut self, _: &mut dyn Read) -> ResourceLoadDesc {
            ResourceLoadDesc::loaded()
        }

        fn unload_data(&mut self, _: Unload) -> ResourceLoadDesc {
            ResourceLoadDesc::unloaded()
        }

        fn memory_usage(&self) -> MemoryUsage {
            MemoryUsage::default()
        }
    }

    const TEXTURE: ResourceType = ResourceType::new("Texture");
    const MESH: ResourceType = ResourceType::new("Mesh");

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new(Arc::new(FileLoader::new(".")));
        registry.register_type(TEXTURE, ResourceTypeDesc::of::<Nothing>());
        registry.register_type(MESH, ResourceTypeDesc::of::<Nothing>().priority(ResourcePriority::Low));
        registry
    }

    #[test]
    fn get_or_create() {
        let mut registry = registry();
        let now = Timestamp::default();

        let a = {
            let (entry, created) = registry.get_or_create(TEXTURE, "a.png", true, now);
            assert!(created);
            assert_eq!(entry.info.desc.state, ResourceState::Unloaded);
            entry.record.clone()
        };

        let (entry, created) = registry.get_or_create(TEXTURE, "a.png", true, now);
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &entry.record));

        let (entry, _) = registry.get_or_create(MESH, "b.mesh", true, now);
        assert_eq!(entry.info.priority, ResourcePriority::Low);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn aliases() {
        let mut registry = registry();
        let now = Timestamp::default();
        registry.aliases_mut().add("Default", "Foo.Texture").unwrap();

        let a = registry.get_or_create(TEXTURE, "Default", true, now).0.record.clone();
        let b = registry.get_or_create(TEXTURE, "Foo.Texture", true, now).0.record.clone();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key(), "Foo.Texture");
        assert!(registry.get(TEXTURE, "Default").is_some());
    }

    #[test]
    #[should_panic]
    fn type_mismatch() {
        let mut registry = registry();
        registry.get_or_create(TEXTURE, "a", true, Timestamp::default());
        registry.get_or_create(MESH, "a", true, Timestamp::default());
    }

    #[test]
    #[should_panic]
    fn unregistered_type() {
        let mut registry = registry();
        registry.get_or_create(ResourceType::new("Sound"), "a", true, Timestamp::default());
    }

    #[test]
    fn overrides() {
        const COMPRESSED: ResourceType = ResourceType::new("CompressedTexture");
        const ASTC: ResourceType = ResourceType::new("AstcTexture");

        let mut registry = registry();
        registry.register_type(COMPRESSED, ResourceTypeDesc::of::<Nothing>());
        registry.register_type(ASTC, ResourceTypeDesc::of::<Nothing>());
        registry.register_override(TEXTURE, COMPRESSED, Arc::new(|key: &str| key.ends_with(".ktx")));
        registry.register_override(COMPRESSED, ASTC, Arc::new(|key: &str| key.starts_with("mobile/")));

        assert_eq!(registry.find_type_override(TEXTURE, "a.png"), TEXTURE);
        assert_eq!(registry.find_type_override(TEXTURE, "a.ktx"), COMPRESSED);
        assert_eq!(registry.find_type_override(TEXTURE, "mobile/a.ktx"), ASTC);

        let now = Timestamp::default();
        let (entry, _) = registry.get_or_create(TEXTURE, "a.ktx", true, now);
        assert_eq!(entry.record.kind(), COMPRESSED);
        assert!(registry.get(TEXTURE, "a.ktx").is_some());

        assert!(registry.unregister_override(ASTC));
        assert!(!registry.unregister_override(ASTC));
        assert_eq!(registry.find_type_override(TEXTURE, "mobile/a.ktx"), COMPRESSED);
    }
}
