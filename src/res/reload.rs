//! Content changes which do not go through the preload queue.
//!
//! Each of them claims the record by setting `PRELOADING` under the manager lock, which
//! keeps workers and the eviction sweep away, then changes the content without holding
//! the manager lock and finally publishes the new state.

use std::io::Read;
use std::sync::Arc;

use super::event::ResourceEvent;
use super::handle::ResourceHandle;
use super::loader::ResourceLoader;
use super::manager::{ManagerState, ResourceManagerShared};
use super::record::{ResourceFlags, ResourceRecord};
use super::resource::{Resource, ResourceLoadDesc, ResourceState, ResourceType, Unload};

/// Outcome of trying to claim a record outside of a load pass.
enum Claim {
    /// Claimed. The flag tells whether the record has been taken out of the queue.
    Claimed(bool),
    /// A worker owns the record.
    InFlight,
}

impl ManagerState {
    fn claim(&mut self, record: &Arc<ResourceRecord>) -> Claim {
        let entry = self.registry.entry_mut(record);
        if !entry.info.is_preloading() {
            entry.info.flags.insert(ResourceFlags::PRELOADING);
            return Claim::Claimed(false);
        }

        if self.queue.remove(record.id()) {
            Claim::Claimed(true)
        } else {
            Claim::InFlight
        }
    }
}

impl ResourceManagerShared {
    /// Unloads the content of `handle` if its source changed, or unconditionally if
    /// `force` is set. Returns true if the content has been unloaded.
    ///
    /// Resources which are not reloadable, or which are being loaded right now, are
    /// left alone. Content that came from a custom loader is only reloaded by force.
    pub fn reload_resource(&self, handle: &ResourceHandle, force: bool) -> bool {
        self.reload_record(handle.record(), force)
    }

    /// Reloads every resource. Returns the number of reloaded resources.
    pub fn reload_all_resources(&self, force: bool) -> usize {
        let records = {
            let mut state = self.lock();
            state.emit(ResourceEvent::ReloadAllResources);

            let records: Vec<_> = state.registry.iter().map(|v| v.record.clone()).collect();
            self.commit(state);
            records
        };

        let n = records.iter().filter(|v| self.reload_record(v, force)).count();
        info!("Reloaded {} of {} resources.", n, records.len());
        n
    }

    /// Reloads every resource of `kind`. Returns the number of reloaded resources.
    pub fn reload_resources_of_type(&self, kind: ResourceType, force: bool) -> usize {
        let records: Vec<_> = {
            let state = self.lock();
            state
                .registry
                .iter()
                .filter(|v| v.record.kind() == kind)
                .map(|v| v.record.clone())
                .collect()
        };

        records.iter().filter(|v| self.reload_record(v, force)).count()
    }

    /// Allows ordinary file reloads of a resource again, and reloads it.
    pub fn restore_resource(&self, handle: &ResourceHandle) -> bool {
        {
            let mut state = self.lock();
            let entry = state.registry.entry_mut(handle.record());
            entry.info.flags.remove(ResourceFlags::PREVENT_FILE_RELOAD);
        }

        self.reload_record(handle.record(), true)
    }

    /// Installs a loader which serves the next load pass of `handle` only, and forces a
    /// reload. Ordinary file reloads are prevented once the loader has been consumed.
    ///
    /// # Panics
    ///
    /// Panics if the previous custom loader has never been consumed.
    pub fn set_custom_loader<T: ResourceLoader + 'static>(&self, handle: &ResourceHandle, loader: T) {
        let pending = {
            let mut state = self.lock();
            let entry = state.registry.entry_mut(handle.record());
            if entry.info.flags.contains(ResourceFlags::HAS_CUSTOM_LOADER) {
                true
            } else {
                entry.info.custom_loader = Some(Arc::new(loader));
                entry.info.flags.insert(ResourceFlags::HAS_CUSTOM_LOADER);
                false
            }
        };

        if pending {
            panic!(
                "Custom loader of resource {} has been replaced before it was used.",
                handle.key()
            );
        }

        self.reload_record(handle.record(), true);
    }

    /// Returns the resource of `key`, or creates one which is loaded through `loader`
    /// once it is needed.
    pub fn get_existing_or_create_async<T>(&self, kind: ResourceType, key: &str, loader: T) -> ResourceHandle
    where
        T: ResourceLoader + 'static,
    {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(entry) = state.registry.get(kind, key) {
            return ResourceHandle::new(entry.record.clone());
        }

        let (entry, _) = state.registry.get_or_create(kind, key, false, now);
        entry.info.custom_loader = Some(Arc::new(loader));
        entry.info.flags.insert(ResourceFlags::HAS_CUSTOM_LOADER | ResourceFlags::IS_CREATED);
        ResourceHandle::new(entry.record.clone())
    }

    /// Fills the resource of `key` with `create` instead of a loader. Created resources
    /// are never reloaded.
    ///
    /// # Panics
    ///
    /// Panics if the resource is being loaded by a worker, or if `create` leaves it
    /// unloaded.
    pub fn create_resource<F>(&self, kind: ResourceType, key: &str, create: F) -> ResourceHandle
    where
        F: FnOnce(&mut dyn Resource) -> ResourceLoadDesc,
    {
        let now = self.clock.now();

        let (handle, claim) = {
            let mut state = self.lock();
            let record = {
                let (entry, _) = state.registry.get_or_create(kind, key, false, now);
                entry.info.flags.remove(ResourceFlags::RELOADABLE);
                entry.info.flags.insert(ResourceFlags::IS_CREATED);
                entry.record.clone()
            };

            let claim = state.claim(&record);
            (ResourceHandle::new(record), claim)
        };

        let was_queued = match claim {
            Claim::Claimed(was_queued) => was_queued,
            Claim::InFlight => panic!("Resource {} is being loaded, it can not be created.", key),
        };

        let (desc, memory) = {
            let mut content = handle.record().content.write().unwrap();
            let desc = create(&mut **content);
            (desc, content.memory_usage())
        };

        assert!(
            desc.state != ResourceState::Unloaded,
            "Resource {} stays unloaded after creation.",
            key
        );

        let mut state = self.lock();
        {
            let state: &mut ManagerState = &mut state;
            let entry = state.registry.entry_mut(handle.record());
            entry.info.desc = desc;
            entry.info.memory = Some(memory);
            entry.info.flags.remove(ResourceFlags::PRELOADING);

            let current = entry.info.state();
            state.emit(ResourceEvent::ContentUpdated(handle.id(), current));
            if was_queued {
                state.emit(ResourceEvent::LeftPreloadQueue(handle.id(), current));
            }
        }

        self.commit(state);
        self.watcher.notify_all();

        debug!("Created resource {}.", key);
        handle
    }

    /// Applies a low resolution version of the content, which is displayed until the
    /// full content has been loaded. Returns false if the resource is loaded already,
    /// has low resolution data, or is being loaded right now.
    pub fn set_resource_low_res_data(&self, handle: &ResourceHandle, stream: &mut dyn Read) -> bool {
        let record = handle.record();
        let now = self.clock.now();

        let was_queued = {
            let mut state = self.lock();
            let entry = state.registry.entry(record);
            if entry.info.flags.contains(ResourceFlags::HAS_LOW_RES_DATA)
                || entry.info.desc.state >= ResourceState::Loaded
            {
                return false;
            }

            match state.claim(record) {
                Claim::Claimed(was_queued) => was_queued,
                Claim::InFlight => return false,
            }
        };

        let (desc, memory) = {
            let mut content = record.content.write().unwrap();
            let desc = content.update_content(stream);
            (desc, content.memory_usage())
        };

        let mut state = self.lock();
        {
            let state: &mut ManagerState = &mut state;
            let entry = state.registry.entry_mut(record);
            entry.info.desc = desc;
            entry.info.memory = Some(memory);
            entry.info.flags.remove(ResourceFlags::PRELOADING);
            entry.info.flags.insert(ResourceFlags::HAS_LOW_RES_DATA);

            let current = entry.info.state();
            state.emit(ResourceEvent::ContentUpdated(record.id(), current));
            if was_queued {
                state.emit(ResourceEvent::LeftPreloadQueue(record.id(), current));
                if !desc.is_fully_loaded() {
                    state.enqueue(record, now, false);
                }
            }
        }

        self.commit(state);
        self.dispatch_one();
        self.watcher.notify_all();
        true
    }

    pub(crate) fn reload_record(&self, record: &Arc<ResourceRecord>, force: bool) -> bool {
        let (loader, request) = {
            let state = self.lock();
            let entry = match state.registry.try_entry(record) {
                Some(entry) => entry,
                None => return false,
            };

            if !entry.info.flags.contains(ResourceFlags::RELOADABLE) {
                return false;
            }

            if !force && entry.info.flags.contains(ResourceFlags::PREVENT_FILE_RELOAD) {
                return false;
            }

            if state.is_in_flight(record) {
                return false;
            }

            (state.registry.peek_loader(record), entry.load_request())
        };

        if !force && !loader.is_resource_outdated(&request) {
            return false;
        }

        let now = self.clock.now();

        let was_queued = {
            let mut state = self.lock();
            if state.registry.try_entry(record).is_none() {
                return false;
            }

            match state.claim(record) {
                Claim::Claimed(was_queued) => was_queued,
                Claim::InFlight => return false,
            }
        };

        debug!("Reload resource {} (force: {}).", request.key, force);

        let (desc, memory) = {
            let mut content = record.content.write().unwrap();
            let desc = content.unload_data(Unload::AllQualityLevels);
            (desc, content.memory_usage())
        };

        let mut state = self.lock();
        {
            let state: &mut ManagerState = &mut state;
            let entry = state.registry.entry_mut(record);
            entry.info.desc = desc;
            entry.info.memory = Some(memory);
            entry.info.flags.remove(ResourceFlags::PRELOADING | ResourceFlags::HAS_LOW_RES_DATA);

            let recent = entry.info.is_recently_used(now, self.params.reload_recency_window);
            let current = entry.info.state();
            state.emit(ResourceEvent::ContentUpdated(record.id(), current));

            if was_queued {
                state.emit(ResourceEvent::LeftPreloadQueue(record.id(), current));
            }

            if was_queued || (self.params.reload_preloads_recent && recent) {
                state.enqueue(record, now, false);
            }
        }

        self.commit(state);
        self.dispatch_one();
        true
    }
}
