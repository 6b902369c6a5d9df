use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use super::event::{EventBatch, EventBus, ListenerHandle, ResourceEvent};
use super::evict::CleanupCallback;
use super::handle::ResourceHandle;
use super::loader::{FileLoader, ResourceLoader};
use super::params::ResourceManagerParams;
use super::queue::PreloadQueue;
use super::record::{ResourceFlags, ResourceRecord};
use super::registry::ResourceRegistry;
use super::resource::{
    MemoryUsage, ResourceId, ResourcePriority, ResourceState, ResourceType, ResourceTypeDesc,
};
use super::worker::FinalizeSlots;
use crate::errors::Result;
use crate::sched::{OwnerQueue, ThreadPool, Watcher};
use crate::utils::time::{Clock, SystemClock, Timestamp};

/// The owner of the resource streaming system. Dropping it shuts the system down.
///
/// The thread which creates the manager becomes its owner thread. Content of resource
/// types registered with `ResourceTypeDesc::owner_thread` is only ever applied on it,
/// so the owner thread has to call `per_frame_update` regularly.
pub struct ResourceManager {
    shared: Arc<ResourceManagerShared>,
}

impl ResourceManager {
    pub fn new(params: ResourceManagerParams) -> Result<Self> {
        ResourceManager::with_clock(params, Arc::new(SystemClock::new()))
    }

    /// Creates a manager which reads time from `clock`.
    pub fn with_clock(params: ResourceManagerParams, clock: Arc<dyn Clock>) -> Result<Self> {
        params.validate()?;

        let pool = ThreadPool::new("res-io", params.io_workers, None)?;
        let default_loader = Arc::new(FileLoader::new(params.file_root.clone()));

        let state = ManagerState {
            registry: ResourceRegistry::new(default_loader),
            queue: PreloadQueue::new(params.deadline_update_interval, params.kick_out_window),
            events: EventBatch::new(),
            ticket: 0,
            in_flight: 0,
            io_task_running: false,
            allow_launch: true,
            loaded_counter: 0,
            unique_counter: 0,
            sweep: Vec::new(),
            cleanup_callbacks: Vec::new(),
            no_fallback_frames: 0,
            shutdown: false,
        };

        let shared = Arc::new_cyclic(|this| ResourceManagerShared {
            slots: FinalizeSlots::new(params.finalize_slots),
            params,
            clock,
            state: Mutex::new(state),
            pool,
            owner_jobs: OwnerQueue::new(),
            watcher: Watcher::new(),
            events: EventBus::new(),
            this: this.clone(),
        });

        info!(
            "Resource manager started with {} I/O workers on owner thread {:?}.",
            shared.pool.len(),
            shared.owner_jobs.owner()
        );

        Ok(ResourceManager { shared })
    }

    /// Returns the multi-thread friendly parts of the manager.
    #[inline]
    pub fn shared(&self) -> Arc<ResourceManagerShared> {
        self.shared.clone()
    }
}

impl Deref for ResourceManager {
    type Target = ResourceManagerShared;

    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("Resource manager dropped while panicking, skipped shutdown.");
            return;
        }

        self.shared.shutdown();
    }
}

pub struct ResourceManagerShared {
    pub(crate) params: ResourceManagerParams,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) pool: ThreadPool,
    pub(crate) owner_jobs: OwnerQueue,
    pub(crate) slots: FinalizeSlots,
    pub(crate) watcher: Watcher,
    pub(crate) events: EventBus,
    pub(crate) this: Weak<ResourceManagerShared>,
}

/// Everything guarded by the manager lock.
pub(crate) struct ManagerState {
    pub registry: ResourceRegistry,
    pub queue: PreloadQueue,
    pub events: EventBatch,
    pub ticket: u64,
    /// Records claimed by a worker but not finalized yet.
    pub in_flight: usize,
    pub io_task_running: bool,
    pub allow_launch: bool,
    pub loaded_counter: u64,
    pub unique_counter: u64,
    /// Remaining ids of the incremental sweep.
    pub sweep: Vec<ResourceId>,
    pub cleanup_callbacks: Vec<CleanupCallback>,
    /// Frames left in which loading fallbacks are not handed out.
    pub no_fallback_frames: u32,
    pub shutdown: bool,
}

impl ManagerState {
    #[inline]
    pub fn emit(&mut self, event: ResourceEvent) {
        self.events.push(event);
    }

    /// The public state of a record.
    pub fn state_of(&self, record: &Arc<ResourceRecord>) -> ResourceState {
        self.registry.entry(record).info.state()
    }

    /// Queues a record which is not preloading yet.
    pub fn enqueue(&mut self, record: &Arc<ResourceRecord>, now: Timestamp, high_priority: bool) {
        let has_fallback = self.registry.has_loading_fallback(self.registry.entry(record));

        let entry = self.registry.entry_mut(record);
        debug_assert!(!entry.info.is_preloading());

        entry.info.flags.insert(ResourceFlags::PRELOADING);
        let due_date = entry.info.deadline(now, has_fallback);
        let state = entry.info.state();

        self.queue.enqueue(record.clone(), due_date, high_priority);
        self.emit(ResourceEvent::EnteredPreloadQueue(record.id(), state));
    }

    /// Requests the content of a record to be available within `deadline`. A zero
    /// deadline puts the record at the head of the queue.
    pub fn preload(&mut self, record: &Arc<ResourceRecord>, now: Timestamp, deadline: Duration) {
        let high_priority = deadline.as_millis() == 0;
        let due_date = now + deadline;

        let entry = self.registry.entry_mut(record);
        if entry.info.desc.is_fully_loaded() {
            return;
        }

        entry.info.due_date = Some(match entry.info.due_date {
            Some(v) => v.min(due_date),
            None => due_date,
        });

        if entry.info.is_preloading() {
            // Might be owned by a worker already, which makes promotion a no-op.
            if high_priority {
                self.queue.promote(record.id(), due_date);
            }
        } else {
            self.enqueue(record, now, high_priority);
        }
    }

    /// Refreshes queue deadlines, releasing the records that got kicked out.
    pub fn update_deadlines(&mut self, now: Timestamp) {
        let registry = &self.registry;
        let kicked = self.queue.recompute_deadlines(now, |record| {
            let entry = registry.entry(record);
            entry.info.deadline(now, registry.has_loading_fallback(entry))
        });

        for record in kicked {
            let entry = self.registry.entry_mut(&record);
            entry.info.flags.remove(ResourceFlags::PRELOADING);
            entry.info.due_date = None;

            let state = entry.info.state();
            self.emit(ResourceEvent::LeftPreloadQueue(record.id(), state));
        }
    }

    /// Claimed records are preloading but have left the queue.
    #[inline]
    pub fn is_in_flight(&self, record: &Arc<ResourceRecord>) -> bool {
        self.registry.entry(record).info.is_preloading() && !self.queue.contains(record.id())
    }
}

impl ResourceManagerShared {
    /// Locks the manager state. A poisoned lock means a fatal assertion fired already,
    /// the state is handed out anyway so that shutdown does not cascade.
    pub(crate) fn lock(&self) -> MutexGuard<ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the lock and delivers the events collected under it.
    pub(crate) fn commit(&self, mut state: MutexGuard<ManagerState>) {
        if state.events.is_empty() {
            return;
        }

        let events = std::mem::replace(&mut state.events, EventBatch::new());
        let ticket = state.ticket;
        state.ticket += 1;
        drop(state);

        self.events.deliver(ticket, events);
    }

    #[inline]
    pub fn params(&self) -> &ResourceManagerParams {
        &self.params
    }

    #[inline]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        self.owner_jobs.is_owner_thread()
    }

    /// Returns true if the calling thread is an I/O worker of this manager.
    #[inline]
    pub fn is_io_thread(&self) -> bool {
        self.pool.is_worker_thread()
    }

    pub fn register_resource_type(&self, kind: ResourceType, desc: ResourceTypeDesc) {
        debug!("Register resource type {} ({:?}).", kind, desc);
        self.lock().registry.register_type(kind, desc);
    }

    /// Registers the default loader of `kind`. Later registrations win.
    pub fn register_default_loader<T: ResourceLoader + 'static>(&self, kind: ResourceType, loader: T) {
        info!("Register default loader of {}.", kind);
        self.lock()
            .registry
            .register_default_loader(kind, Arc::new(loader));
    }

    /// Replaces the loader used by types without default loader.
    pub fn set_default_loader<T: ResourceLoader + 'static>(&self, loader: T) {
        self.lock().registry.loaders_mut().set_fallback(Arc::new(loader));
    }

    /// Makes `name` an alias of `canonical`. Last writer wins.
    pub fn register_alias<T1, T2>(&self, name: T1, canonical: T2) -> ::std::result::Result<(), failure::Error>
    where
        T1: Into<String>,
        T2: Into<String>,
    {
        self.lock().registry.aliases_mut().add(name, canonical)
    }

    pub fn unregister_alias<T: AsRef<str>>(&self, name: T) -> bool {
        self.lock().registry.aliases_mut().remove(name)
    }

    /// Resources requested as `base` are created as `derived` if `decider` accepts their
    /// canonical key. Overrides of `derived` apply in turn.
    pub fn register_resource_override_type<F>(&self, base: ResourceType, derived: ResourceType, decider: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        debug!("Register resource type override {} -> {}.", base, derived);
        self.lock()
            .registry
            .register_override(base, derived, Arc::new(decider));
    }

    pub fn unregister_resource_override_type(&self, derived: ResourceType) -> bool {
        self.lock().registry.unregister_override(derived)
    }

    /// The type a resource requested as `kind` with `key` would be created with.
    pub fn find_resource_type_override(&self, kind: ResourceType, key: &str) -> ResourceType {
        let state = self.lock();
        let (canonical, _) = state.registry.canonical(key);
        state.registry.find_type_override(kind, canonical)
    }

    /// Returns the resource of `key`, allocating an `Unloaded` record if it does not
    /// exist yet. Never performs any I/O.
    ///
    /// # Panics
    ///
    /// Panics if the resource exists with another type, or `kind` is unregistered.
    pub fn get_resource(&self, kind: ResourceType, key: &str, reloadable: bool) -> ResourceHandle {
        let now = self.clock.now();
        let mut state = self.lock();
        let (entry, _) = state.registry.get_or_create(kind, key, reloadable, now);
        ResourceHandle::new(entry.record.clone())
    }

    /// Returns the resource of `key` if it exists.
    pub fn get_existing_resource(&self, kind: ResourceType, key: &str) -> Option<ResourceHandle> {
        let state = self.lock();
        state
            .registry
            .get(kind, key)
            .map(|v| ResourceHandle::new(v.record.clone()))
    }

    /// Creates an unique resource key like `"{prefix}-{n}"`.
    pub fn generate_unique_resource_id(&self, prefix: &str) -> String {
        let mut state = self.lock();
        loop {
            state.unique_counter += 1;
            let key = format!("{}-{}", prefix, state.unique_counter);
            if state.registry.get_by_id(ResourceId::new(&key)).is_none() {
                return key;
            }
        }
    }

    pub fn loading_state(&self, handle: &ResourceHandle) -> ResourceState {
        self.lock().state_of(handle.record())
    }

    pub fn resource_flags(&self, handle: &ResourceHandle) -> ResourceFlags {
        self.lock().registry.entry(handle.record()).info.flags
    }

    /// The memory usage reported after the last content change.
    pub fn memory_usage(&self, handle: &ResourceHandle) -> Option<MemoryUsage> {
        self.lock().registry.entry(handle.record()).info.memory
    }

    /// Discardable and loadable quality levels.
    pub fn quality_levels(&self, handle: &ResourceHandle) -> (u16, u16) {
        let state = self.lock();
        let desc = state.registry.entry(handle.record()).info.desc;
        (desc.quality_discardable, desc.quality_loadable)
    }

    pub fn resource_priority(&self, handle: &ResourceHandle) -> ResourcePriority {
        self.lock().registry.entry(handle.record()).info.priority
    }

    /// The description of the content source reported by the loader.
    pub fn resource_description(&self, handle: &ResourceHandle) -> String {
        self.lock().registry.entry(handle.record()).info.description.clone()
    }

    pub fn is_queued_for_loading(&self, handle: &ResourceHandle) -> bool {
        self.lock().queue.contains(handle.id())
    }

    /// Ids of queued resources, in the order workers would claim them.
    pub fn preload_queue(&self) -> Vec<ResourceId> {
        self.lock().queue.iter().map(|v| v.record.id()).collect()
    }

    pub fn preload_queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn resource_count(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn is_any_loading_in_progress(&self) -> bool {
        let state = self.lock();
        !state.queue.is_empty() || state.in_flight > 0
    }

    /// Changes the priority of resources of `kind` created from now on.
    pub fn set_type_priority(&self, kind: ResourceType, priority: ResourcePriority) {
        self.lock().registry.type_desc_mut(kind).priority = priority;
    }

    pub fn set_resource_priority(&self, handle: &ResourceHandle, priority: ResourcePriority) {
        let mut state = self.lock();

        let entry = state.registry.entry_mut(handle.record());
        if entry.info.priority == priority {
            return;
        }

        entry.info.priority = priority;
        let event = ResourceEvent::CategoryChanged(handle.id(), entry.info.state());
        state.emit(event);
        self.commit(state);
    }

    /// Displayed by `AcquireMode::AllowLoadingFallback` while this resource loads.
    pub fn set_resource_loading_fallback(&self, handle: &ResourceHandle, fallback: Option<ResourceHandle>) {
        let previous = {
            let mut state = self.lock();
            let entry = state.registry.entry_mut(handle.record());
            std::mem::replace(&mut entry.info.loading_fallback, fallback)
        };

        drop(previous);
    }

    /// Displayed by `AcquireMode::AllowLoadingFallback` while resources of `kind` load.
    pub fn set_type_loading_fallback(&self, kind: ResourceType, fallback: Option<ResourceHandle>) {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.registry.fallbacks_mut(kind).loading, fallback)
        };

        drop(previous);
    }

    /// Returned by `acquire` for resources of `kind` which are missing.
    pub fn set_type_missing_fallback(&self, kind: ResourceType, fallback: Option<ResourceHandle>) {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.registry.fallbacks_mut(kind).missing, fallback)
        };

        drop(previous);
    }

    /// Drops every fallback, so that they can be freed.
    pub fn clear_fallbacks(&self) {
        let mut state = self.lock();
        let fallbacks = state.registry.take_fallbacks();
        state.emit(ResourceEvent::ClearFallbacks);
        self.commit(state);

        debug!("Cleared {} fallbacks.", fallbacks.len());
    }

    /// Fires an `Exists` event for every resource.
    pub fn broadcast_exists_event(&self) {
        let mut state = self.lock();

        let events: Vec<_> = state
            .registry
            .iter()
            .map(|v| ResourceEvent::Exists(v.record.id(), v.info.state()))
            .collect();

        state.events.extend(events);
        self.commit(state);
    }

    /// Calls `Resource::reset` on every resource.
    pub fn reset_all_resources(&self) {
        let records: Vec<_> = {
            let state = self.lock();
            state.registry.iter().map(|v| v.record.clone()).collect()
        };

        for v in records {
            v.content.write().unwrap().reset();
        }
    }

    pub fn subscribe<F>(&self, func: F) -> ListenerHandle
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(func)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.events.unsubscribe(handle)
    }

    /// Applies pending owner-thread work, refreshes the preload queue and runs the
    /// incremental sweep if configured.
    ///
    /// # Panics
    ///
    /// Panics when called from any thread but the owner.
    pub fn per_frame_update(&self) {
        self.owner_jobs.run_all();

        let now = self.clock.now();
        let mut state = self.lock();
        state.no_fallback_frames = state.no_fallback_frames.saturating_sub(1);
        state.update_deadlines(now);
        self.commit(state);

        self.dispatch_one();

        if let Some(timeout) = self.params.auto_free_unused_timeout {
            self.free_unused_resources_incremental(timeout, self.params.auto_free_unused_threshold);
        }
    }

    /// Stops loading. The preload queue is emptied and in-flight work is waited for.
    pub fn engine_about_to_shutdown(&self) {
        {
            let mut state = self.lock();
            state.allow_launch = false;

            for v in state.queue.drain() {
                let entry = state.registry.entry_mut(&v.record);
                entry.info.flags.remove(ResourceFlags::PRELOADING);
                entry.info.due_date = None;

                let event = ResourceEvent::LeftPreloadQueue(v.record.id(), entry.info.state());
                state.emit(event);
            }

            self.commit(state);
        }

        let mut ms = 1;
        loop {
            {
                let state = self.lock();
                if state.in_flight == 0 && !state.io_task_running {
                    break;
                }
            }

            if self.is_owner_thread() {
                if self.owner_jobs.run_one() {
                    ms = 1;
                    continue;
                }
            } else if self.owner_jobs.clear() > 0 {
                warn!("Abandoned owner thread work during shutdown.");
            }

            self.watcher.wait_timeout(ms);
            ms = (ms * 2).min(48);
        }
    }

    /// Shuts the manager down: stops loading, fires `ManagerShuttingDown`, runs the
    /// cleanup callbacks, clears the fallbacks, frees everything unused and joins the
    /// I/O workers. Resources that are
    /// still referenced afterwards are reported.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.shutdown {
                return;
            }

            state.shutdown = true;
        }

        self.engine_about_to_shutdown();

        let mut state = self.lock();
        state.emit(ResourceEvent::ManagerShuttingDown);
        self.commit(state);

        self.execute_all_resource_cleanup_callbacks();
        self.clear_fallbacks();
        self.free_unused_resources(true);

        self.pool.terminate();
        self.owner_jobs.clear();

        let state = self.lock();
        for v in state.registry.iter() {
            error!(
                "Resource {} is still referenced {} times at shutdown.",
                v.record.key(),
                v.record.reference_count()
            );
        }

        info!("Resource manager has been shut down.");
    }
}
