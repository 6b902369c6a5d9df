use std::sync::Arc;
use std::time::{Duration, Instant};

use super::event::ResourceEvent;
use super::manager::{ManagerState, ResourceManagerShared};
use super::record::{ResourceFlags, ResourceRecord};
use super::registry::RegistryEntry;
use super::resource::{ResourceState, Unload};

/// Drops references to resources that live outside the manager, so that they can be
/// freed. Callbacks are plain functions and registered at most once.
pub type CleanupCallback = fn(&ResourceManagerShared);

impl ManagerState {
    /// Takes an unreferenced record out of the registry. Records owned by a worker are
    /// skipped, queued ones are dequeued first.
    fn evict(&mut self, record: &Arc<ResourceRecord>) -> Option<RegistryEntry> {
        if record.reference_count() > 0 {
            return None;
        }

        if self.registry.entry(record).info.is_preloading() {
            if !self.queue.remove(record.id()) {
                return None;
            }

            let entry = self.registry.entry_mut(record);
            entry.info.flags.remove(ResourceFlags::PRELOADING);
            let current = entry.info.state();
            self.emit(ResourceEvent::LeftPreloadQueue(record.id(), current));
        }

        self.registry.remove(record.id())
    }
}

impl ResourceManagerShared {
    /// Registers a cleanup callback. Registering the same function again does nothing.
    pub fn add_resource_cleanup_callback(&self, callback: CleanupCallback) {
        let mut state = self.lock();
        if !state.cleanup_callbacks.iter().any(|v| *v as usize == callback as usize) {
            state.cleanup_callbacks.push(callback);
        }
    }

    /// Removes a cleanup callback. Returns false if it was not registered.
    pub fn clear_resource_cleanup_callback(&self, callback: CleanupCallback) -> bool {
        let mut state = self.lock();
        let len = state.cleanup_callbacks.len();
        state.cleanup_callbacks.retain(|v| *v as usize != callback as usize);
        state.cleanup_callbacks.len() != len
    }

    /// Runs and unregisters every cleanup callback. Called during shutdown, before the
    /// final sweep.
    ///
    /// # Panics
    ///
    /// Panics if a callback registers another one.
    pub fn execute_all_resource_cleanup_callbacks(&self) {
        let callbacks = std::mem::replace(&mut self.lock().cleanup_callbacks, Vec::new());
        for v in &callbacks {
            v(self);
        }

        let registered = self.lock().cleanup_callbacks.len();
        assert!(
            registered == 0,
            "{} resource cleanup callbacks have been registered during cleanup.",
            registered
        );
    }

    /// Evicts every resource without handles. With `aggressive`, sweeps again until a
    /// sweep frees nothing, which releases resources only kept alive by evicted ones.
    /// Returns the number of evicted resources.
    ///
    /// # Panics
    ///
    /// Panics if an unreferenced resource is still locked.
    pub fn free_unused_resources(&self, aggressive: bool) -> usize {
        let mut total = 0;

        loop {
            let victims = {
                let mut state = self.lock();
                let candidates: Vec<_> = state
                    .registry
                    .iter()
                    .filter(|v| v.record.reference_count() == 0)
                    .map(|v| v.record.clone())
                    .collect();

                if let Some(v) = candidates.iter().find(|v| v.lock_count() > 0) {
                    let key = v.key().to_owned();
                    drop(state);
                    panic!("Resource {} is locked without any handle.", key);
                }

                let victims: Vec<_> = candidates.iter().filter_map(|v| state.evict(v)).collect();
                self.commit(state);
                victims
            };

            let n = victims.len();
            self.release_victims(victims);
            total += n;

            if !aggressive || n == 0 {
                break;
            }
        }

        if total > 0 {
            debug!("Freed {} unused resources.", total);
        }

        total
    }

    /// Evicts resources without handles which have not been acquired within
    /// `threshold`, until `timeout` elapsed. Each call resumes the sweep where the
    /// previous one stopped. Returns the number of evicted resources.
    pub fn free_unused_resources_incremental(&self, timeout: Duration, threshold: Duration) -> usize {
        let start = Instant::now();
        let now = self.clock.now();
        let mut freed = 0;

        {
            let mut state = self.lock();
            if state.sweep.is_empty() {
                state.sweep = state.registry.ids();
            }
        }

        while start.elapsed() < timeout {
            let victim = {
                let mut state = self.lock();
                let id = match state.sweep.pop() {
                    Some(id) => id,
                    None => break,
                };

                let record = match state.registry.get_by_id(id) {
                    Some(entry) if !entry.info.is_recently_used(now, threshold) => {
                        entry.record.clone()
                    }
                    _ => continue,
                };

                if record.lock_count() > 0 && record.reference_count() == 0 {
                    drop(state);
                    panic!("Resource {} is locked without any handle.", record.key());
                }

                let victim = state.evict(&record);
                self.commit(state);
                victim
            };

            if let Some(victim) = victim {
                self.release_victims(vec![victim]);
                freed += 1;
            }
        }

        freed
    }

    fn release_victims(&self, victims: Vec<RegistryEntry>) {
        if victims.is_empty() {
            return;
        }

        for v in &victims {
            trace!("Free resource {}.", v.record.key());
            v.record.content.write().unwrap().unload_data(Unload::AllQualityLevels);
        }

        let mut state = self.lock();
        for v in &victims {
            state.emit(ResourceEvent::Deleted(v.record.id(), ResourceState::Unloaded));
        }

        self.commit(state);

        // Fallbacks held by the victims are released here.
        drop(victims);
    }
}
