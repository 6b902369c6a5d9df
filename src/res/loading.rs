use std::sync::Arc;
use std::time::Duration;

use super::handle::{AcquireMode, AcquireResult, ResourceHandle, ResourceLock};
use super::manager::ResourceManagerShared;
use super::record::ResourceRecord;
use super::resource::ResourceState;

impl ResourceManagerShared {
    /// Requests the content of `handle` within `deadline`. A zero deadline puts the
    /// resource at the head of the preload queue. Does nothing for resources which are
    /// fully loaded or missing.
    pub fn preload(&self, handle: &ResourceHandle, deadline: Duration) {
        let now = self.clock.now();

        let mut state = self.lock();
        state.preload(handle.record(), now, deadline);
        self.commit(state);

        self.dispatch_one();
    }

    /// Locks the content of `handle` for reading, loading it first as `mode` requests.
    /// The lock count of the resource is raised for the whole call, loading included.
    ///
    /// Blocking modes help with the outstanding work while they wait, which makes
    /// nested acquires from inside `Resource::update_content` safe on any thread.
    ///
    /// # Panics
    ///
    /// Panics if the resource is locked more often than `max_acquire_depth` allows.
    pub fn acquire(&self, handle: &ResourceHandle, mode: AcquireMode) -> ResourceLock {
        let record = handle.record();
        let now = self.clock.now();
        let lock = self.lock_of(handle.clone(), AcquireResult::Final);

        let no_fallback = {
            let mut state = self.lock();
            state.registry.entry_mut(record).info.last_acquire = now;
            state.no_fallback_frames > 0
        };

        match mode {
            AcquireMode::PointerOnly => {
                return lock;
            }
            AcquireMode::MetaInfo => {
                self.ensure_loading_state(record, ResourceState::UnloadedMetaInfoAvailable);
            }
            AcquireMode::AllowLoadingFallback if !no_fallback => {
                if let Some(fallback) = self.loading_fallback_of(record) {
                    self.ensure_loading_state(fallback.record(), ResourceState::Loaded);
                    return self.lock_of(fallback, AcquireResult::LoadingFallback);
                }

                self.ensure_loading_state(record, ResourceState::Loaded);
            }
            AcquireMode::AllowLoadingFallback | AcquireMode::BlockTillLoaded => {
                self.ensure_loading_state(record, ResourceState::Loaded);
            }
        }

        let fallback = {
            let state = self.lock();
            let entry = state.registry.entry(record);
            if entry.info.desc.state != ResourceState::LoadedResourceMissing {
                None
            } else {
                let fallback = state
                    .registry
                    .fallbacks(record.kind())
                    .and_then(|v| v.missing.clone());

                Some(fallback)
            }
        };

        match fallback {
            None => lock,
            Some(Some(fallback)) => {
                self.ensure_loading_state(fallback.record(), ResourceState::Loaded);
                self.lock_of(fallback, AcquireResult::MissingFallback)
            }
            Some(None) => lock.with_result(AcquireResult::Missing),
        }
    }

    /// Loads `handle` right away, at the head of the preload queue, and blocks until it
    /// is loaded or known to be missing.
    pub fn force_load_resource_now(&self, handle: &ResourceHandle) {
        self.ensure_loading_state(handle.record(), ResourceState::Loaded);
    }

    /// `AcquireMode::AllowLoadingFallback` blocks like `AcquireMode::BlockTillLoaded`
    /// during the next `frames` calls of `per_frame_update`. Useful to render a frame
    /// without placeholders, e.g. for screenshots.
    pub fn force_no_fallback_acquisition(&self, frames: u32) {
        let mut state = self.lock();
        state.no_fallback_frames = state.no_fallback_frames.max(frames);
    }

    /// Frames left in which loading fallbacks are not handed out.
    pub fn force_no_fallback_frames(&self) -> u32 {
        self.lock().no_fallback_frames
    }

    /// Releases a lock. Same as dropping it.
    #[inline]
    pub fn release(&self, lock: ResourceLock) {
        drop(lock);
    }

    /// Waits until the preload queue is empty and no load pass is in flight. Returns
    /// true if any content has been loaded meanwhile.
    ///
    /// Content of owner thread types is only applied while the owner pumps, so calling
    /// this from other threads requires the owner to keep calling `per_frame_update`.
    pub fn finish_loading_of_resources(&self) -> bool {
        let start = self.lock().loaded_counter;

        let mut ms = 1;
        loop {
            {
                let state = self.lock();
                if state.queue.is_empty() && state.in_flight == 0 {
                    return state.loaded_counter != start;
                }
            }

            self.dispatch_one();

            if self.help_loading() {
                ms = 1;
            } else {
                self.watcher.wait_timeout(ms);
                ms = (ms * 2).min(48);
            }
        }
    }

    fn lock_of(&self, handle: ResourceHandle, result: AcquireResult) -> ResourceLock {
        ResourceLock::new(handle, result, self.params.max_acquire_depth)
    }

    /// Returns the loading fallback of a resource that is not loaded yet, and queues the
    /// resource for loading in the background.
    fn loading_fallback_of(&self, record: &Arc<ResourceRecord>) -> Option<ResourceHandle> {
        let now = self.clock.now();

        let mut state = self.lock();
        let fallback = {
            let entry = state.registry.entry(record);
            if entry.info.desc.state >= ResourceState::Loaded {
                return None;
            }

            entry.info.loading_fallback.clone().or_else(|| {
                state
                    .registry
                    .fallbacks(record.kind())
                    .and_then(|v| v.loading.clone())
            })
        };

        if fallback.is_some() && !state.registry.entry(record).info.is_preloading() {
            state.enqueue(record, now, false);
        }

        self.commit(state);
        self.dispatch_one();
        fallback
    }

    /// Blocks until the load state of `record` reaches `requested`. Missing resources
    /// are past every state.
    pub(crate) fn ensure_loading_state(&self, record: &Arc<ResourceRecord>, requested: ResourceState) {
        let mut ms = 1;

        loop {
            let now = self.clock.now();

            {
                let mut state = self.lock();
                if state.registry.entry(record).info.desc.state >= requested {
                    return;
                }

                // Promotion is a no-op if a worker owns the record already.
                state.preload(record, now, Duration::from_millis(0));
                self.commit(state);
            }

            self.dispatch_one();

            if self.help_loading() {
                ms = 1;
            } else {
                self.watcher.wait_timeout(ms);
                ms = (ms * 2).min(48);
            }
        }
    }
}
