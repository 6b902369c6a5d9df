//! The unit of I/O work and the finalization of loaded content.
//!
//! A load pass claims the head of the preload queue under the manager lock, opens the
//! data stream without holding any lock, and applies it to the content. Types bound to
//! the owner thread are handed over through a bounded set of finalize slots, the I/O
//! thread blocks when every slot is occupied.

use std::sync::{Arc, Mutex};

use super::event::ResourceEvent;
use super::loader::{LoadData, LoadRequest, ResourceLoader};
use super::manager::{ManagerState, ResourceManagerShared};
use super::record::{ResourceFlags, ResourceRecord};
use super::resource::{ResourceLoadDesc, ResourceState, UpdateThread};
use crate::sched::{Latch, LockLatch};

/// A claimed record together with its opened content.
pub(crate) struct LoadJob {
    record: Arc<ResourceRecord>,
    request: LoadRequest,
    loader: Arc<dyn ResourceLoader>,
    data: LoadData,
}

/// Round-robin slots bounding the hand-overs to the owner thread. Each slot holds the
/// latch of the last hand-over made through it.
pub(crate) struct FinalizeSlots {
    slots: Mutex<(usize, Vec<Option<Arc<LockLatch>>>)>,
}

impl FinalizeSlots {
    pub fn new(num: usize) -> Self {
        FinalizeSlots {
            slots: Mutex::new((0, vec![None; num.max(1)])),
        }
    }

    /// Takes the next slot. Returns the latch of the new hand-over together with the
    /// latch of the previous hand-over made through the same slot, which has to be
    /// waited for once the new one is visible to the owner thread.
    pub fn acquire(&self) -> (Arc<LockLatch>, Option<Arc<LockLatch>>) {
        let latch = Arc::new(LockLatch::new());

        let previous = {
            let mut slots = self.slots.lock().unwrap();
            let (ref mut next, ref mut latches) = *slots;
            let index = *next;
            *next = (index + 1) % latches.len();
            std::mem::replace(&mut latches[index], Some(latch.clone()))
        };

        (latch, previous)
    }
}

/// Finalization of a load pass executed by the owner thread. Dropping it without
/// running rolls the load pass back.
struct FinalizeTask {
    shared: Arc<ResourceManagerShared>,
    job: Option<LoadJob>,
    done: Arc<LockLatch>,
}

impl FinalizeTask {
    fn run(mut self) {
        if let Some(job) = self.job.take() {
            finalize(&self.shared, job);
        }
    }
}

impl Drop for FinalizeTask {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            abandon(&self.shared, job);
        }

        self.done.set();
    }
}

impl ResourceManagerShared {
    /// Launches a background I/O task if the queue is not empty and no other task is
    /// running. Without I/O workers, content is only loaded by threads waiting for it.
    pub(crate) fn dispatch_one(&self) {
        {
            let mut state = self.lock();
            if !state.allow_launch || state.io_task_running || state.queue.is_empty() {
                return;
            }

            if self.pool.is_empty() || self.pool.is_terminated() {
                return;
            }

            state.io_task_running = true;
        }

        let launched = match self.this.upgrade() {
            Some(shared) => self.pool.spawn(move || shared.run_io_task()),
            None => false,
        };

        if !launched {
            self.lock().io_task_running = false;
        }
    }

    fn run_io_task(&self) {
        do_io_work(self);

        self.lock().io_task_running = false;
        self.watcher.notify_all();
        self.dispatch_one();
    }

    /// Does one piece of work on behalf of a waiting thread. The owner thread applies
    /// handed over content first. Returns false if there was nothing to do.
    pub(crate) fn help_loading(&self) -> bool {
        if self.is_owner_thread() && self.owner_jobs.run_one() {
            return true;
        }

        do_io_work(self)
    }
}

/// Claims the head of the preload queue and loads it. Returns false if the queue is
/// empty.
pub(crate) fn do_io_work(shared: &ResourceManagerShared) -> bool {
    let now = shared.now();

    let (record, request, loader, update_thread) = {
        let mut state = shared.lock();
        state.update_deadlines(now);

        let head = match state.queue.pop_front() {
            Some(v) => v,
            None => {
                shared.commit(state);
                return false;
            }
        };

        let record = head.record;
        state.in_flight += 1;

        let update_thread = state.registry.type_desc(record.kind()).update_thread;
        let loader = state.registry.select_loader(&record);

        let entry = state.registry.entry_mut(&record);
        entry.info.due_date = None;
        let request = entry.load_request();

        shared.commit(state);
        (record, request, loader, update_thread)
    };

    trace!("Load {} from {:?}.", request.key, std::thread::current().name());

    let data = match loader.open_data_stream(&request) {
        Ok(data) => data,
        Err(err) => {
            warn!("Failed to open data stream of {}: {}", request.key, err);
            LoadData::not_found()
        }
    };

    if !data.is_found() {
        warn!("Resource {} is missing.", request.key);
    }

    let job = LoadJob {
        record,
        request,
        loader,
        data,
    };

    if job.data.is_found() && update_thread == UpdateThread::OwnerThread && !shared.is_owner_thread() {
        hand_over(shared, job);
    } else {
        finalize(shared, job);
    }

    true
}

fn hand_over(shared: &ResourceManagerShared, job: LoadJob) {
    let (done, previous) = shared.slots.acquire();

    match shared.this.upgrade() {
        Some(owner) => {
            let task = FinalizeTask {
                shared: owner,
                job: Some(job),
                done,
            };

            shared.owner_jobs.push(Box::new(move || task.run()));
        }
        None => {
            abandon(shared, job);
            done.set();
        }
    }

    // The owner may be blocked on this very job while the slot is still occupied, so
    // the job is queued before waiting.
    if let Some(previous) = previous {
        previous.wait();
    }
}

/// Applies the content of a load pass and publishes the result.
fn finalize(shared: &ResourceManagerShared, job: LoadJob) {
    let LoadJob {
        record,
        request,
        loader,
        mut data,
    } = job;

    let (desc, memory) = match data.stream {
        Some(ref mut stream) => {
            let mut content = record.content.write().unwrap();
            let desc = content.update_content(&mut **stream);
            assert!(
                desc.state != ResourceState::Unloaded,
                "Resource {} stays unloaded after a content update.",
                request.key
            );

            (desc, content.memory_usage())
        }
        None => (ResourceLoadDesc::missing(), record.content.read().unwrap().memory_usage()),
    };

    let modification_time = data.modification_time;
    let description = std::mem::replace(&mut data.description, String::new());
    loader.close_data_stream(&request, data);

    let mut state = shared.lock();
    {
        let state: &mut ManagerState = &mut state;
        let entry = state.registry.entry_mut(&record);
        entry.info.desc = desc;
        entry.info.memory = Some(memory);
        entry.info.modification_time = modification_time;
        entry.info.description = description;
        entry.info.flags.remove(ResourceFlags::PRELOADING);

        let current = entry.info.state();
        state.in_flight -= 1;
        state.loaded_counter += 1;
        state.emit(ResourceEvent::ContentUpdated(record.id(), current));
        state.emit(ResourceEvent::LeftPreloadQueue(record.id(), current));

        // Partially streamed content stays queued until every quality level is in.
        if desc.state < ResourceState::Loaded {
            let now = shared.now();
            state.enqueue(&record, now, false);
        }
    }

    debug!("Resource {} is {:?} now.", request.key, desc.state);

    shared.commit(state);
    shared.watcher.notify_all();
    shared.dispatch_one();
}

/// Rolls back a load pass whose content will never be applied.
fn abandon(shared: &ResourceManagerShared, job: LoadJob) {
    let LoadJob {
        record,
        request,
        loader,
        data,
    } = job;

    loader.close_data_stream(&request, data);

    let mut state = shared.lock();
    {
        let state: &mut ManagerState = &mut state;
        if let Some(entry) = state.registry.try_entry_mut(&record) {
            entry.info.flags.remove(ResourceFlags::PRELOADING);
            let current = entry.info.state();
            state.emit(ResourceEvent::LeftPreloadQueue(record.id(), current));
        }

        state.in_flight -= 1;
    }

    debug!("Abandoned loading of {}.", request.key);

    shared.commit(state);
    shared.watcher.notify_all();
}
