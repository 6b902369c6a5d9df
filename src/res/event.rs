//! Lifecycle events of the resource manager.

use std::sync::{Arc, Condvar, Mutex, RwLock};

use smallvec::SmallVec;

use super::resource::{ResourceId, ResourceState};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    EnteredPreloadQueue(ResourceId, ResourceState),
    LeftPreloadQueue(ResourceId, ResourceState),
    ContentUpdated(ResourceId, ResourceState),
    /// The resource has been evicted from the manager.
    Deleted(ResourceId, ResourceState),
    /// The priority of the resource changed.
    CategoryChanged(ResourceId, ResourceState),
    /// Fired for every live resource by `broadcast_exists_event`.
    Exists(ResourceId, ResourceState),
    ReloadAllResources,
    ManagerShuttingDown,
    ClearFallbacks,
}

impl ResourceEvent {
    /// The affected resource, if the event is about a single one.
    pub fn resource(&self) -> Option<ResourceId> {
        match *self {
            ResourceEvent::EnteredPreloadQueue(id, _)
            | ResourceEvent::LeftPreloadQueue(id, _)
            | ResourceEvent::ContentUpdated(id, _)
            | ResourceEvent::Deleted(id, _)
            | ResourceEvent::CategoryChanged(id, _)
            | ResourceEvent::Exists(id, _) => Some(id),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<ResourceState> {
        match *self {
            ResourceEvent::EnteredPreloadQueue(_, state)
            | ResourceEvent::LeftPreloadQueue(_, state)
            | ResourceEvent::ContentUpdated(_, state)
            | ResourceEvent::Deleted(_, state)
            | ResourceEvent::CategoryChanged(_, state)
            | ResourceEvent::Exists(_, state) => Some(state),
            _ => None,
        }
    }
}

/// Events collected while the manager lock is held.
pub type EventBatch = SmallVec<[ResourceEvent; 8]>;

pub type Listener = dyn Fn(&ResourceEvent) + Send + Sync;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle(usize);

/// Delivers batches of events to listeners in the order the batches were sealed.
///
/// A batch is sealed with a ticket while the manager lock is still held, and delivered
/// on the sealing thread once it is this ticket's turn. Listeners may call read-only
/// queries of the manager, but must not mutate it.
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerHandle, Arc<Listener>)>>,
    next_listener: Mutex<usize>,
    serving: Mutex<u64>,
    turn: Condvar,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            listeners: RwLock::new(Vec::new()),
            next_listener: Mutex::new(0),
            serving: Mutex::new(0),
            turn: Condvar::new(),
        }
    }

    pub fn subscribe<F>(&self, func: F) -> ListenerHandle
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        let handle = {
            let mut next = self.next_listener.lock().unwrap();
            *next += 1;
            ListenerHandle(*next)
        };

        let listener: Arc<Listener> = Arc::new(func);
        self.listeners.write().unwrap().push((handle, listener));
        handle
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let len = listeners.len();
        listeners.retain(|v| v.0 != handle);
        listeners.len() != len
    }

    /// Blocks until every batch sealed before `ticket` has been delivered, then
    /// delivers `events`.
    pub fn deliver(&self, ticket: u64, events: EventBatch) {
        {
            let mut serving = self.serving.lock().unwrap();
            while *serving != ticket {
                serving = self.turn.wait(serving).unwrap();
            }
        }

        // Advances the turn even if a listener panics.
        let _turn = Turn(self);

        if events.is_empty() {
            return;
        }

        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .map(|v| v.1.clone())
            .collect();

        for v in &events {
            trace!("{:?}", v);
            for listener in &listeners {
                listener(v);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

struct Turn<'a>(&'a EventBus);

impl<'a> Drop for Turn<'a> {
    fn drop(&mut self) {
        let mut serving = self.0.serving.lock().unwrap_or_else(|err| err.into_inner());
        *serving += 1;
        self.0.turn.notify_all();
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn ordered() {
        let bus = Arc::new(EventBus::new());
        let received = Arc::new(Mutex::new(Vec::new()));

        let r = received.clone();
        let handle = bus.subscribe(move |v| r.lock().unwrap().push(*v));

        let b = bus.clone();
        let t = thread::spawn(move || {
            let mut batch = EventBatch::new();
            batch.push(ResourceEvent::ClearFallbacks);
            b.deliver(1, batch);
        });

        let mut batch = EventBatch::new();
        batch.push(ResourceEvent::ReloadAllResources);
        bus.deliver(0, batch);
        t.join().unwrap();

        assert_eq!(
            *received.lock().unwrap(),
            [ResourceEvent::ReloadAllResources, ResourceEvent::ClearFallbacks]
        );

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        bus.deliver(2, EventBatch::from_elem(ResourceEvent::ManagerShuttingDown, 1));
        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[test]
    fn accessors() {
        let id = ResourceId::new("a");
        let v = ResourceEvent::Deleted(id, ResourceState::Unloaded);
        assert_eq!(v.resource(), Some(id));
        assert_eq!(v.state(), Some(ResourceState::Unloaded));
        assert_eq!(ResourceEvent::ManagerShuttingDown.resource(), None);
    }
}
