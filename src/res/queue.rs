//! The deadline ordered list of resources waiting for their content.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::record::ResourceRecord;
use super::resource::ResourceId;
use crate::utils::time::Timestamp;

#[derive(Debug, Clone)]
pub struct PreloadEntry {
    pub record: Arc<ResourceRecord>,
    pub due_date: Timestamp,
}

/// Resources awaiting a content load, ranked by deadline. Guarded by the manager lock,
/// `pop_front` is the only way workers claim entries.
#[derive(Debug)]
pub struct PreloadQueue {
    entries: VecDeque<PreloadEntry>,
    update_interval: Duration,
    kick_out_window: Duration,
    last_update: Option<Timestamp>,
}

impl PreloadQueue {
    pub fn new(update_interval: Duration, kick_out_window: Duration) -> Self {
        PreloadQueue {
            entries: VecDeque::new(),
            update_interval,
            kick_out_window,
            last_update: None,
        }
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
    pub fn contains(&self, id: ResourceId) -> bool {
        self.position(id).is_some()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PreloadEntry> {
        self.entries.iter()
    }

    /// Inserts at the head if `high_priority`, at the tail otherwise. Callers make sure
    /// the record is not queued already.
    pub fn enqueue(&mut self, record: Arc<ResourceRecord>, due_date: Timestamp, high_priority: bool) {
        debug_assert!(!self.contains(record.id()), "{} is queued twice.", record.key());
        trace!("Enqueue {} (high priority: {}).", record.key(), high_priority);

        let entry = PreloadEntry { record, due_date };
        if high_priority {
            self.entries.push_front(entry);
        } else {
            self.entries.push_back(entry);
        }
    }

    /// Moves a queued record to the head. Returns false if it is not queued anymore.
    pub fn promote(&mut self, id: ResourceId, due_date: Timestamp) -> bool {
        match self.position(id).and_then(|i| self.entries.remove(i)) {
            Some(mut entry) => {
                entry.due_date = entry.due_date.min(due_date);
                self.entries.push_front(entry);
                true
            }
            None => false,
        }
    }

    /// Removes a record. Returns false if it is not queued anymore, which means a worker
    /// has claimed it already.
    pub fn remove(&mut self, id: ResourceId) -> bool {
        self.position(id)
            .and_then(|i| self.entries.remove(i))
            .is_some()
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<PreloadEntry> {
        self.entries.pop_front()
    }

    /// Refreshes the deadline of every entry with `deadline`, drops the entries due
    /// later than the kick-out window and sorts the rest. Runs at most once per update
    /// interval, returns the dropped records.
    pub fn recompute_deadlines<F>(&mut self, now: Timestamp, mut deadline: F) -> Vec<Arc<ResourceRecord>>
    where
        F: FnMut(&Arc<ResourceRecord>) -> Timestamp,
    {
        if let Some(last) = self.last_update {
            if now >= last && now - last < self.update_interval {
                return Vec::new();
            }
        }

        self.last_update = Some(now);

        let limit = now + self.kick_out_window;
        let mut kicked = Vec::new();

        for mut entry in self.entries.drain(..).collect::<Vec<_>>() {
            entry.due_date = deadline(&entry.record);
            if entry.due_date > limit {
                debug!("Kick {} out of the preload queue.", entry.record.key());
                kicked.push(entry.record);
            } else {
                self.entries.push_back(entry);
            }
        }

        self.sort();
        kicked
    }

    /// Forces the next `recompute_deadlines` to run regardless of the interval.
    #[inline]
    pub fn invalidate(&mut self) {
        self.last_update = None;
    }

    /// Stable sort by ascending deadline.
    pub fn sort(&mut self) {
        self.entries
            .make_contiguous()
            .sort_by_key(|v| v.due_date);
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> Vec<PreloadEntry> {
        self.entries.drain(..).collect()
    }

    fn position(&self, id: ResourceId) -> Option<usize> {
        self.entries.iter().position(|v| v.record.id() == id)
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::super::resource::*;
    use super::*;

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

    fn record(key: &str) -> Arc<ResourceRecord> {
        Arc::new(ResourceRecord::new(
            ResourceId::new(key),
            key.to_owned(),
            ResourceType::new("Nothing"),
            Box::new(Nothing),
        ))
    }

    fn keys(queue: &PreloadQueue) -> Vec<String> {
        queue.iter().map(|v| v.record.key().to_owned()).collect()
    }

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    #[test]
    fn enqueue() {
        let mut queue = PreloadQueue::new(Duration::from_millis(100), Duration::from_secs(30));
        queue.enqueue(record("y"), ms(10), false);
        queue.enqueue(record("z"), ms(10), false);
        queue.enqueue(record("x"), ms(0), true);
        assert_eq!(keys(&queue), ["x", "y", "z"]);

        assert!(queue.promote(ResourceId::new("z"), ms(0)));
        assert!(queue.promote(ResourceId::new("z"), ms(0)));
        assert_eq!(keys(&queue), ["z", "x", "y"]);

        assert!(queue.remove(ResourceId::new("x")));
        assert!(!queue.remove(ResourceId::new("x")));
        assert!(!queue.promote(ResourceId::new("x"), ms(0)));

        assert_eq!(queue.pop_front().unwrap().record.key(), "z");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn sort_is_stable() {
        let mut queue = PreloadQueue::new(Duration::from_millis(100), Duration::from_secs(30));
        queue.enqueue(record("a"), ms(5), false);
        queue.enqueue(record("b"), ms(1), false);
        queue.enqueue(record("c"), ms(5), false);
        queue.enqueue(record("d"), ms(1), false);

        queue.sort();
        assert_eq!(keys(&queue), ["b", "d", "a", "c"]);
    }

    #[test]
    fn kick_out() {
        let mut queue = PreloadQueue::new(Duration::from_millis(100), Duration::from_secs(30));
        queue.enqueue(record("near"), ms(0), false);
        queue.enqueue(record("far"), ms(0), false);
        queue.enqueue(record("soon"), ms(0), false);

        let deadline = |r: &Arc<ResourceRecord>| match r.key() {
            "near" => ms(2000),
            "far" => ms(60_000),
            _ => ms(1500),
        };

        let kicked = queue.recompute_deadlines(ms(1000), deadline);
        assert_eq!(kicked.len(), 1);
        assert_eq!(kicked[0].key(), "far");
        assert_eq!(keys(&queue), ["soon", "near"]);

        // Throttled.
        let kicked = queue.recompute_deadlines(ms(1050), |_| ms(u64::max_value()));
        assert!(kicked.is_empty());
        assert_eq!(queue.len(), 2);

        queue.invalidate();
        let kicked = queue.recompute_deadlines(ms(1050), |_| ms(u64::max_value()));
        assert_eq!(kicked.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn monotonic() {
        let mut queue = PreloadQueue::new(Duration::from_millis(0), Duration::from_secs(30));
        for i in 0..16 {
            queue.enqueue(record(&i.to_string()), ms(0), i % 3 == 0);
        }

        let mut len = queue.len();
        for step in 0..4u64 {
            let now = ms(step * 10_000);
            queue.recompute_deadlines(now, |r: &Arc<ResourceRecord>| {
                let i: u64 = r.key().parse().unwrap();
                ms(i * 5_000)
            });

            assert!(queue.len() <= len);
            len = queue.len();
        }
    }
}
