extern crate crayon_streaming;
extern crate rand;

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crayon_streaming::prelude::*;

use common::*;

struct Done(Arc<AtomicUsize>);

impl Drop for Done {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn concurrent_access() {
    let tb = testbed_with(ResourceManagerParams {
        io_workers: 2,
        finalize_slots: 4,
        ..ResourceManagerParams::default()
    });

    let events = record_events(&tb.manager);
    let keys: Vec<_> = (0..32).map(|i| format!("{}.blob", i)).collect();
    for (i, v) in keys.iter().enumerate() {
        // Every fourth one is missing.
        if i % 4 != 0 {
            tb.loader.insert(v, v.as_bytes());
        }
    }

    let keys = Arc::new(keys);
    let running = Arc::new(AtomicUsize::new(8));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let shared = tb.manager.shared();
            let keys = keys.clone();
            let running = running.clone();

            thread::spawn(move || {
                let _done = Done(running);
                let mut rng = rand::thread_rng();
                for _ in 0..256 {
                    let i = rng.gen_range(0..keys.len());
                    let kind = if i % 5 == 0 { GPU_BLOB } else { BLOB };
                    let handle = shared.get_resource(kind, &keys[i], true);

                    match rng.gen_range(0..4) {
                        0 => shared.preload(&handle, Duration::from_millis(rng.gen_range(0..100))),
                        1 => {
                            let lock = shared.acquire(&handle, AcquireMode::AllowLoadingFallback);
                            assert!(lock.result() != AcquireResult::LoadingFallback);
                        }
                        _ => {
                            let lock = shared.acquire(&handle, AcquireMode::BlockTillLoaded);
                            if i % 4 == 0 {
                                assert_eq!(lock.result(), AcquireResult::Missing);
                            } else {
                                assert_eq!(lock.result(), AcquireResult::Final);
                                assert_eq!(bytes_of(&lock), keys[i].as_bytes());
                            }
                        }
                    }
                }
            })
        })
        .collect();

    // Keeps owner thread content flowing.
    while running.load(Ordering::SeqCst) > 0 {
        tb.manager.per_frame_update();
        thread::sleep(Duration::from_millis(1));
    }

    for v in threads {
        v.join().unwrap();
    }

    tb.manager.finish_loading_of_resources();

    // Nothing has been evicted or reloaded, so every resource is opened at most once.
    for v in keys.iter() {
        assert!(tb.loader.opened_count(v) <= 1, "{} is loaded twice.", v);
    }

    // Each resource leaves the queue exactly once per entry.
    let mut queued = HashMap::new();
    for v in events.lock().unwrap().iter() {
        match *v {
            ResourceEvent::EnteredPreloadQueue(id, _) => {
                let entered = queued.entry(id).or_insert(false);
                assert!(!*entered);
                *entered = true;
            }
            ResourceEvent::LeftPreloadQueue(id, _) => {
                let entered = queued.entry(id).or_insert(false);
                assert!(*entered);
                *entered = false;
            }
            _ => {}
        }
    }

    assert!(queued.values().all(|v| !v));
    let n = tb.manager.resource_count();
    assert_eq!(tb.manager.free_unused_resources(true), n);
}
