extern crate crayon_streaming;

mod common;

use std::time::Duration;

use crayon_streaming::prelude::*;

use common::*;

#[test]
fn referenced_resources_survive() {
    let tb = testbed();
    tb.loader.insert("x", b"x");

    let x = tb.manager.get_resource(BLOB, "x", true);
    let y = x.clone();
    tb.manager.acquire(&x, AcquireMode::BlockTillLoaded);
    assert_eq!(x.reference_count(), 2);

    assert_eq!(tb.manager.free_unused_resources(true), 0);
    assert_eq!(tb.manager.loading_state(&x), ResourceState::Loaded);

    let id = x.id();
    let events = record_events(&tb.manager);
    drop(x);
    drop(y);

    assert_eq!(tb.manager.free_unused_resources(true), 1);
    assert!(tb.manager.get_existing_resource(BLOB, "x").is_none());
    assert_eq!(tb.manager.resource_count(), 0);
    assert_eq!(
        *events.lock().unwrap(),
        [ResourceEvent::Deleted(id, ResourceState::Unloaded)]
    );

    // A new record is created on the next request.
    let x = tb.manager.get_resource(BLOB, "x", true);
    assert_eq!(tb.manager.loading_state(&x), ResourceState::Unloaded);
}

#[test]
fn queued_resources() {
    let tb = testbed();
    let a = tb.manager.get_resource(BLOB, "a", true);
    tb.manager.preload(&a, Duration::from_secs(1));

    let id = a.id();
    let events = record_events(&tb.manager);
    drop(a);

    assert_eq!(tb.manager.free_unused_resources(false), 1);
    assert_eq!(tb.manager.preload_queue_len(), 0);
    assert!(!tb.manager.is_any_loading_in_progress());
    assert_eq!(
        *events.lock().unwrap(),
        [
            ResourceEvent::LeftPreloadQueue(id, ResourceState::Unloaded),
            ResourceEvent::Deleted(id, ResourceState::Unloaded),
        ]
    );
}

#[test]
fn fallbacks_keep_resources_alive() {
    let tb = testbed();
    let loading = tb.manager.get_resource(BLOB, "loading", false);
    tb.manager.set_type_loading_fallback(BLOB, Some(loading.clone()));
    drop(loading);

    assert_eq!(tb.manager.free_unused_resources(true), 0);
    tb.manager.clear_fallbacks();
    assert_eq!(tb.manager.free_unused_resources(true), 1);
}

#[test]
fn incremental() {
    let tb = testbed();

    let handles: Vec<_> = (0..8)
        .map(|i| tb.manager.get_resource(BLOB, &i.to_string(), true))
        .collect();

    tb.clock.advance(Duration::from_secs(20));
    tb.manager.acquire(&handles[3], AcquireMode::PointerOnly);
    drop(handles);

    let freed = tb
        .manager
        .free_unused_resources_incremental(Duration::from_secs(10), Duration::from_secs(10));
    assert_eq!(freed, 7);
    assert!(tb.manager.get_existing_resource(BLOB, "3").is_some());

    tb.clock.advance(Duration::from_secs(20));
    let freed = tb
        .manager
        .free_unused_resources_incremental(Duration::from_secs(10), Duration::from_secs(10));
    assert_eq!(freed, 1);
    assert_eq!(tb.manager.resource_count(), 0);
}

#[test]
fn incremental_budget() {
    let tb = testbed();
    let a = tb.manager.get_resource(BLOB, "a", true);
    drop(a);

    let freed = tb
        .manager
        .free_unused_resources_incremental(Duration::from_millis(0), Duration::from_millis(0));
    assert_eq!(freed, 0);
    assert_eq!(tb.manager.resource_count(), 1);
}

#[test]
fn per_frame_update() {
    let tb = testbed_with(ResourceManagerParams {
        io_workers: 0,
        auto_free_unused_timeout: Some(Duration::from_secs(10)),
        auto_free_unused_threshold: Duration::from_secs(1),
        ..ResourceManagerParams::default()
    });

    let a = tb.manager.get_resource(BLOB, "a", true);
    let b = tb.manager.get_resource(BLOB, "b", true);
    drop(a);

    tb.manager.per_frame_update();
    assert_eq!(tb.manager.resource_count(), 2);

    tb.clock.advance(Duration::from_secs(2));
    tb.manager.per_frame_update();
    assert_eq!(tb.manager.resource_count(), 1);
    assert!(tb.manager.get_existing_resource(BLOB, "b").is_some());
    drop(b);
}

#[test]
#[should_panic]
fn per_frame_update_off_owner() {
    let tb = testbed();
    let shared = tb.manager.shared();
    let result = std::thread::spawn(move || shared.per_frame_update()).join();
    if let Err(err) = result {
        std::panic::resume_unwind(err);
    }
}
