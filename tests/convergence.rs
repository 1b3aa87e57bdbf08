//! Conflict resolution and cycle safety: competing writes settle on the
//! one with the greatest wave time, stale waves are pruned without
//! fan-out, and binding cycles terminate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use fieldsync::{
    DataContainer, FieldDef, Schema, SyncRuntime, Timestamp, UpdateContext, Value, ValueKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn counter_schema() -> Schema {
    Schema::new(vec![FieldDef::read_write("value", ValueKind::Int)])
}

// =============================================================================
// Last-writer-wins
// =============================================================================

#[test]
fn test_later_write_wins_sequentially() {
    let runtime = SyncRuntime::new();
    let root = runtime.new_root(counter_schema(), &[]).unwrap();
    let replica = runtime.new_replica(counter_schema(), &root).unwrap();

    root.set("value", Value::Int(1)).unwrap();
    replica.set("value", Value::Int(2)).unwrap();

    assert_eq!(root.get("value").unwrap(), Value::Int(2));
    assert_eq!(replica.get("value").unwrap(), Value::Int(2));

    root.set("value", Value::Int(3)).unwrap();
    assert_eq!(root.get("value").unwrap(), Value::Int(3));
    assert_eq!(replica.get("value").unwrap(), Value::Int(3));
}

#[test]
fn test_larger_time_wins_regardless_of_arrival_order() {
    let runtime = SyncRuntime::new();
    let target = runtime.new_root(counter_schema(), &[]).unwrap();
    let origin = runtime.new_root(counter_schema(), &[]).unwrap();

    // The wave with the larger time arrives first.
    let late = UpdateContext::new(Timestamp(9), origin.id());
    target.receive("value", &Value::None, &Value::Int(9), &late);
    let early = UpdateContext::new(Timestamp(5), origin.id());
    target.receive("value", &Value::None, &Value::Int(5), &early);

    assert_eq!(target.get("value").unwrap(), Value::Int(9));
    assert_eq!(target.snapshot()[0].stamp, Timestamp(9));
}

#[test]
fn test_stale_wave_never_fans_out() {
    static HITS: AtomicUsize = AtomicUsize::new(0);
    fn count(_: &DataContainer, _: &str, _: &Value, _: &Value, _: &UpdateContext) {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    let runtime = SyncRuntime::new();
    let target = runtime.new_root(counter_schema(), &[]).unwrap();
    let listener = runtime.new_root(counter_schema(), &[]).unwrap();
    let origin = runtime.new_root(counter_schema(), &[]).unwrap();
    runtime.bind(&target, "value", &listener, count);

    let fresh = UpdateContext::new(Timestamp(7), origin.id());
    target.receive("value", &Value::None, &Value::Int(7), &fresh);
    assert_eq!(target.get("value").unwrap(), Value::Int(7));
    assert_eq!(HITS.load(Ordering::SeqCst), 1);

    // Replays at the stored time and below it change nothing and tell
    // nobody.
    let replay = UpdateContext::new(Timestamp(7), origin.id());
    target.receive("value", &Value::None, &Value::Int(8), &replay);
    let older = UpdateContext::new(Timestamp(3), origin.id());
    target.receive("value", &Value::None, &Value::Int(3), &older);

    assert_eq!(target.get("value").unwrap(), Value::Int(7));
    assert_eq!(target.snapshot()[0].stamp, Timestamp(7));
    assert_eq!(HITS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_received_waves_relay_onward_when_fresh() {
    let runtime = SyncRuntime::new();
    let root = runtime.new_root(counter_schema(), &[]).unwrap();
    let replica = runtime.new_replica(counter_schema(), &root).unwrap();
    let origin = runtime.new_root(counter_schema(), &[]).unwrap();

    root.set("value", Value::Int(1)).unwrap();
    assert_eq!(replica.get("value").unwrap(), Value::Int(1));

    // A stale wave is pruned at the root; the subtree never hears of it.
    let stale = UpdateContext::new(Timestamp(1), origin.id());
    root.receive("value", &Value::Int(1), &Value::Int(100), &stale);
    assert_eq!(root.get("value").unwrap(), Value::Int(1));
    assert_eq!(replica.get("value").unwrap(), Value::Int(1));

    // A fresh one is applied and relayed down the same bindings.
    let fresh = UpdateContext::new(Timestamp(99), origin.id());
    root.receive("value", &Value::Int(1), &Value::Int(100), &fresh);
    assert_eq!(root.get("value").unwrap(), Value::Int(100));
    assert_eq!(replica.get("value").unwrap(), Value::Int(100));
}

// =============================================================================
// Cycle safety
// =============================================================================

#[test]
fn test_mutual_binding_terminates_and_converges() {
    let runtime = SyncRuntime::new();
    let a = runtime.new_root(counter_schema(), &[]).unwrap();
    let b = runtime.new_root(counter_schema(), &[]).unwrap();
    runtime.bind(&a, "value", &b, DataContainer::receive);
    runtime.bind(&b, "value", &a, DataContainer::receive);

    a.set("value", Value::Int(1)).unwrap();
    assert_eq!(a.get("value").unwrap(), Value::Int(1));
    assert_eq!(b.get("value").unwrap(), Value::Int(1));

    b.set("value", Value::Int(2)).unwrap();
    assert_eq!(a.get("value").unwrap(), Value::Int(2));
    assert_eq!(b.get("value").unwrap(), Value::Int(2));
}

#[test]
fn test_ring_visits_each_container_once() {
    static A_CHANGES: AtomicUsize = AtomicUsize::new(0);
    static B_CHANGES: AtomicUsize = AtomicUsize::new(0);
    static C_CHANGES: AtomicUsize = AtomicUsize::new(0);
    fn count_a(_: &DataContainer, _: &str, _: &Value, _: &Value, _: &UpdateContext) {
        A_CHANGES.fetch_add(1, Ordering::SeqCst);
    }
    fn count_b(_: &DataContainer, _: &str, _: &Value, _: &Value, _: &UpdateContext) {
        B_CHANGES.fetch_add(1, Ordering::SeqCst);
    }
    fn count_c(_: &DataContainer, _: &str, _: &Value, _: &Value, _: &UpdateContext) {
        C_CHANGES.fetch_add(1, Ordering::SeqCst);
    }

    let runtime = SyncRuntime::new();
    let a = runtime.new_root(counter_schema(), &[]).unwrap();
    let b = runtime.new_root(counter_schema(), &[]).unwrap();
    let c = runtime.new_root(counter_schema(), &[]).unwrap();
    runtime.bind(&a, "value", &b, DataContainer::receive);
    runtime.bind(&b, "value", &c, DataContainer::receive);
    runtime.bind(&c, "value", &a, DataContainer::receive);
    runtime.bind(&a, "value", &b, count_a);
    runtime.bind(&b, "value", &c, count_b);
    runtime.bind(&c, "value", &a, count_c);

    a.set("value", Value::Int(42)).unwrap();

    // The wave went all the way around and stopped at its origin.
    assert_eq!(a.get("value").unwrap(), Value::Int(42));
    assert_eq!(b.get("value").unwrap(), Value::Int(42));
    assert_eq!(c.get("value").unwrap(), Value::Int(42));
    assert_eq!(A_CHANGES.load(Ordering::SeqCst), 1);
    assert_eq!(B_CHANGES.load(Ordering::SeqCst), 1);
    assert_eq!(C_CHANGES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_self_binding_does_not_recurse() {
    let runtime = SyncRuntime::new();
    let a = runtime.new_root(counter_schema(), &[]).unwrap();
    runtime.bind(&a, "value", &a, DataContainer::receive);

    a.set("value", Value::Int(3)).unwrap();
    assert_eq!(a.get("value").unwrap(), Value::Int(3));
}

// =============================================================================
// Concurrent writers
// =============================================================================

#[test]
fn test_concurrent_writers_converge_across_the_group() {
    init_tracing();
    let runtime = SyncRuntime::new();
    let root = runtime.new_root(counter_schema(), &[]).unwrap();
    let r1 = runtime.new_replica(counter_schema(), &root).unwrap();
    let r2 = runtime.new_replica(counter_schema(), &root).unwrap();

    let mut handles = Vec::new();
    for (index, target) in [&root, &r1, &r2].into_iter().enumerate() {
        for lane in 0..2i64 {
            let target = Arc::clone(target);
            handles.push(thread::spawn(move || {
                for step in 0..40i64 {
                    // Every write carries a distinct value.
                    let value = (index as i64 + 1) * 10_000 + lane * 100 + step;
                    target.set("value", Value::Int(value)).unwrap();
                }
            }));
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Whatever won, it won everywhere.
    let settled = root.get("value").unwrap();
    assert_ne!(settled, Value::None);
    assert_eq!(r1.get("value").unwrap(), settled);
    assert_eq!(r2.get("value").unwrap(), settled);

    // The group is still live after the storm.
    r2.set("value", Value::Int(-1)).unwrap();
    assert_eq!(root.get("value").unwrap(), Value::Int(-1));
    assert_eq!(r1.get("value").unwrap(), Value::Int(-1));
}

#[test]
fn test_writers_on_different_fields_do_not_interfere() {
    init_tracing();
    let schema = Schema::new(vec![
        FieldDef::read_write("left", ValueKind::Int),
        FieldDef::read_write("right", ValueKind::Int),
    ]);
    let runtime = SyncRuntime::new();
    let root = runtime.new_root(schema.clone(), &[]).unwrap();
    let replica = runtime.new_replica(schema, &root).unwrap();

    let left_writer = {
        let root = Arc::clone(&root);
        thread::spawn(move || {
            for step in 1..=100i64 {
                root.set("left", Value::Int(step)).unwrap();
            }
        })
    };
    let right_writer = {
        let replica = Arc::clone(&replica);
        thread::spawn(move || {
            for step in 1..=100i64 {
                replica.set("right", Value::Int(step)).unwrap();
            }
        })
    };
    left_writer.join().unwrap();
    right_writer.join().unwrap();

    // Each field settles on its own writer's final value, on both sides.
    for container in [&root, &replica] {
        assert_eq!(container.get("left").unwrap(), Value::Int(100));
        assert_eq!(container.get("right").unwrap(), Value::Int(100));
    }
}
