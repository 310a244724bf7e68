use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use intrigue::graph::builder::GraphBuilder;
use intrigue::graph::loader::GraphDoc;
use intrigue::present::NullPresenter;
use intrigue::runtime::context::EngineConfig;
use intrigue::runtime::engine::Engine;
use intrigue::world::{ActorId, StaticWorld};

fn test_engine() -> Engine {
    let world = StaticWorld::new();
    world.add_actor(ActorId(1));
    world.add_actor(ActorId(2));
    Engine::new(
        EngineConfig::default(),
        Arc::new(world),
        Arc::new(NullPresenter),
    )
}

/// Two structured branches: one wait inside a repeater, one inside a
/// sequencer, plus a free-floating wait.
fn nested_doc() -> GraphDoc {
    GraphBuilder::new("nested")
        .var("n", json!(0))
        .node("start", "Start")
        .out("Next", &["rep", "seq", "free"])
        .done()
        .node("rep", "Repeater")
        .params(json!({ "count": 5 }))
        .out("Body", &["wait_r"])
        .done()
        .node("wait_r", "Wait")
        .params(json!({ "seconds": 30.0 }))
        .out("Next", &["bump"])
        .done()
        .node("bump", "SetVariable")
        .params(json!({ "name": "n", "expression": "n + 1" }))
        .done()
        .node("seq", "Sequencer")
        .out("First", &["wait_s"])
        .out("Second", &["bump2"])
        .done()
        .node("wait_s", "Wait")
        .params(json!({ "seconds": 40.0 }))
        .out("Next", &["bump2"])
        .done()
        .node("bump2", "SetVariable")
        .params(json!({ "name": "n", "expression": "n + 100" }))
        .done()
        .node("free", "Wait")
        .params(json!({ "seconds": 50.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build()
}

#[tokio::test]
async fn test_snapshot_round_trip_preserves_tree_shape() {
    let mut engine = test_engine();
    engine.load_doc(nested_doc()).expect("load");

    let id = engine.start_scheme("nested", ActorId(1), Some(ActorId(2))).expect("start");
    engine.tick(1.0);
    engine.pause(id).expect("pause");

    let snapshot = engine.snapshot(id).expect("snapshot");
    assert!(snapshot.paused);

    // Restore into a fresh engine and snapshot again: every persisted
    // field must survive the round trip bit-for-bit.
    let mut engine2 = test_engine();
    engine2.load_doc(nested_doc()).expect("load");
    let restored = engine2
        .restore_scheme(snapshot.clone(), |_| {})
        .expect("restore");
    let snapshot2 = engine2.snapshot(restored).expect("snapshot again");
    assert_eq!(snapshot, snapshot2);
}

#[tokio::test]
async fn test_restore_rebuilds_activation_tree_and_linkage() {
    let mut engine = test_engine();
    engine.load_doc(nested_doc()).expect("load");

    let id = engine.start_scheme("nested", ActorId(1), Some(ActorId(2))).expect("start");
    engine.tick(1.0);
    let snapshot = engine.snapshot(id).expect("snapshot");

    let mut engine2 = test_engine();
    engine2.load_doc(nested_doc()).expect("load");
    let restored = engine2.restore_scheme(snapshot.clone(), |_| {}).expect("restore");
    let schemer = engine2.scheme(restored).expect("running");

    // Same count and same node-id multiset.
    let before: Vec<&str> = {
        let mut v: Vec<&str> = snapshot.activations.iter().map(|a| a.node.as_str()).collect();
        v.sort();
        v
    };
    let mut after: Vec<&str> = schemer.activations().map(|a| a.node.as_str()).collect();
    after.sort();
    assert_eq!(before, after);

    // Parent linkage: the repeater's wait still points at an activation
    // executing the repeater node, the sequencer's wait at the sequencer.
    let rep_id = schemer
        .activations()
        .find(|a| a.node == "rep")
        .map(|a| a.id)
        .expect("repeater alive");
    let seq_id = schemer
        .activations()
        .find(|a| a.node == "seq")
        .map(|a| a.id)
        .expect("sequencer alive");
    let wait_r = schemer
        .activations()
        .find(|a| a.node == "wait_r")
        .expect("repeater wait alive");
    let wait_s = schemer
        .activations()
        .find(|a| a.node == "wait_s")
        .expect("sequencer wait alive");
    assert_eq!(wait_r.repeater, Some(rep_id));
    assert_eq!(wait_s.sequencer, Some(seq_id));
}

#[tokio::test]
async fn test_restore_preserves_remaining_delay_time() {
    let mut engine = test_engine();
    engine.load_doc(nested_doc()).expect("load");

    let id = engine.start_scheme("nested", ActorId(1), None).expect("start");
    engine.tick(10.0);
    let snapshot = engine.snapshot(id).expect("snapshot");

    let free_delay = snapshot
        .delays
        .iter()
        .find(|d| {
            snapshot
                .activations
                .iter()
                .any(|a| a.node == "free" && a.delays.contains(&d.name))
        })
        .expect("free wait delay persisted");
    assert!((free_delay.remaining - 40.0).abs() < 1e-6);

    let mut engine2 = test_engine();
    engine2.load_doc(nested_doc()).expect("load");
    let restored = engine2.restore_scheme(snapshot, |_| {}).expect("restore");

    // 39 more seconds: not yet.
    engine2.tick(39.0);
    assert!(engine2
        .scheme(restored)
        .expect("running")
        .activations()
        .any(|a| a.node == "free"));
    // Crossing the preserved deadline releases the branch.
    engine2.tick(2.0);
    assert!(!engine2
        .scheme(restored)
        .map(|s| s.activations().any(|a| a.node == "free"))
        .unwrap_or(false));
}

#[tokio::test]
async fn test_restored_parents_are_not_rerun() {
    let mut engine = test_engine();
    engine.load_doc(nested_doc()).expect("load");

    let id = engine.start_scheme("nested", ActorId(1), None).expect("start");
    engine.tick(1.0);
    let snapshot = engine.snapshot(id).expect("snapshot");
    let body_count_before = snapshot
        .activations
        .iter()
        .filter(|a| a.node == "wait_r")
        .count();

    let mut engine2 = test_engine();
    engine2.load_doc(nested_doc()).expect("load");
    let restored = engine2.restore_scheme(snapshot, |_| {}).expect("restore");
    engine2.tick(1.0);

    // A duplicate root execution of the repeater would double its body.
    let body_count_after = engine2
        .scheme(restored)
        .expect("running")
        .activations()
        .filter(|a| a.node == "wait_r")
        .count();
    assert_eq!(body_count_before, 1);
    assert_eq!(body_count_after, 1);
}

#[tokio::test]
async fn test_snapshot_json_round_trip() {
    let mut engine = test_engine();
    engine.load_doc(nested_doc()).expect("load");
    let id = engine.start_scheme("nested", ActorId(1), Some(ActorId(2))).expect("start");
    engine.tick(2.5);

    let snapshot = engine.snapshot(id).expect("snapshot");
    let json = snapshot.to_json().expect("serialize");
    let parsed = intrigue::runtime::snapshot::SchemeSnapshot::from_json(&json).expect("parse");
    assert_eq!(snapshot, parsed);

    // Activation ids must stay unique after the trip.
    let ids: BTreeSet<u64> = parsed.activations.iter().map(|a| a.id).collect();
    assert_eq!(ids.len(), parsed.activations.len());
}
