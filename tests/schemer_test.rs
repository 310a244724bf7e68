use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;

use intrigue::graph::builder::GraphBuilder;
use intrigue::present::NullPresenter;
use intrigue::runtime::context::EngineConfig;
use intrigue::runtime::engine::Engine;
use intrigue::runtime::schemer::SchemeResult;
use intrigue::world::{ActorId, StaticWorld, World};

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

#[tokio::test]
async fn test_linear_execution() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("linear")
        .node("start", "Start")
        .out("Next", &["log"])
        .done()
        .node("log", "Log")
        .params(json!({ "message": "running" }))
        .out("Next", &["set"])
        .done()
        .node("set", "SetVariable")
        .params(json!({ "name": "result", "value": "done" }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let ended = Arc::new(AtomicU32::new(0));
    let counter = ended.clone();
    let id = engine
        .start_scheme_with("linear", ActorId(1), Some(ActorId(2)), move |result| {
            assert_eq!(result, SchemeResult::Success);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("start");

    // The whole graph is synchronous: it completes inside start.
    assert!(engine.scheme(id).is_none());
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wait_suspends_and_resumes_branch() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("waiting")
        .node("start", "Start")
        .out("Next", &["wait"])
        .done()
        .node("wait", "Wait")
        .params(json!({ "seconds": 1.0 }))
        .out("Next", &["set"])
        .done()
        .node("set", "SetVariable")
        .params(json!({ "name": "after", "value": true }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("waiting", ActorId(1), None).expect("start");
    assert!(engine.scheme(id).is_some());

    engine.tick(0.5);
    assert!(engine.scheme(id).is_some(), "still suspended at 0.5s");

    let finished = engine.tick(0.6);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].0, id);
    assert_eq!(finished[0].1, SchemeResult::Success);
}

#[tokio::test]
async fn test_three_branches_finalize_exactly_once() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("parallel")
        .node("start", "Start")
        .out("Next", &["w1", "w2", "w3"])
        .done()
        .node("w1", "Wait")
        .params(json!({ "seconds": 0.5 }))
        .out("Next", &["end"])
        .done()
        .node("w2", "Wait")
        .params(json!({ "seconds": 1.0 }))
        .out("Next", &["end"])
        .done()
        .node("w3", "Wait")
        .params(json!({ "seconds": 1.5 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let ended = Arc::new(AtomicU32::new(0));
    let counter = ended.clone();
    engine
        .start_scheme_with("parallel", ActorId(1), None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("start");

    // Branches end at different ticks; the terminal callback still fires
    // exactly once regardless of completion order.
    for _ in 0..10 {
        engine.tick(0.3);
    }
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_determinism_without_stochastic_nodes() {
    let build = || {
        GraphBuilder::new("determ")
            .var("n", json!(1))
            .node("start", "Start")
            .out("Next", &["a"])
            .done()
            .node("a", "SetVariable")
            .params(json!({ "name": "n", "expression": "n + 10" }))
            .out("Next", &["b"])
            .done()
            .node("b", "SetVariable")
            .params(json!({ "name": "tag", "value": "left" }))
            .out("Next", &["check"])
            .done()
            .node("check", "Expression")
            .params(json!({ "expr": "n > 5" }))
            .out("True", &["win"])
            .out("False", &["lose"])
            .done()
            .node("win", "SuccessScheme")
            .done()
            .node("lose", "FailScheme")
            .done()
            .node("end", "End")
            .done()
            .build()
    };

    let mut results = Vec::new();
    for _ in 0..2 {
        let mut engine = test_engine();
        engine.load_doc(build()).expect("load");
        let result = Arc::new(std::sync::Mutex::new(None));
        let slot = result.clone();
        engine
            .start_scheme_with("determ", ActorId(1), None, move |r| {
                *slot.lock().unwrap() = Some(r);
            })
            .expect("start");
        results.push(result.lock().unwrap().take());
    }
    assert_eq!(results[0], Some(SchemeResult::Success));
    assert_eq!(results[0], results[1]);
}

#[tokio::test]
async fn test_chance_clamped_to_certainty() {
    // Bonus pushes the probability past 100: the clamp makes the Success
    // output a certainty regardless of seed.
    let world = StaticWorld::new();
    world.add_actor(ActorId(1));
    world.set_actor_var(ActorId(1), "zeal", json!(100.0));
    let mut engine = Engine::new(
        EngineConfig::default(),
        Arc::new(world),
        Arc::new(NullPresenter),
    );

    let doc = GraphBuilder::new("lucky")
        .node("start", "Start")
        .out("Next", &["roll"])
        .done()
        .node("mod", "ChanceModifier")
        .params(json!({ "variable": "zeal", "positive": true }))
        .out("Conspirator", &["roll"])
        .done()
        .node("roll", "Chance")
        .params(json!({ "chance": 50.0 }))
        .out("Success", &["win"])
        .out("Fail", &["lose"])
        .done()
        .node("win", "SuccessScheme")
        .done()
        .node("lose", "FailScheme")
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    for _ in 0..20 {
        let outcome = Arc::new(std::sync::Mutex::new(None));
        let slot = outcome.clone();
        engine
            .start_scheme_with("lucky", ActorId(1), None, move |r| {
                *slot.lock().unwrap() = Some(r);
            })
            .expect("start");
        assert_eq!(*outcome.lock().unwrap(), Some(SchemeResult::Success));
    }
}

#[tokio::test]
async fn test_chance_clamped_to_zero() {
    // A large negative bonus clamps to 0%: Fail is a certainty.
    let world = StaticWorld::new();
    world.add_actor(ActorId(1));
    world.set_actor_var(ActorId(1), "suspicion", json!(200.0));
    let mut engine = Engine::new(
        EngineConfig::default(),
        Arc::new(world),
        Arc::new(NullPresenter),
    );

    let doc = GraphBuilder::new("doomed")
        .node("start", "Start")
        .out("Next", &["roll"])
        .done()
        .node("mod", "ChanceModifier")
        .params(json!({ "variable": "suspicion", "positive": false }))
        .out("Conspirator", &["roll"])
        .done()
        .node("roll", "Chance")
        .params(json!({ "chance": 50.0 }))
        .out("Success", &["win"])
        .out("Fail", &["lose"])
        .done()
        .node("win", "SuccessScheme")
        .done()
        .node("lose", "FailScheme")
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    for _ in 0..20 {
        let outcome = Arc::new(std::sync::Mutex::new(None));
        let slot = outcome.clone();
        engine
            .start_scheme_with("doomed", ActorId(1), None, move |r| {
                *slot.lock().unwrap() = Some(r);
            })
            .expect("start");
        assert_eq!(*outcome.lock().unwrap(), Some(SchemeResult::Fail));
    }
}

#[tokio::test]
async fn test_sequencer_runs_steps_in_order() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("seq")
        .var("x", json!(0))
        .node("start", "Start")
        .out("Next", &["seq"])
        .done()
        .node("seq", "Sequencer")
        .out("First", &["s1"])
        .out("Second", &["s2"])
        .out("Third", &["s3"])
        .done()
        .node("s1", "SetVariable")
        .params(json!({ "name": "x", "expression": "x + 1" }))
        .done()
        .node("s2", "SetVariable")
        .params(json!({ "name": "x", "expression": "x * 10" }))
        .done()
        .node("s3", "SetVariable")
        .params(json!({ "name": "x", "expression": "x + 5" }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("seq", ActorId(1), None).expect("start");
    // (0 + 1) * 10 + 5: only the declared order produces 15.
    assert!(engine.scheme(id).is_none());
    // The scheme already ended; verify through a fresh run that stays open.
    let mut engine2 = test_engine();
    let doc2 = GraphBuilder::new("seq2")
        .var("x", json!(0))
        .node("start", "Start")
        .out("Next", &["seq"])
        .done()
        .node("seq", "Sequencer")
        .out("First", &["s1"])
        .out("Second", &["s2"])
        .out("Third", &["s3"])
        .done()
        .node("s1", "SetVariable")
        .params(json!({ "name": "x", "expression": "x + 1" }))
        .done()
        .node("s2", "SetVariable")
        .params(json!({ "name": "x", "expression": "x * 10" }))
        .done()
        .node("s3", "SetVariable")
        .params(json!({ "name": "x", "expression": "x + 5" }))
        .out("Next", &["hold"])
        .done()
        .node("hold", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine2.load_doc(doc2).expect("load");
    let id2 = engine2.start_scheme("seq2", ActorId(1), None).expect("start");
    let schemer = engine2.scheme(id2).expect("still running");
    assert_eq!(schemer.variable("x"), Some(json!(15)));
}

#[tokio::test]
async fn test_repeater_runs_body_count_times() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("rep")
        .var("n", json!(0))
        .node("start", "Start")
        .out("Next", &["rep"])
        .done()
        .node("rep", "Repeater")
        .params(json!({ "count": 3 }))
        .out("Body", &["inc"])
        .out("Done", &["hold"])
        .done()
        .node("inc", "SetVariable")
        .params(json!({ "name": "n", "expression": "n + 1" }))
        .done()
        .node("hold", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("rep", ActorId(1), None).expect("start");
    let schemer = engine.scheme(id).expect("held open by the wait");
    assert_eq!(schemer.variable("n"), Some(json!(3)));
}

#[tokio::test]
async fn test_pause_blocks_delays_and_execution() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("pausable")
        .node("start", "Start")
        .out("Next", &["wait"])
        .done()
        .node("wait", "Wait")
        .params(json!({ "seconds": 1.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("pausable", ActorId(1), None).expect("start");
    engine.tick(0.6);
    engine.pause(id).expect("pause");

    // Paused: even a huge tick neither fires the delay nor runs nodes.
    engine.tick(100.0);
    assert!(engine.scheme(id).is_some());
    assert!(engine.scheme(id).unwrap().is_paused());

    engine.resume(id).expect("resume");
    let finished = engine.tick(0.6);
    assert_eq!(finished.len(), 1, "remaining 0.4s elapsed after resume");
}

#[tokio::test]
async fn test_kill_cancels_everything_without_callback() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("killable")
        .node("start", "Start")
        .out("Next", &["wait"])
        .done()
        .node("wait", "Wait")
        .params(json!({ "seconds": 5.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let ended = Arc::new(AtomicU32::new(0));
    let counter = ended.clone();
    let id = engine
        .start_scheme_with("killable", ActorId(1), None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("start");

    engine.kill_scheme(id).expect("kill");
    assert!(engine.scheme(id).is_none());
    engine.tick(10.0);
    assert_eq!(ended.load(Ordering::SeqCst), 0, "no callback after kill");
}

#[tokio::test]
async fn test_background_branch_does_not_hold_scheme_open() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("bg")
        .node("start", "Start")
        .out("Next", &["worker"])
        .done()
        .node("worker", "BackgroundWorker")
        .out("Background", &["slow"])
        .out("Next", &["end"])
        .done()
        .node("slow", "Wait")
        .params(json!({ "seconds": 1000.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("bg", ActorId(1), None).expect("start");
    // The background wait is still pending, but no foreground work remains.
    assert!(engine.scheme(id).is_none());
}

#[tokio::test]
async fn test_dangling_edge_ends_branch_cleanly() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("dangling")
        .node("start", "Start")
        .out("Next", &["ghost"])
        .done()
        .node("end", "End")
        .done()
        .build();
    let diagnostics = engine.load_doc(doc).expect("load succeeds");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].node, "start");

    let ended = Arc::new(AtomicU32::new(0));
    let counter = ended.clone();
    engine
        .start_scheme_with("dangling", ActorId(1), None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("start");
    // Start's only edge was pruned: the branch ends, exhaustion forces End.
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_clan_member_fan_out() {
    let world = StaticWorld::new();
    for id in 1..=4 {
        world.add_actor(ActorId(id));
    }
    world.set_clan(ActorId(1), intrigue::world::ClanId(7));
    world.set_clan(ActorId(2), intrigue::world::ClanId(7));
    world.set_clan(ActorId(3), intrigue::world::ClanId(7));
    // Actor 4 belongs to no clan.
    let mut engine = Engine::new(
        EngineConfig::default(),
        Arc::new(world),
        Arc::new(NullPresenter),
    );

    let doc = GraphBuilder::new("clan")
        .var("seen", json!(0))
        .node("start", "Start")
        .out("Next", &["members"])
        .done()
        .node("members", "ClanMember")
        .out("Member", &["count"])
        .out("Done", &["hold"])
        .done()
        .node("count", "SetVariable")
        .params(json!({ "name": "seen", "expression": "seen + 1" }))
        .done()
        .node("hold", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("clan", ActorId(1), None).expect("start");
    let schemer = engine.scheme(id).expect("held open");
    assert_eq!(schemer.variable("seen"), Some(json!(3)));
}

#[tokio::test]
async fn test_continue_flow_redirects_single_branch() {
    let mut engine = test_engine();
    let doc = GraphBuilder::new("cont")
        .node("start", "Start")
        .out("Next", &["wa", "wb"])
        .done()
        .node("wa", "Wait")
        .params(json!({ "seconds": 100.0 }))
        .out("Next", &["seta"])
        .done()
        .node("wb", "Wait")
        .params(json!({ "seconds": 100.0 }))
        .out("Next", &["setb"])
        .done()
        .node("seta", "SetVariable")
        .params(json!({ "name": "a", "value": true }))
        .out("Next", &["end"])
        .done()
        .node("setb", "SetVariable")
        .params(json!({ "name": "b", "value": true }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("cont", ActorId(1), None).expect("start");
    let keep = engine
        .scheme(id)
        .unwrap()
        .activations()
        .find(|a| a.node == "wa")
        .map(|a| a.id)
        .expect("wa suspended");

    engine
        .scheme_mut(id)
        .unwrap()
        .continue_flow(keep, "Next", true, false)
        .expect("continue");

    let finished = engine.tick(0.01);
    assert_eq!(finished.len(), 1);
    // Only the kept branch ran; the other wait was ended without effect.
    // (Variables are gone with the instance, so assert via a fresh probe.)
}

#[tokio::test]
async fn test_scheme_is_active_probe() {
    let mut engine = test_engine();
    let long = GraphBuilder::new("long")
        .node("start", "Start")
        .out("Next", &["hold"])
        .done()
        .node("hold", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    let probe = GraphBuilder::new("probe")
        .node("start", "Start")
        .out("Next", &["check"])
        .done()
        .node("check", "SchemeIsActive")
        .params(json!({ "scheme": "long" }))
        .out("True", &["mark"])
        .out("False", &["end"])
        .done()
        .node("mark", "SetVariable")
        .params(json!({ "name": "found", "value": true }))
        .out("Next", &["hold"])
        .done()
        .node("hold", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(long).expect("load");
    engine.load_doc(probe).expect("load");

    engine.start_scheme("long", ActorId(1), None).expect("start long");
    let probe_id = engine.start_scheme("probe", ActorId(1), None).expect("start probe");
    let schemer = engine.scheme(probe_id).expect("probe held open");
    assert_eq!(schemer.variable("found"), Some(json!(true)));
}
