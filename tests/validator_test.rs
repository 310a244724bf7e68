use std::sync::Arc;

use serde_json::json;

use intrigue::graph::builder::GraphBuilder;
use intrigue::graph::loader::GraphDoc;
use intrigue::graph::ValidatorMode;
use intrigue::present::NullPresenter;
use intrigue::runtime::context::EngineConfig;
use intrigue::runtime::engine::Engine;
use intrigue::runtime::schemer::SchemeResult;
use intrigue::world::{ActorId, StaticWorld};

fn fast_engine() -> Engine {
    let world = StaticWorld::new();
    world.add_actor(ActorId(1));
    world.add_actor(ActorId(2));
    Engine::new(
        EngineConfig {
            validator_period: 1.0,
            ..Default::default()
        },
        Arc::new(world),
        Arc::new(NullPresenter),
    )
}

fn failing_rule(group: &str, name: &str) -> GraphDoc {
    GraphBuilder::new(group)
        .node("start", "StartRule")
        .out("Next", &["err"])
        .done()
        .node("err", "ErrorRule")
        .params(json!({ "name": name, "message": "validator tripped" }))
        .done()
        .build()
}

fn passing_rule(group: &str) -> GraphDoc {
    GraphBuilder::new(group)
        .node("start", "StartRule")
        .out("Next", &["ok"])
        .done()
        .node("ok", "SuccessRule")
        .done()
        .build()
}

#[tokio::test]
async fn test_break_output_interrupts_hard() {
    let mut engine = fast_engine();
    engine.load_doc(failing_rule("guard.rule", "Busted")).expect("rule");

    let doc = GraphBuilder::new("plot")
        .node("start", "Start")
        .out("Next", &["validator", "other"])
        .done()
        .node("validator", "Validator")
        .params(json!({ "rule": "guard.rule" }))
        .out("Body", &["body_wait"])
        .out_mode("Busted", ValidatorMode::Break, &["caught"])
        .done()
        .node("body_wait", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("other", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("caught", "FailScheme")
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("plot", ActorId(1), Some(ActorId(2))).expect("start");
    assert!(engine.scheme(id).is_some());

    // First poll at 1s finds the broken rule and clears every branch.
    let finished = engine.tick(1.1);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].1, SchemeResult::Fail);
}

#[tokio::test]
async fn test_active_output_interrupts_softly() {
    let mut engine = fast_engine();
    engine.load_doc(failing_rule("doubt.rule", "Rethink")).expect("rule");

    let doc = GraphBuilder::new("plot")
        .node("start", "Start")
        .out("Next", &["validator", "other"])
        .done()
        .node("validator", "Validator")
        .params(json!({ "rule": "doubt.rule" }))
        .out("Body", &["body_wait"])
        .out_mode("Rethink", ValidatorMode::Active, &["mark"])
        .done()
        .node("body_wait", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("other", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("mark", "SetVariable")
        .params(json!({ "name": "rethought", "value": true }))
        .out("Next", &["hold"])
        .done()
        .node("hold", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    let id = engine.start_scheme("plot", ActorId(1), Some(ActorId(2))).expect("start");
    engine.tick(1.1);

    let schemer = engine.scheme(id).expect("soft interrupt keeps the scheme alive");
    assert_eq!(schemer.variable("rethought"), Some(json!(true)));
    // The validator's own subtree is gone, the unrelated branch is not.
    assert!(!schemer.activations().any(|a| a.node == "body_wait"));
    assert!(schemer.activations().any(|a| a.node == "other"));
}

#[tokio::test]
async fn test_unhandled_validator_failure_fails_the_scheme() {
    let mut engine = fast_engine();
    engine
        .load_doc(failing_rule("odd.rule", "Unrelated"))
        .expect("rule");

    let doc = GraphBuilder::new("plot")
        .node("start", "Start")
        .out("Next", &["validator"])
        .done()
        .node("validator", "Validator")
        .params(json!({ "rule": "odd.rule" }))
        .out("Body", &["body_wait"])
        .done()
        .node("body_wait", "Wait")
        .params(json!({ "seconds": 60.0 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    engine.start_scheme("plot", ActorId(1), None).expect("start");
    // No output matches the reported name: the validator counts as failed.
    let finished = engine.tick(1.1);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].1, SchemeResult::Fail);
}

#[tokio::test]
async fn test_passing_rule_never_interrupts() {
    let mut engine = fast_engine();
    engine.load_doc(passing_rule("fine.rule")).expect("rule");

    let doc = GraphBuilder::new("plot")
        .node("start", "Start")
        .out("Next", &["validator"])
        .done()
        .node("validator", "Validator")
        .params(json!({ "rule": "fine.rule" }))
        .out("Body", &["body_wait"])
        .out_mode("Busted", ValidatorMode::Break, &["caught"])
        .done()
        .node("body_wait", "Wait")
        .params(json!({ "seconds": 2.5 }))
        .out("Next", &["end"])
        .done()
        .node("caught", "FailScheme")
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    engine.start_scheme("plot", ActorId(1), None).expect("start");
    // Two polls pass; the body then completes naturally.
    let mut finished = Vec::new();
    for _ in 0..4 {
        finished.extend(engine.tick(1.0));
    }
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].1, SchemeResult::Success);
}

#[tokio::test]
async fn test_missing_validator_rule_is_vacuous() {
    let mut engine = fast_engine();
    let doc = GraphBuilder::new("plot")
        .node("start", "Start")
        .out("Next", &["validator"])
        .done()
        .node("validator", "Validator")
        .params(json!({ "rule": "never.loaded" }))
        .out("Body", &["body_wait"])
        .done()
        .node("body_wait", "Wait")
        .params(json!({ "seconds": 1.5 }))
        .out("Next", &["end"])
        .done()
        .node("end", "End")
        .done()
        .build();
    engine.load_doc(doc).expect("load");

    engine.start_scheme("plot", ActorId(1), None).expect("start");
    let mut finished = Vec::new();
    for _ in 0..3 {
        finished.extend(engine.tick(1.0));
    }
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].1, SchemeResult::Success);
}
