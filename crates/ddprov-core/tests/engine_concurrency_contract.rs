//! Architectural Contract Test: Bounded, Ordered Reconciliation
//!
//! This test verifies that the reconcile engine runs independent
//! resources in parallel under a fixed cap, respects declared
//! dependencies, and contains failures.
//!
//! Constraints verified:
//! - no more than `parallelism` handlers run at once
//! - a resource starts only after its dependencies succeeded
//! - dependents of a failed resource are skipped, not attempted
//! - a fatal error cancels the rest of the run
//! - a force-new change is applied as delete then create
//! - dependency cycles are rejected before anything runs
//!
//! If this test fails, a large manifest could flood the remote API or
//! create objects that reference ones that do not exist.

mod common;

use common::*;
use ddprov_core::engine::{DesiredResource, EngineEvent, Outcome, PlanAction};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

fn thing(address: &str, name: &str) -> DesiredResource {
    DesiredResource::new(address, "thing", cfg(json!({"name": name})))
}

#[tokio::test(start_paused = true)]
async fn parallel_handlers_never_exceed_the_cap() {
    let resource = Arc::new(MemoryResource::with_delay("thing", Duration::from_millis(100)));
    let (engine, _events, store) = engine_with(vec![resource.clone()], 3);
    let desired: Vec<_> = (0..8)
        .map(|i| thing(&format!("thing.t{}", i), &format!("t{}", i)))
        .collect();

    let report = engine.apply(&desired).await.unwrap();
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(resource.max_in_flight(), 3);
    assert_eq!(resource.object_count(), 8);
    assert_eq!(store.len().await, 8);
}

#[tokio::test(start_paused = true)]
async fn dependencies_are_created_first() {
    let resource = Arc::new(MemoryResource::with_delay("thing", Duration::from_millis(10)));
    let (engine, _events, _store) = engine_with(vec![resource.clone()], 10);
    let desired = vec![
        thing("thing.slo", "slo").depends_on("thing.monitor"),
        thing("thing.monitor", "monitor"),
        thing("thing.dashboard", "dashboard").depends_on("thing.slo"),
    ];

    engine.apply(&desired).await.unwrap();
    assert_eq!(
        resource.log(),
        vec!["create:monitor".to_string(), "create:slo".to_string(), "create:dashboard".to_string()]
    );
}

#[tokio::test]
async fn dependents_of_a_failure_are_skipped() {
    let resource = Arc::new(MemoryResource::new("thing"));
    resource.reject("broken");
    let (engine, _events, store) = engine_with(vec![resource.clone()], 4);
    let desired = vec![
        thing("thing.a", "broken"),
        thing("thing.b", "b").depends_on("thing.a"),
        thing("thing.c", "c"),
    ];

    let report = engine.apply(&desired).await.unwrap();
    assert_eq!(report.outcome("thing.a"), Some(&Outcome::Failed));
    assert!(matches!(report.outcome("thing.b"), Some(Outcome::Skipped { reason }) if reason.contains("thing.a")));
    assert_eq!(report.outcome("thing.c"), Some(&Outcome::Created));

    let error = report.diagnostics["thing.a"].errors().next().unwrap();
    assert_eq!(error.summary, "thing: request rejected with status 400");
    assert!(error.detail.as_deref().unwrap_or_default().contains("broken is invalid"));
    assert!(!resource.log().contains(&"create:b".to_string()));
    assert_eq!(store.snapshot().await.keys().cloned().collect::<Vec<_>>(), vec!["thing.c".to_string()]);
}

#[tokio::test]
async fn fatal_errors_cancel_the_run() {
    let resource = Arc::new(MemoryResource::new("thing"));
    let (engine, _events, _store) = engine_with(vec![resource.clone()], 4);
    let desired = vec![
        thing("thing.auth", "fatal"),
        thing("thing.b", "b"),
        thing("thing.c", "c").depends_on("thing.b"),
    ];

    let report = engine.apply(&desired).await.unwrap();
    assert!(report.has_fatal());
    assert_eq!(report.outcome("thing.auth"), Some(&Outcome::Failed));
    assert_eq!(
        report.outcome("thing.c"),
        Some(&Outcome::Skipped { reason: "run cancelled".to_string() })
    );
    assert!(!resource.log().contains(&"create:c".to_string()));
}

#[tokio::test]
async fn force_new_changes_replace_the_object() {
    let resource = Arc::new(MemoryResource::new("thing"));
    let (engine, mut events, store) = engine_with(vec![resource.clone()], 4);
    let first = DesiredResource::new("thing.a", "thing", cfg(json!({"name": "a", "size": 1})));
    let second = DesiredResource::new("thing.a", "thing", cfg(json!({"name": "a", "size": 2})));

    engine.apply(&[first]).await.unwrap();
    let old_id = store.snapshot().await["thing.a"].id.clone();

    let plan = engine.plan(std::slice::from_ref(&second)).await.unwrap();
    match &plan.get("thing.a").unwrap().action {
        PlanAction::Replace(d) => assert_eq!(d.paths(), vec!["size".to_string()]),
        other => panic!("expected a replace, got {:?}", other),
    }
    assert!(drain(&mut events).contains(&EngineEvent::PlanComputed {
        creates: 0,
        updates: 0,
        replaces: 1,
        deletes: 0,
    }));

    let report = engine.apply(&[second]).await.unwrap();
    assert_eq!(report.outcome("thing.a"), Some(&Outcome::Replaced));
    assert_eq!(
        resource.log(),
        vec!["create:a".to_string(), "delete:a".to_string(), "create:a".to_string()]
    );
    assert_eq!(resource.object_count(), 1);
    assert_ne!(store.snapshot().await["thing.a"].id, old_id);
}

#[tokio::test]
async fn dependency_cycles_are_rejected_up_front() {
    let resource = Arc::new(MemoryResource::new("thing"));
    let (engine, _events, _store) = engine_with(vec![resource.clone()], 4);
    let desired = vec![
        thing("thing.a", "a").depends_on("thing.b"),
        thing("thing.b", "b").depends_on("thing.a"),
    ];

    let err = engine.apply(&desired).await.unwrap_err();
    assert!(err.to_string().contains("dependency cycle"), "{}", err);
    assert!(resource.log().is_empty());
}

#[tokio::test]
async fn unchanged_resources_are_not_touched() {
    let resource = Arc::new(MemoryResource::new("thing"));
    let (engine, _events, _store) = engine_with(vec![resource.clone()], 4);
    let desired = vec![thing("thing.a", "a"), thing("thing.b", "b")];

    engine.apply(&desired).await.unwrap();
    let report = engine.apply(&desired).await.unwrap();
    assert_eq!(report.outcome("thing.a"), Some(&Outcome::Unchanged));
    assert_eq!(report.outcome("thing.b"), Some(&Outcome::Unchanged));
    assert_eq!(resource.log().len(), 2);
}

#[tokio::test]
async fn event_stream_closes_with_the_engine() {
    let resource = Arc::new(MemoryResource::new("thing"));
    let (engine, events, _store) = engine_with(vec![resource.clone()], 4);

    engine.apply(&[thing("thing.a", "a")]).await.unwrap();
    drop(engine);

    let events: Vec<EngineEvent> = ReceiverStream::new(events).collect().await;
    assert!(events.contains(&EngineEvent::ResourceSucceeded {
        address: "thing.a".to_string(),
        action: "create".to_string(),
    }));
    assert_eq!(events.last(), Some(&EngineEvent::Finished { succeeded: 1, failed: 0 }));
}
