//! Service-level tests: engine task, SQLite archive and HTTP router together.

use aviator::api::{build_router, ApiState};
use aviator::engine::crash::ScriptedCrash;
use aviator::engine::{spawn_engine, RoundConfig, RoundEngine};
use aviator::storage::{self, SharedStore, SqliteStore};
use aviator::types::{EngineEvent, Phase};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

#[tokio::test]
async fn test_settled_round_archived_to_sqlite_and_served() {
    let store: SharedStore = Arc::new(SqliteStore::connect("sqlite::memory:", 1).await.unwrap());
    let cfg = RoundConfig {
        countdown: Duration::from_millis(300),
        settle_delay: Duration::from_millis(20),
        ..RoundConfig::default()
    };
    let engine = RoundEngine::new(cfg, Box::new(ScriptedCrash::new(vec![1.0, 100.0])), Instant::now());
    let (handle, task) = spawn_engine(engine, store.clone(), Duration::from_millis(5));
    let mut events = handle.subscribe();

    let app = build_router(Arc::new(ApiState::new(handle.clone(), store.clone())), "*").unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/api/bet")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"bettor_id":"alice","amount":100}"#))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let record = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(EngineEvent::Settled { record }) = events.recv().await {
                return record;
            }
        }
    })
    .await
    .expect("round never settled");
    assert_eq!(record.total_wagered, dec!(100));
    assert_eq!(record.total_paid, dec!(0));

    let key = storage::round_key(&record.round_id);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.exists(&key).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("round never archived");

    let uri = format!("/api/rounds/{}", record.round_id);
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["crash_multiplier"], 1.0);
    assert_eq!(json["bets"][0]["bettor_id"], "alice");

    // The next round is already counting down with a hidden crash point.
    let state = handle.current_state();
    assert_ne!(state.round_id, record.round_id);
    assert!(matches!(state.phase, Phase::Countdown | Phase::Running));
    assert!(state.crash_multiplier.is_none());

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_observers_see_monotonic_multiplier() {
    let store: SharedStore = Arc::new(aviator::storage::MemoryStore::new());
    let cfg = RoundConfig {
        countdown: Duration::ZERO,
        growth_rate: 2.0,
        ..RoundConfig::default()
    };
    let engine = RoundEngine::new(cfg, Box::new(ScriptedCrash::new(vec![50.0])), Instant::now());
    let (handle, task) = spawn_engine(engine, store, Duration::from_millis(2));

    let mut snapshots = handle.watch();
    let mut last = 0.0;
    let mut observed = 0;
    let round = handle.current_state().round_id;
    while observed < 50 {
        snapshots.changed().await.unwrap();
        let snap = snapshots.borrow_and_update().clone();
        if snap.round_id != round {
            break;
        }
        assert!(snap.current_multiplier >= last);
        last = snap.current_multiplier;
        observed += 1;
    }
    assert!(last >= 1.0);

    handle.shutdown().await;
    task.await.unwrap();
}
