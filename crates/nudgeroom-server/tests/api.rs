//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration};
use http_body_util::BodyExt;
use nudgeroom_core::generator::ScriptedGenerator;
use nudgeroom_core::rules::{ActionExecutor, Rule, RuleEngine};
use nudgeroom_core::{ActionLog, Clock, CloseHandle, CloseReason, Config, ManualClock, Services};
use nudgeroom_server::{router, AppState, RuleDispatcher};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tower::ServiceExt;

struct Harness {
    app: Router,
    state: AppState,
    clock: ManualClock,
}

fn harness(with_dispatcher: bool) -> Harness {
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let services = Services::in_memory(
        Arc::new(clock.clone()),
        &Config::default(),
        Arc::new(ScriptedGenerator::default()),
    )
    .unwrap();
    let timeout = if with_dispatcher {
        StdDuration::from_secs(5)
    } else {
        StdDuration::from_millis(50)
    };
    let state = AppState::new(services.clone(), timeout);
    if with_dispatcher {
        let dispatcher = RuleDispatcher::new(
            RuleEngine::new(Rule::defaults()),
            ActionExecutor::from_services(&services),
            state.correlations.clone(),
        );
        tokio::spawn(dispatcher.run(services.bus.subscribe_tasks(), std::future::pending()));
    }
    Harness {
        app: router(state.clone()),
        state,
        clock,
    }
}

async fn login(h: &Harness, user: &str) -> String {
    h.state.services.sessions.issue(user).await.unwrap()
}

async fn call(h: &Harness, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(body) => {
            req = req.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let resp = h.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let h = harness(false);
    let (status, body) = call(&h, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let h = harness(false);
    let (status, body) = call(&h, "GET", "/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = call(&h, "GET", "/tasks", Some("nr_unknown"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_task_waits_for_rule_results() {
    let h = harness(true);
    let token = login(&h, "alice").await;

    let (status, body) = call(&h, "POST", "/tasks", Some(&token), Some(json!({ "title": "Write report" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let log: ActionLog = serde_json::from_value(body["actions"].clone()).unwrap();
    assert_eq!(log.success_count(), 1);
    assert_eq!(h.state.correlations.pending(), 0);

    let (status, nudges) = call(&h, "GET", "/nudges", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let nudges = nudges.as_array().unwrap();
    assert_eq!(nudges.len(), 1);
    assert_eq!(nudges[0]["task"], body["task"]["id"]);
}

#[tokio::test]
async fn test_task_request_answers_accepted_when_rules_are_slow() {
    let h = harness(false);
    let token = login(&h, "alice").await;

    let (status, body) = call(&h, "POST", "/tasks", Some(&token), Some(json!({ "title": "Plan" }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.get("actions").is_none());
    assert_eq!(body["task"]["title"], "Plan");
    assert_eq!(h.state.correlations.pending(), 0);
}

#[tokio::test]
async fn test_bet_flow_and_ledger() {
    let h = harness(true);
    let token = login(&h, "alice").await;
    let (_, created) = call(&h, "POST", "/tasks", Some(&token), Some(json!({ "title": "Gym" }))).await;
    let task = created["task"]["id"].as_str().unwrap().to_string();
    let deadline = h.clock.now() + Duration::hours(1);

    let (status, _) = call(
        &h,
        "POST",
        "/bets",
        Some(&token),
        Some(json!({ "task": "missing", "wager": 10, "deadline": deadline })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, bet) = call(
        &h,
        "POST",
        "/bets",
        Some(&token),
        Some(json!({ "task": task, "wager": 20, "deadline": deadline })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(bet["wager"], 20);

    let (status, _) = call(
        &h,
        "POST",
        "/bets",
        Some(&token),
        Some(json!({ "task": task, "wager": 5, "deadline": deadline })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, ledger) = call(&h, "GET", "/ledger", Some(&token), None).await;
    assert_eq!(ledger["points"], 80);

    // Starting the task in time wins the bet through the rules.
    let (status, _) = call(&h, "POST", &format!("/tasks/{task}/start"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, ledger) = call(&h, "GET", "/ledger", Some(&token), None).await;
    assert_eq!(ledger["points"], 102);
    assert_eq!(ledger["streak"], 1);

    let (_, bets) = call(&h, "GET", "/bets", Some(&token), None).await;
    assert_eq!(bets[0]["success"], true);
}

#[tokio::test]
async fn test_invalid_wager_is_bad_request() {
    let h = harness(true);
    let token = login(&h, "alice").await;
    let (_, created) = call(&h, "POST", "/tasks", Some(&token), Some(json!({ "title": "Swim" }))).await;
    let deadline = h.clock.now() + Duration::hours(1);

    let (status, body) = call(
        &h,
        "POST",
        "/bets",
        Some(&token),
        Some(json!({ "task": created["task"]["id"], "wager": 0, "deadline": deadline })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("positive"));
}

#[tokio::test]
async fn test_cancel_bet_refunds() {
    let h = harness(true);
    let token = login(&h, "alice").await;
    let (_, created) = call(&h, "POST", "/tasks", Some(&token), Some(json!({ "title": "Bake" }))).await;
    let task = created["task"]["id"].as_str().unwrap().to_string();
    let deadline = h.clock.now() + Duration::hours(1);
    call(&h, "POST", "/bets", Some(&token), Some(json!({ "task": task, "wager": 15, "deadline": deadline }))).await;

    let (status, body) = call(&h, "DELETE", &format!("/bets/{task}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refunded"], true);
    let (_, ledger) = call(&h, "GET", "/ledger", Some(&token), None).await;
    assert_eq!(ledger["points"], 100);

    let (status, _) = call(&h, "DELETE", &format!("/bets/{task}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_starting_twice_is_conflict() {
    let h = harness(true);
    let token = login(&h, "alice").await;
    let (_, created) = call(&h, "POST", "/tasks", Some(&token), Some(json!({ "title": "Call mum" }))).await;
    let uri = format!("/tasks/{}/start", created["task"]["id"].as_str().unwrap());

    assert_eq!(call(&h, "POST", &uri, Some(&token), None).await.0, StatusCode::OK);
    assert_eq!(call(&h, "POST", &uri, Some(&token), None).await.0, StatusCode::CONFLICT);
    assert_eq!(
        call(&h, "POST", "/tasks/nope/start", Some(&token), None).await.0,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_log_emotion() {
    let h = harness(false);
    let token = login(&h, "alice").await;
    let (status, entry) = call(
        &h,
        "POST",
        "/emotions",
        Some(&token),
        Some(json!({ "emotion": "Tired", "note": "long day" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["emotion"], "tired");

    let (status, _) = call(&h, "POST", "/emotions", Some(&token), Some(json!({ "emotion": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_revokes_and_closes_streams() {
    let h = harness(false);
    let token = login(&h, "alice").await;
    let other = login(&h, "bob").await;
    let alice_stream = CloseHandle::new();
    let bob_stream = CloseHandle::new();
    let _a = h.state.registry.register("alice", alice_stream.clone());
    let _b = h.state.registry.register("bob", bob_stream.clone());

    let (status, body) = call(&h, "POST", "/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 1);
    assert_eq!(body["closed"], 1);
    assert_eq!(alice_stream.reason(), Some(CloseReason::LoggedOut));
    assert!(!bob_stream.is_closed());

    assert_eq!(call(&h, "GET", "/tasks", Some(&token), None).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(call(&h, "GET", "/tasks", Some(&other), None).await.0, StatusCode::OK);
}
