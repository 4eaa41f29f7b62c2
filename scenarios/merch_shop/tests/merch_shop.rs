use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use merch_shop::{scenario, AuthFailurePolicy, MerchShopCli, AUTH_CHECK, SEND_CHECK};
use serde_json::{json, Value};
use shop_tunnel_runner::prelude::{run, RunSummary, ShopTunnelScenarioCli};
use shop_tunnel_summary_model::MetricsSummary;

#[derive(Default)]
struct ShopState {
    /// Fail every n-th send coin request with a 500
    fail_send_every: Option<u64>,
    send_calls: AtomicU64,
}

async fn auth(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let username = body["username"].as_str().unwrap_or_default();
    if body["password"] == "testpassword" && username.starts_with("testuser") {
        (StatusCode::OK, Json(json!({ "token": format!("token-{username}") })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "errors": "invalid credentials" })))
    }
}

fn authorised(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer token-testuser"))
}

async fn info(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if authorised(&headers) {
        (StatusCode::OK, Json(json!({ "coins": 1000, "inventory": [], "coinHistory": {} })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "errors": "unauthorized" })))
    }
}

async fn send_coin(State(state): State<Arc<ShopState>>, headers: HeaderMap) -> StatusCode {
    let call = state.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !authorised(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    match state.fail_send_every {
        Some(every) if call % every == 0 => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

async fn buy(headers: HeaderMap, Path(item): Path<String>) -> StatusCode {
    if !authorised(&headers) {
        StatusCode::UNAUTHORIZED
    } else if item == "pen" {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// A stand-in for the shop, served from its own runtime so that it keeps running while the
/// runner blocks the test thread.
struct MockShop {
    url: String,
    _runtime: tokio::runtime::Runtime,
}

fn start_shop(state: ShopState) -> MockShop {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let app = Router::new()
        .route("/api/auth", post(auth))
        .route("/api/info", get(info))
        .route("/api/sendCoin", post(send_coin))
        .route("/api/buy/{item}", get(buy))
        .with_state(Arc::new(state));

    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    runtime.spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockShop {
        url,
        _runtime: runtime,
    }
}

/// `rate` iterations per second for `duration_s` seconds against `shop`.
fn cli(shop: &MockShop, rate: u32, duration_s: u64) -> MerchShopCli {
    MerchShopCli::with_runner(ShopTunnelScenarioCli {
        connection_string: Some(shop.url.clone()),
        rate: Some(rate),
        duration: Some(std::time::Duration::from_secs(duration_s)),
        pre_allocated_vus: Some(10),
        max_vus: Some(200),
        no_progress: true,
        ..Default::default()
    })
}

fn metrics(summary: &RunSummary) -> &MetricsSummary {
    summary.metrics.as_ref().unwrap()
}

fn check_passes(metrics: &MetricsSummary, name: &str) -> (u64, u64) {
    metrics
        .check_results
        .iter()
        .find(|c| c.name == name)
        .map(|c| (c.passes, c.fails))
        .unwrap_or_default()
}

#[test]
fn healthy_shop_passes() {
    let shop = start_shop(ShopState::default());

    let summary = run(scenario(cli(&shop, 50, 1))).unwrap();
    let metrics = metrics(&summary);

    assert!(summary.passed);
    assert_eq!(50, metrics.iterations.count);
    assert_eq!(200, metrics.http_reqs.count);
    assert_eq!(0, metrics.http_req_failed.matched);
    assert_eq!(200, metrics.checks.matched);
    assert_eq!(1.0, metrics.checks.rate);
    assert_eq!((50, 0), check_passes(metrics, AUTH_CHECK));
    assert_eq!(0, metrics.dropped_iterations.count);
}

#[test]
fn failing_auth_continues_with_empty_token() {
    let shop = start_shop(ShopState::default());

    let mut cli = cli(&shop, 20, 1);
    cli.password = "wrong".to_string();

    let summary = run(scenario(cli)).unwrap();
    let metrics = metrics(&summary);

    assert!(!summary.passed);
    assert_eq!(20, metrics.iterations.count);
    assert_eq!(80, metrics.http_reqs.count);
    assert_eq!(80, metrics.http_req_failed.matched);
    assert_eq!(0, metrics.checks.matched);
    assert_eq!((0, 20), check_passes(metrics, AUTH_CHECK));
    assert_eq!(0, metrics.aborted_iterations.count);
}

#[test]
fn failing_auth_aborts_the_iteration() {
    let shop = start_shop(ShopState::default());

    let mut cli = cli(&shop, 20, 1);
    cli.password = "wrong".to_string();
    cli.on_auth_failure = AuthFailurePolicy::Abort;

    let summary = run(scenario(cli)).unwrap();
    let metrics = metrics(&summary);

    assert!(!summary.passed);
    assert_eq!(20, metrics.iterations.count);
    assert_eq!(20, metrics.aborted_iterations.count);
    // Only the auth step ran
    assert_eq!(20, metrics.http_reqs.count);
    assert_eq!(
        vec!["auth".to_string()],
        metrics
            .operations
            .iter()
            .map(|o| o.operation_id.clone())
            .collect::<Vec<_>>()
    );
}

#[test]
fn one_percent_send_failures_breach_the_error_threshold() {
    let shop = start_shop(ShopState {
        fail_send_every: Some(100),
        ..Default::default()
    });

    // 200 iterations, 800 requests, 2 failed sends
    let summary = run(scenario(cli(&shop, 100, 2))).unwrap();
    let metrics = metrics(&summary);

    assert!(!summary.passed);
    assert_eq!(800, metrics.http_reqs.count);
    assert_eq!(2, metrics.http_req_failed.matched);
    assert_eq!(0.0025, metrics.http_req_failed.rate);
    assert_eq!((198, 2), check_passes(metrics, SEND_CHECK));

    let failed = summary.failed_thresholds().collect::<Vec<_>>();
    assert_eq!(1, failed.len());
    assert_eq!("http_req_failed", failed[0].metric);
    assert_eq!("rate<0.0001", failed[0].predicate);
}

#[test]
fn unreachable_shop_records_transport_failures() {
    // Bind and drop to find a port that nothing is listening on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let cli = MerchShopCli::with_runner(ShopTunnelScenarioCli {
        connection_string: Some(url),
        rate: Some(5),
        duration: Some(std::time::Duration::from_secs(1)),
        pre_allocated_vus: Some(2),
        max_vus: Some(10),
        no_progress: true,
        ..Default::default()
    });

    let summary = run(scenario(cli)).unwrap();
    let metrics = metrics(&summary);

    assert!(!summary.passed);
    assert_eq!(20, metrics.http_reqs.count);
    assert_eq!(1.0, metrics.http_req_failed.rate);
}

#[test]
fn summary_is_exported_for_the_run() {
    let shop = start_shop(ShopState::default());
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("result.json");

    let mut cli = cli(&shop, 10, 1);
    cli.runner.summary_export = Some(export.clone());

    let summary = run(scenario(cli)).unwrap();

    let exported: Value = serde_json::from_reader(std::fs::File::open(&export).unwrap()).unwrap();
    assert_eq!("merch_shop", exported["scenario_name"]);
    assert_eq!(summary.run_id, exported["run_id"].as_str().unwrap());
    assert_eq!(
        json!(["med<50"]),
        exported["thresholds"]["http_req_duration"]
    );
    assert_eq!(true, exported["passed"]);
}
