//! End-to-end tests driving the daemon through its control socket
//!
//! Each test builds a real stack (SQLite store, monitor, LLM engine,
//! control server) on a private temp directory and talks to it exactly the
//! way a client would: one JSON request per connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use vigild::config::ConfigStore;
use vigild::daemon::Service;
use vigild::llm::{HttpBackend, LlmEngine};
use vigild::monitors::{HealthCollector, MonitorService, ThresholdEngine};
use vigild::server::{handlers::register_all, ControlServer, HandlerContext};
use vigild::storage::{Alert, AlertCategory, AlertSeverity, AlertStore};
use vigild::util::parse_utc;

struct TestStack {
    dir: tempfile::TempDir,
    config_path: PathBuf,
    config: ConfigStore,
    store: Arc<AlertStore>,
    server: ControlServer,
    monitor: Arc<MonitorService>,
    llm: LlmEngine,
    shutdown: Arc<AtomicBool>,
}

impl TestStack {
    fn socket_path(&self) -> PathBuf {
        self.dir.path().join("control.sock")
    }

    async fn teardown(&self) {
        self.server.stop().await;
        self.monitor.stop().await;
        self.llm.stop().await;
    }
}

/// Build and start a stack. `extra_yaml` is appended to the generated
/// configuration file; `start_monitor` controls whether the monitor loop
/// (which samples the real host) runs.
async fn spawn_stack(extra_yaml: &str, start_monitor: bool) -> TestStack {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("control.sock");
    let db_path = dir.path().join("alerts.db");

    let config_path = dir.path().join("config.yaml");
    let yaml = format!(
        "socket:\n  path: {}\nalerts:\n  db_path: {}\n# Keep host state from tripping thresholds during tests.\nthresholds:\n  cpu_warn: 0.98\n  cpu_crit: 0.99\n  mem_warn: 0.98\n  mem_crit: 0.99\n  disk_warn: 0.98\n  disk_crit: 0.99\n{}",
        socket_path.display(),
        db_path.display(),
        extra_yaml,
    );
    std::fs::write(&config_path, yaml).unwrap();

    let config = ConfigStore::new();
    config.load(&config_path).unwrap();
    let snapshot = config.get();

    let store = Arc::new(AlertStore::open(&snapshot.alerts.db_path).await.unwrap());
    let llm = LlmEngine::new(
        Arc::new(HttpBackend::new(&snapshot.llm.endpoint).unwrap()),
        snapshot.llm.clone(),
    );
    let engine = Arc::new(ThresholdEngine::new(Arc::clone(&store), Some(llm.clone())));
    let monitor = Arc::new(MonitorService::new(
        HealthCollector::new(),
        engine,
        config.clone(),
    ));

    let server = ControlServer::new(
        socket_path,
        Duration::from_secs(5),
        snapshot.rate_limit.max_requests_per_sec,
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    register_all(
        &server,
        HandlerContext {
            config: config.clone(),
            store: Arc::clone(&store),
            monitor: monitor.handle(),
            llm: llm.clone(),
            log: None,
            shutdown: Arc::clone(&shutdown),
            started_at: Instant::now(),
        },
    );

    if start_monitor {
        monitor.start().await.unwrap();
    }
    llm.start().await.unwrap();
    server.start().await.unwrap();

    TestStack {
        dir,
        config_path,
        config,
        store,
        server,
        monitor,
        llm,
        shutdown,
    }
}

async fn send_raw(path: &Path, body: &[u8]) -> Value {
    let mut stream = UnixStream::connect(path).await.unwrap();
    stream.write_all(body).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    serde_json::from_slice(&response).unwrap()
}

async fn call(path: &Path, method: &str, params: Value) -> Value {
    let body = json!({"method": method, "params": params});
    send_raw(path, body.to_string().as_bytes()).await
}

fn seed_warning(message: &str) -> Alert {
    Alert::new(
        AlertSeverity::Warning,
        AlertCategory::Disk,
        "monitor",
        message,
    )
}

#[tokio::test]
async fn ping_round_trip() {
    // S1: ping with defaults yields success, pong and a parseable
    // RFC-3339 timestamp.
    let stack = spawn_stack("", false).await;

    let response = call(&stack.socket_path(), "ping", json!({})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["pong"], true);
    let timestamp = response["timestamp"].as_str().unwrap();
    assert!(parse_utc(timestamp).is_some(), "timestamp not RFC-3339: {timestamp}");

    stack.teardown().await;
}

#[tokio::test]
async fn version_reports_daemon_name() {
    let stack = spawn_stack("", false).await;

    let response = call(&stack.socket_path(), "version", json!({})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["name"], "vigild");
    assert!(response["result"]["version"].is_string());

    stack.teardown().await;
}

#[tokio::test]
async fn acknowledge_all_resets_counters() {
    // S3: three ACTIVE WARNING alerts; acknowledge-all reports 3 and the
    // counters drop to zero.
    let stack = spawn_stack("", false).await;

    for i in 0..3 {
        stack
            .store
            .create(seed_warning(&format!("warning {i}")))
            .await
            .unwrap();
    }

    let response = call(&stack.socket_path(), "alerts", json!({})).await;
    assert_eq!(response["result"]["counts"]["warning"], 3);
    assert_eq!(response["result"]["counts"]["total"], 3);

    let response = call(
        &stack.socket_path(),
        "alerts.acknowledge",
        json!({"all": true}),
    )
    .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["acknowledged"], 3);

    let response = call(&stack.socket_path(), "alerts", json!({})).await;
    assert_eq!(response["result"]["counts"]["warning"], 0);
    assert_eq!(response["result"]["counts"]["total"], 0);
    // Acknowledged alerts are still listed (only dismissed ones drop out).
    assert_eq!(response["result"]["count"], 3);

    stack.teardown().await;
}

#[tokio::test]
async fn dismissing_absent_alert_reports_not_found() {
    // S4: dismissing an unknown uuid yields ALERT_NOT_FOUND (103).
    let stack = spawn_stack("", false).await;

    let response = call(
        &stack.socket_path(),
        "alerts.dismiss",
        json!({"uuid": "00000000-0000-0000-0000-000000000000"}),
    )
    .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error_code"], 103);

    stack.teardown().await;
}

#[tokio::test]
async fn dismiss_then_excluded_from_default_listing() {
    let stack = spawn_stack("", false).await;

    let created = stack.store.create(seed_warning("to dismiss")).await.unwrap();
    let response = call(
        &stack.socket_path(),
        "alerts.dismiss",
        json!({"uuid": created.uuid}),
    )
    .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["dismissed"], true);

    let response = call(&stack.socket_path(), "alerts.get", json!({})).await;
    assert_eq!(response["result"]["count"], 0);

    let response = call(
        &stack.socket_path(),
        "alerts.get",
        json!({"include_dismissed": true}),
    )
    .await;
    assert_eq!(response["result"]["count"], 1);

    stack.teardown().await;
}

#[tokio::test]
async fn invalid_filter_value_is_rejected() {
    let stack = spawn_stack("", false).await;

    let response = call(
        &stack.socket_path(),
        "alerts",
        json!({"severity": "catastrophic"}),
    )
    .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error_code"], -32602);

    stack.teardown().await;
}

#[tokio::test]
async fn malformed_request_gets_parse_error_and_server_survives() {
    // Property 8: syntactically invalid input is answered with PARSE_ERROR
    // and the server keeps serving.
    let stack = spawn_stack("", false).await;

    let response = send_raw(&stack.socket_path(), b"this is not json").await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error_code"], -32700);

    let response = send_raw(&stack.socket_path(), br#"{"params": {}}"#).await;
    assert_eq!(response["error_code"], -32600);

    let response = call(&stack.socket_path(), "ping", json!({})).await;
    assert_eq!(response["success"], true);

    stack.teardown().await;
}

#[tokio::test]
async fn request_rate_is_limited_per_second() {
    // Property 9: with max 3 requests/sec the fourth immediate request is
    // refused with RATE_LIMITED (102).
    let stack = spawn_stack("rate_limit:\n  max_requests_per_sec: 3\n", false).await;

    let mut codes = Vec::new();
    for _ in 0..4 {
        let response = call(&stack.socket_path(), "ping", json!({})).await;
        codes.push(response["error_code"].as_i64().unwrap());
    }
    assert_eq!(&codes[..3], &[0, 0, 0]);
    assert_eq!(codes[3], 102);

    stack.teardown().await;
}

#[tokio::test]
async fn reload_picks_up_new_log_level() {
    // S5: config.get reflects the file; after rewriting the file,
    // config.reload applies the new level.
    let stack = spawn_stack("log_level: 1\n", false).await;

    let response = call(&stack.socket_path(), "config.get", json!({})).await;
    assert_eq!(response["result"]["log_level"], 1);

    let yaml = std::fs::read_to_string(&stack.config_path)
        .unwrap()
        .replace("log_level: 1", "log_level: 2");
    std::fs::write(&stack.config_path, yaml).unwrap();

    let response = call(&stack.socket_path(), "config.reload", json!({})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["reloaded"], true);

    let response = call(&stack.socket_path(), "config.get", json!({})).await;
    assert_eq!(response["result"]["log_level"], 2);
    assert_eq!(stack.config.get().log_level, 2);

    stack.teardown().await;
}

#[tokio::test]
async fn reload_failure_keeps_old_config() {
    let stack = spawn_stack("log_level: 1\n", false).await;

    std::fs::write(&stack.config_path, "thresholds:\n  cpu_warn: 2.0\n").unwrap();
    let response = call(&stack.socket_path(), "config.reload", json!({})).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error_code"], 104);

    let response = call(&stack.socket_path(), "config.get", json!({})).await;
    assert_eq!(response["result"]["log_level"], 1);

    stack.teardown().await;
}

#[tokio::test]
async fn health_returns_snapshot_and_thresholds() {
    let stack = spawn_stack("", true).await;

    let response = call(&stack.socket_path(), "health", json!({})).await;
    assert_eq!(response["success"], true);
    let result = &response["result"];
    assert!(result["cpu"]["usage_percent"].is_number());
    assert!(result["memory"]["total_bytes"].is_number());
    assert!(result["disk"]["total_bytes"].is_number());
    assert!(result["uptime_secs"].is_number());
    assert_eq!(result["thresholds"]["disk_warn"], 0.98);
    assert!(result["alerts"]["total"].is_number());

    stack.teardown().await;
}

#[tokio::test]
async fn llm_methods_report_unloaded_state() {
    let stack = spawn_stack("", false).await;

    let response = call(&stack.socket_path(), "llm.status", json!({})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["loaded"], false);
    assert_eq!(response["result"]["queue_size"], 0);

    // Inference without a prompt is an invalid-params error.
    let response = call(&stack.socket_path(), "llm.infer", json!({})).await;
    assert_eq!(response["error_code"], -32602);

    // With a prompt but no model the worker refuses with LLM_NOT_LOADED.
    let response = call(
        &stack.socket_path(),
        "llm.infer",
        json!({"prompt": "hello"}),
    )
    .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error_code"], 100);

    // Loading without any configured path is rejected cleanly.
    let response = call(&stack.socket_path(), "llm.load", json!({})).await;
    assert_eq!(response["error_code"], -32602);

    stack.teardown().await;
}

#[tokio::test]
async fn shutdown_method_flips_the_kernel_flag() {
    let stack = spawn_stack("", false).await;

    let response = call(&stack.socket_path(), "shutdown", json!({})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["shutdown"], "initiated");
    assert!(stack.shutdown.load(Ordering::SeqCst));

    stack.teardown().await;
}

#[tokio::test]
async fn stop_waits_for_in_flight_handler() {
    // S6: a handler sleeping 300 ms is in flight when stop() is called
    // 50 ms later; stop returns only after the response went out and the
    // socket file is unlinked exactly once.
    let stack = spawn_stack("", false).await;
    stack.server.register_handler(
        "test.slow",
        vigild::server::handler(|_req| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            vigild::server::protocol::Response::ok(json!({"done": true}))
        }),
    );

    let socket = stack.socket_path();
    let client = tokio::spawn({
        let socket = socket.clone();
        async move { call(&socket, "test.slow", json!({})).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let begun = Instant::now();
    stack.server.stop().await;
    assert!(begun.elapsed() >= Duration::from_millis(200));
    assert!(!socket.exists());

    let response = client.await.unwrap();
    assert_eq!(response["result"]["done"], true);

    stack.teardown().await;
}

#[tokio::test]
async fn status_reports_uptime_and_counts() {
    let stack = spawn_stack("", false).await;
    stack.store.create(seed_warning("one")).await.unwrap();

    let response = call(&stack.socket_path(), "status", json!({})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["running"], true);
    assert_eq!(response["result"]["alerts"]["warning"], 1);
    assert!(response["result"]["uptime_secs"].is_number());
    assert_eq!(response["result"]["llm"]["loaded"], false);

    stack.teardown().await;
}
