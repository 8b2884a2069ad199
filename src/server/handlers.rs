//! Control method handlers
//!
//! Handlers receive the references they need through [`HandlerContext`] at
//! registration time; nothing is looked up through globals. Each handler
//! returns a [`Response`] - protocol and capacity failures are responses
//! with error codes, never panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::info;

use crate::config::ConfigStore;
use crate::llm::{
    InferenceRequest, LlmEngine, ERR_NOT_LOADED, ERR_QUEUE_CLEARED, ERR_QUEUE_FULL,
    ERR_RATE_LIMITED, ERR_WORKER_STOPPED,
};
use crate::logging::LogHandle;
use crate::monitors::MonitorHandle;
use crate::storage::{AlertCategory, AlertFilter, AlertSeverity, AlertStatus, AlertStore};
use crate::DAEMON_NAME;

use super::protocol::{error_codes, Request, Response};
use super::{handler, ControlServer};

/// Everything the handlers borrow from the daemon.
pub struct HandlerContext {
    pub config: ConfigStore,
    pub store: Arc<AlertStore>,
    pub monitor: MonitorHandle,
    pub llm: LlmEngine,
    pub log: Option<LogHandle>,
    /// The kernel's shutdown flag; the `shutdown` method flips it.
    pub shutdown: Arc<AtomicBool>,
    pub started_at: Instant,
}

fn param_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn param_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

fn param_u32(params: &Value, key: &str) -> Option<u32> {
    params.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn param_f32(params: &Value, key: &str) -> Option<f32> {
    params.get(key).and_then(Value::as_f64).map(|v| v as f32)
}

/// Map an inference error string onto the protocol error code.
fn llm_error_code(error: &str) -> i32 {
    match error {
        ERR_NOT_LOADED => error_codes::LLM_NOT_LOADED,
        ERR_QUEUE_FULL | ERR_WORKER_STOPPED | ERR_QUEUE_CLEARED => error_codes::LLM_BUSY,
        ERR_RATE_LIMITED => error_codes::RATE_LIMITED,
        _ => error_codes::INTERNAL_ERROR,
    }
}

/// Register every control method on the server.
pub fn register_all(server: &ControlServer, ctx: HandlerContext) {
    let ctx = Arc::new(ctx);

    server.register_handler("ping", handler(|_req| async move {
        Response::ok(json!({"pong": true}))
    }));

    server.register_handler("version", handler(|_req| async move {
        Response::ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "name": DAEMON_NAME,
        }))
    }));

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("status", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_status(ctx).await }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("config.get", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_config_get(ctx) }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("config.reload", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_config_reload(ctx) }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("health", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_health(ctx).await }
        }));
    }

    for method in ["alerts", "alerts.get"] {
        let ctx = Arc::clone(&ctx);
        server.register_handler(method, handler(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_alerts(ctx, req).await }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("alerts.acknowledge", handler(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_acknowledge(ctx, req).await }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("alerts.dismiss", handler(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_dismiss(ctx, req).await }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("llm.status", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move { Response::ok(ctx.llm.status_json()) }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("llm.load", handler(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_llm_load(ctx, req).await }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("llm.unload", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.llm.unload().await;
                Response::ok(json!({"unloaded": true}))
            }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("llm.infer", handler(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { handle_llm_infer(ctx, req).await }
        }));
    }

    {
        let ctx = Arc::clone(&ctx);
        server.register_handler("shutdown", handler(move |_req| {
            let ctx = Arc::clone(&ctx);
            async move {
                info!("shutdown requested via control socket");
                ctx.shutdown.store(true, Ordering::SeqCst);
                Response::ok(json!({"shutdown": "initiated"}))
            }
        }));
    }
}

async fn handle_status(ctx: Arc<HandlerContext>) -> Response {
    Response::ok(json!({
        "running": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
        "alerts": ctx.store.counts().to_json(),
        "llm": ctx.llm.status_json(),
    }))
}

fn handle_config_get(ctx: Arc<HandlerContext>) -> Response {
    let c = ctx.config.get();
    Response::ok(json!({
        "socket_path": c.socket.path,
        "monitor_interval_secs": c.monitoring.interval_secs,
        "log_level": c.log_level,
        "llm": {
            "enabled": c.llm.enabled,
            "model_path": c.llm.model_path,
            "endpoint": c.llm.endpoint,
            "lazy_load": c.llm.lazy_load,
        },
        "alerts": {
            "db_path": c.alerts.db_path,
            "retention_hours": c.alerts.retention_hours,
        },
        "thresholds": {
            "cpu_warn": c.thresholds.cpu_warn,
            "cpu_crit": c.thresholds.cpu_crit,
            "mem_warn": c.thresholds.mem_warn,
            "mem_crit": c.thresholds.mem_crit,
            "disk_warn": c.thresholds.disk_warn,
            "disk_crit": c.thresholds.disk_crit,
        },
        "rate_limit": {
            "max_requests_per_sec": c.rate_limit.max_requests_per_sec,
        },
    }))
}

fn handle_config_reload(ctx: Arc<HandlerContext>) -> Response {
    match ctx.config.reload() {
        Ok(()) => {
            if let Some(log) = &ctx.log {
                log.set_level(ctx.config.get().log_level);
            }
            Response::ok(json!({"reloaded": true}))
        }
        Err(e) => Response::err(e.to_string(), error_codes::CONFIG_ERROR),
    }
}

async fn handle_health(ctx: Arc<HandlerContext>) -> Response {
    // Prefer a fresh check; fall back to the last published snapshot if
    // the monitor is unavailable (e.g. mid-shutdown).
    let snapshot = match ctx.monitor.force_check().await {
        Some(snapshot) => snapshot,
        None => ctx.monitor.latest_snapshot(),
    };

    let c = ctx.config.get();
    let mut result = snapshot.to_json();
    result["thresholds"] = json!({
        "cpu_warn": c.thresholds.cpu_warn,
        "cpu_crit": c.thresholds.cpu_crit,
        "mem_warn": c.thresholds.mem_warn,
        "mem_crit": c.thresholds.mem_crit,
        "disk_warn": c.thresholds.disk_warn,
        "disk_crit": c.thresholds.disk_crit,
    });
    result["alerts"] = ctx.store.counts().to_json();
    Response::ok(result)
}

async fn handle_alerts(ctx: Arc<HandlerContext>, req: Request) -> Response {
    let mut filter = AlertFilter::default();

    if let Some(raw) = param_str(&req.params, "severity") {
        match AlertSeverity::parse(&raw) {
            Some(severity) => filter.severity = Some(severity),
            None => {
                return Response::err(
                    format!("unknown severity: {raw}"),
                    error_codes::INVALID_PARAMS,
                )
            }
        }
    }
    if let Some(raw) = param_str(&req.params, "category") {
        match AlertCategory::parse(&raw) {
            Some(category) => filter.category = Some(category),
            None => {
                return Response::err(
                    format!("unknown category: {raw}"),
                    error_codes::INVALID_PARAMS,
                )
            }
        }
    }
    if let Some(raw) = param_str(&req.params, "status") {
        match AlertStatus::parse(&raw) {
            Some(status) => filter.status = Some(status),
            None => {
                return Response::err(
                    format!("unknown status: {raw}"),
                    error_codes::INVALID_PARAMS,
                )
            }
        }
    }
    filter.source = param_str(&req.params, "source");
    filter.include_dismissed = param_bool(&req.params, "include_dismissed").unwrap_or(false);

    match ctx.store.list(&filter).await {
        Ok(alerts) => {
            let rendered: Vec<Value> = alerts.iter().map(|a| a.to_json()).collect();
            Response::ok(json!({
                "alerts": rendered,
                "count": rendered.len(),
                "counts": ctx.store.counts().to_json(),
            }))
        }
        Err(e) => Response::err(e.to_string(), error_codes::INTERNAL_ERROR),
    }
}

async fn handle_acknowledge(ctx: Arc<HandlerContext>, req: Request) -> Response {
    if param_bool(&req.params, "all") == Some(true) {
        return match ctx.store.acknowledge_all().await {
            Ok(count) => Response::ok(json!({"acknowledged": count})),
            Err(e) => Response::err(e.to_string(), error_codes::INTERNAL_ERROR),
        };
    }

    let Some(uuid) = param_str(&req.params, "uuid") else {
        return Response::err(
            "expected \"uuid\" or \"all\": true",
            error_codes::INVALID_PARAMS,
        );
    };

    match ctx.store.acknowledge(&uuid).await {
        Ok(true) => Response::ok(json!({"acknowledged": true, "uuid": uuid})),
        Ok(false) => Response::err(
            format!("no active alert with uuid {uuid}"),
            error_codes::ALERT_NOT_FOUND,
        ),
        Err(e) => Response::err(e.to_string(), error_codes::INTERNAL_ERROR),
    }
}

async fn handle_dismiss(ctx: Arc<HandlerContext>, req: Request) -> Response {
    let Some(uuid) = param_str(&req.params, "uuid") else {
        return Response::err("missing \"uuid\"", error_codes::INVALID_PARAMS);
    };

    match ctx.store.dismiss(&uuid).await {
        Ok(true) => Response::ok(json!({"dismissed": true, "uuid": uuid})),
        Ok(false) => Response::err(
            format!("no alert with uuid {uuid}"),
            error_codes::ALERT_NOT_FOUND,
        ),
        Err(e) => Response::err(e.to_string(), error_codes::INTERNAL_ERROR),
    }
}

async fn handle_llm_load(ctx: Arc<HandlerContext>, req: Request) -> Response {
    let model_path = param_str(&req.params, "model_path")
        .filter(|p| !p.is_empty())
        .or_else(|| {
            let configured = ctx.config.get().llm.model_path;
            (!configured.is_empty()).then_some(configured)
        });

    let Some(model_path) = model_path else {
        return Response::err("no model path configured", error_codes::INVALID_PARAMS);
    };

    match ctx.llm.load(&model_path).await {
        Ok(info) => Response::ok(json!({"loaded": true, "model": info.to_json()})),
        Err(e) => Response::err(e.to_string(), error_codes::INTERNAL_ERROR),
    }
}

async fn handle_llm_infer(ctx: Arc<HandlerContext>, req: Request) -> Response {
    let Some(prompt) = param_str(&req.params, "prompt").filter(|p| !p.is_empty()) else {
        return Response::err("missing \"prompt\"", error_codes::INVALID_PARAMS);
    };

    let defaults = InferenceRequest::default();
    let request = InferenceRequest {
        prompt,
        max_tokens: param_u32(&req.params, "max_tokens").unwrap_or(defaults.max_tokens),
        temperature: param_f32(&req.params, "temperature").unwrap_or(defaults.temperature),
        top_p: param_f32(&req.params, "top_p").unwrap_or(defaults.top_p),
        stop: param_str(&req.params, "stop"),
        request_id: param_str(&req.params, "id")
            .or(req.id.clone())
            .unwrap_or_default(),
    };

    match ctx.llm.submit_async(request).await {
        Ok(result) if result.success => Response::ok(result.to_json()),
        Ok(result) => Response::err(result.error.clone(), llm_error_code(&result.error)),
        Err(_) => Response::err(
            "inference worker unavailable",
            error_codes::INTERNAL_ERROR,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_errors_map_to_protocol_codes() {
        assert_eq!(llm_error_code(ERR_NOT_LOADED), error_codes::LLM_NOT_LOADED);
        assert_eq!(llm_error_code(ERR_QUEUE_FULL), error_codes::LLM_BUSY);
        assert_eq!(llm_error_code(ERR_RATE_LIMITED), error_codes::RATE_LIMITED);
        assert_eq!(llm_error_code("backend exploded"), error_codes::INTERNAL_ERROR);
    }

    #[test]
    fn param_helpers_tolerate_wrong_types() {
        let params = json!({"uuid": 7, "all": "yes", "max_tokens": 32});
        assert_eq!(param_str(&params, "uuid"), None);
        assert_eq!(param_bool(&params, "all"), None);
        assert_eq!(param_u32(&params, "max_tokens"), Some(32));
        assert_eq!(param_f32(&params, "missing"), None);
    }
}
