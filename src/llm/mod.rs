//! LLM inference worker
//!
//! A single background worker consumes a bounded FIFO of inference
//! requests. Admission is two-gated: a per-second rate limiter and a queue
//! depth cap, both refusing with an immediate error result rather than
//! blocking the caller.
//!
//! ## TOCTOU discipline
//!
//! One mutex guards the backend across the `is_loaded` check *and* the
//! `generate` call, closing the window against a concurrent `unload`.
//! Read-only status calls (`is_loaded`, `info`, `queue_depth`,
//! `status_json`) deliberately skip that mutex: they may report a model the
//! worker is about to unload, which is acceptable because status is
//! advisory.
//!
//! ## Shutdown
//!
//! `stop` flips the shutdown flag, wakes the worker, joins it (draining the
//! queue with "Queue cleared" errors) and only then unloads the model - so
//! `generate` never runs after `unload` has returned.

pub mod backend;
pub mod types;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LlmSettings;
use crate::daemon::Service;
use crate::util::RateLimiter;

pub use backend::{HttpBackend, LlmBackend, LlmError};
pub use types::{
    InferenceRequest, InferenceResult, LoadParams, ModelInfo, ERR_NOT_LOADED, ERR_QUEUE_CLEARED,
    ERR_QUEUE_FULL, ERR_RATE_LIMITED, ERR_WORKER_STOPPED,
};

struct Queued {
    request: InferenceRequest,
    respond_to: oneshot::Sender<InferenceResult>,
}

struct EngineInner {
    backend: Arc<dyn LlmBackend>,
    /// Held across the loaded-check and the generate call.
    backend_lock: tokio::sync::Mutex<()>,
    queue: Mutex<VecDeque<Queued>>,
    queue_wake: Notify,
    admission: RateLimiter,
    settings: LlmSettings,
    running: AtomicBool,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Cheap-clone handle to the inference worker.
#[derive(Clone)]
pub struct LlmEngine {
    inner: Arc<EngineInner>,
}

impl LlmEngine {
    pub fn new(backend: Arc<dyn LlmBackend>, settings: LlmSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                backend,
                backend_lock: tokio::sync::Mutex::new(()),
                queue: Mutex::new(VecDeque::new()),
                queue_wake: Notify::new(),
                admission: RateLimiter::new(settings.max_per_sec),
                settings,
                running: AtomicBool::new(false),
                worker: tokio::sync::Mutex::new(None),
                shutdown_tx,
            }),
        }
    }

    /// The settings this engine was constructed with.
    pub fn settings(&self) -> &LlmSettings {
        &self.inner.settings
    }

    /// Load a model through the backend. Blocks other backend users for the
    /// duration.
    pub async fn load(&self, model_path: &str) -> Result<ModelInfo, LlmError> {
        let params = LoadParams {
            model_path: model_path.to_string(),
            context_length: self.inner.settings.context_length,
            threads: self.inner.settings.threads,
            batch_size: self.inner.settings.batch_size,
            mmap: self.inner.settings.mmap,
        };
        let _guard = self.inner.backend_lock.lock().await;
        self.inner.backend.load(&params).await
    }

    /// Unload the current model, if any.
    pub async fn unload(&self) {
        let _guard = self.inner.backend_lock.lock().await;
        self.inner.backend.unload().await;
    }

    /// Advisory: whether a model is currently loaded. Takes no lock.
    pub fn is_loaded(&self) -> bool {
        self.inner.backend.is_loaded()
    }

    /// Advisory model metadata. Takes no lock.
    pub fn info(&self) -> Option<ModelInfo> {
        self.inner.backend.info()
    }

    /// Current queue depth.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().expect("queue lock poisoned").len()
    }

    /// Queue an inference request.
    ///
    /// The returned receiver always resolves: refused admissions (worker
    /// stopped, rate limit, queue full) resolve immediately with the
    /// matching error result.
    pub fn submit_async(&self, mut request: InferenceRequest) -> oneshot::Receiver<InferenceResult> {
        if request.request_id.is_empty() {
            request.request_id = Uuid::new_v4().to_string();
        }
        let (tx, rx) = oneshot::channel();

        if !self.inner.running.load(Ordering::SeqCst) {
            let _ = tx.send(InferenceResult::failure(&request.request_id, ERR_WORKER_STOPPED));
            return rx;
        }

        if !self.inner.admission.allow() {
            let _ = tx.send(InferenceResult::failure(&request.request_id, ERR_RATE_LIMITED));
            return rx;
        }

        {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            if queue.len() >= self.inner.settings.max_queue {
                drop(queue);
                let _ = tx.send(InferenceResult::failure(&request.request_id, ERR_QUEUE_FULL));
                return rx;
            }
            debug!("queued inference request {}", request.request_id);
            queue.push_back(Queued {
                request,
                respond_to: tx,
            });
        }
        self.inner.queue_wake.notify_one();

        rx
    }

    /// Synchronous inference, bypassing the queue (used by alert
    /// enrichment). Competes fairly with the worker for the backend.
    pub async fn infer_sync(&self, mut request: InferenceRequest) -> InferenceResult {
        if request.request_id.is_empty() {
            request.request_id = Uuid::new_v4().to_string();
        }
        self.run_inference(&request).await
    }

    /// Complete every queued request with a "Queue cleared" error.
    pub fn clear_queue(&self) {
        let drained: Vec<Queued> = {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            queue.drain(..).collect()
        };
        if !drained.is_empty() {
            info!("cleared {} queued inference requests", drained.len());
        }
        for queued in drained {
            let _ = queued.respond_to.send(InferenceResult::failure(
                &queued.request.request_id,
                ERR_QUEUE_CLEARED,
            ));
        }
    }

    /// Advisory status document. Takes no lock.
    pub fn status_json(&self) -> Value {
        let mut status = json!({
            "loaded": self.inner.backend.is_loaded(),
            "queue_size": self.queue_depth(),
            "memory_bytes": self.inner.backend.memory_usage(),
        });
        if let Some(info) = self.inner.backend.info() {
            status["model"] = info.to_json();
        }
        status
    }

    /// The loaded-check and generate under one backend lock.
    async fn run_inference(&self, request: &InferenceRequest) -> InferenceResult {
        let _guard = self.inner.backend_lock.lock().await;

        if !self.inner.backend.is_loaded() {
            return InferenceResult::failure(&request.request_id, ERR_NOT_LOADED);
        }

        let started = Instant::now();
        let mut result = self.inner.backend.generate(request).await;
        result.time_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }

    async fn worker_loop(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!("inference worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let next = self
                .inner
                .queue
                .lock()
                .expect("queue lock poisoned")
                .pop_front();

            match next {
                Some(queued) => {
                    let result = self.run_inference(&queued.request).await;
                    debug!(
                        "inference request {} finished in {:.1}ms",
                        queued.request.request_id, result.time_ms
                    );
                    let _ = queued.respond_to.send(result);
                }
                None => {
                    tokio::select! {
                        _ = self.inner.queue_wake.notified() => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }

        self.clear_queue();
        debug!("inference worker stopped");
    }
}

#[async_trait]
impl Service for LlmEngine {
    fn name(&self) -> &'static str {
        "llm-engine"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.inner.shutdown_tx.send(false);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(self.clone().worker_loop(shutdown_rx));
        *self.inner.worker.lock().await = Some(handle);

        if !self.inner.settings.lazy_load && !self.inner.settings.model_path.is_empty() {
            let model_path = self.inner.settings.model_path.clone();
            if let Err(e) = self.load(&model_path).await {
                warn!("eager model load failed: {e}");
            }
        }

        info!("LLM engine started");
        Ok(())
    }

    async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.shutdown_tx.send(true);
        self.inner.queue_wake.notify_one();

        if let Some(handle) = self.inner.worker.lock().await.take() {
            let _ = handle.await;
        }

        // The worker has exited; no generate call can begin after this.
        self.unload().await;
        info!("LLM engine stopped");
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
