//! LLM backend seam
//!
//! The engine treats the token producer as an opaque collaborator behind
//! [`LlmBackend`]: load a model, produce text for a prompt, report status.
//! The production implementation drives a local llama-server/Ollama
//! compatible HTTP endpoint; tests script a [`mock::MockBackend`].
//!
//! Read-only status methods (`is_loaded`, `info`, `memory_usage`) must be
//! callable without the engine's backend mutex, so implementations keep
//! their state behind internal synchronization.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{InferenceRequest, InferenceResult, LoadParams, ModelInfo, ERR_NOT_LOADED};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// An object that loads a model and produces tokens for a prompt.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn load(&self, params: &LoadParams) -> Result<ModelInfo, LlmError>;
    async fn unload(&self);
    fn is_loaded(&self) -> bool;
    fn info(&self) -> Option<ModelInfo>;
    fn memory_usage(&self) -> u64;
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult;
}

/// Truncate accumulated output at the start of the first stop-sequence match.
pub fn truncate_at_stop(output: &str, stop: &str) -> String {
    if stop.is_empty() {
        return output.to_string();
    }
    match output.find(stop) {
        Some(at) => output[..at].to_string(),
        None => output.to_string(),
    }
}

/// HTTP backend for a local model server (Ollama-compatible API).
///
/// `load` preloads the model with an infinite keep-alive; `unload` releases
/// it with `keep_alive: 0`. Generation is non-streaming; sampling options
/// (temperature, top-p, stop) travel in the request and temperature 0 means
/// greedy decoding on the server side.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    state: RwLock<Option<ModelInfo>>,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        if !endpoint.contains("localhost") && !endpoint.contains("127.0.0.1") {
            warn!("LLM endpoint {endpoint} is not loopback; inference traffic leaves the host");
        }

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            state: RwLock::new(None),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn loaded_model(&self) -> Option<String> {
        self.state
            .read()
            .expect("backend state lock poisoned")
            .as_ref()
            .map(|info| info.name.clone())
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn load(&self, params: &LoadParams) -> Result<ModelInfo, LlmError> {
        info!("loading model {}", params.model_path);

        // An empty prompt instructs the server to load the model and keep it
        // resident without generating anything.
        let body = json!({
            "model": params.model_path,
            "prompt": "",
            "stream": false,
            "keep_alive": -1,
            "options": {
                "num_ctx": params.context_length,
                "num_thread": params.threads,
                "num_batch": params.batch_size,
                "use_mmap": params.mmap,
            },
        });

        let response = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend(format!("load failed ({status}): {text}")));
        }

        let name = params
            .model_path
            .rsplit('/')
            .next()
            .unwrap_or(&params.model_path)
            .to_string();
        let size_bytes = std::fs::metadata(&params.model_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let model = ModelInfo {
            path: params.model_path.clone(),
            name,
            size_bytes,
            context_length: params.context_length,
        };
        *self.state.write().expect("backend state lock poisoned") = Some(model.clone());

        info!("model {} loaded", model.name);
        Ok(model)
    }

    async fn unload(&self) {
        let Some(name) = self.loaded_model() else {
            return;
        };

        let body = json!({ "model": name, "prompt": "", "stream": false, "keep_alive": 0 });
        if let Err(e) = self.client.post(self.generate_url()).json(&body).send().await {
            debug!("model release request failed: {e}");
        }

        *self.state.write().expect("backend state lock poisoned") = None;
        info!("model {name} unloaded");
    }

    fn is_loaded(&self) -> bool {
        self.state
            .read()
            .expect("backend state lock poisoned")
            .is_some()
    }

    fn info(&self) -> Option<ModelInfo> {
        self.state
            .read()
            .expect("backend state lock poisoned")
            .clone()
    }

    fn memory_usage(&self) -> u64 {
        self.state
            .read()
            .expect("backend state lock poisoned")
            .as_ref()
            .map(|info| info.size_bytes)
            .unwrap_or(0)
    }

    async fn generate(&self, request: &InferenceRequest) -> InferenceResult {
        let Some(model) = self.loaded_model() else {
            return InferenceResult::failure(&request.request_id, ERR_NOT_LOADED);
        };

        let mut options = json!({
            "temperature": request.temperature,
            "top_p": request.top_p,
            "num_predict": request.max_tokens,
        });
        if let Some(stop) = &request.stop {
            options["stop"] = json!([stop]);
        }

        let body = json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": options,
        });

        let response = match self.client.post(self.generate_url()).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return InferenceResult::failure(&request.request_id, e.to_string()),
        };
        if !response.status().is_success() {
            let status = response.status();
            return InferenceResult::failure(
                &request.request_id,
                format!("backend returned {status}"),
            );
        }

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => return InferenceResult::failure(&request.request_id, e.to_string()),
        };

        let mut output = payload["response"].as_str().unwrap_or_default().to_string();
        if let Some(stop) = &request.stop {
            output = truncate_at_stop(&output, stop);
        }
        let tokens_generated = payload["eval_count"].as_u64().unwrap_or(0) as u32;

        InferenceResult {
            request_id: request.request_id.clone(),
            output,
            tokens_generated,
            time_ms: 0.0,
            success: true,
            error: String::new(),
        }
    }
}
