//! Inference request/result records and model metadata

use serde_json::{json, Value};

/// Error text for a request refused because no model is loaded.
pub const ERR_NOT_LOADED: &str = "Model not loaded";
/// Error text for a request refused because the queue is at capacity.
pub const ERR_QUEUE_FULL: &str = "Inference queue full";
/// Error text for a request refused by the admission rate limiter.
pub const ERR_RATE_LIMITED: &str = "Rate limit exceeded";
/// Error text delivered to queued requests dropped during shutdown.
pub const ERR_QUEUE_CLEARED: &str = "Queue cleared";
/// Error text for submissions while the worker is not running.
pub const ERR_WORKER_STOPPED: &str = "Worker not running";

/// One inference job.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Generation halts when this string appears; output is truncated at the
    /// match start.
    pub stop: Option<String>,
    /// Caller-supplied id; the engine assigns a UUID when empty.
    pub request_id: String,
}

impl Default for InferenceRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            stop: None,
            request_id: String::new(),
        }
    }
}

/// Outcome of one inference job.
#[derive(Debug, Clone, Default)]
pub struct InferenceResult {
    pub request_id: String,
    pub output: String,
    pub tokens_generated: u32,
    pub time_ms: f64,
    pub success: bool,
    pub error: String,
}

impl InferenceResult {
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Value {
        let mut j = json!({
            "request_id": self.request_id,
            "output": self.output,
            "tokens_generated": self.tokens_generated,
            "time_ms": self.time_ms,
            "success": self.success,
        });
        if !self.success {
            j["error"] = json!(self.error);
        }
        j
    }
}

/// Metadata about the loaded model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub context_length: u32,
}

impl ModelInfo {
    pub fn to_json(&self) -> Value {
        json!({
            "path": self.path,
            "name": self.name,
            "size_bytes": self.size_bytes,
            "context_length": self.context_length,
        })
    }
}

/// Backend load options, resolved from configuration.
#[derive(Debug, Clone)]
pub struct LoadParams {
    pub model_path: String,
    pub context_length: u32,
    pub threads: u32,
    pub batch_size: u32,
    pub mmap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_shape() {
        let result = InferenceResult::failure("req-1", ERR_QUEUE_FULL);
        assert!(!result.success);
        assert_eq!(result.error, ERR_QUEUE_FULL);

        let j = result.to_json();
        assert_eq!(j["success"], false);
        assert_eq!(j["error"], ERR_QUEUE_FULL);
    }

    #[test]
    fn success_result_omits_error() {
        let result = InferenceResult {
            request_id: "req-2".into(),
            output: "fine".into(),
            tokens_generated: 3,
            time_ms: 1.5,
            success: true,
            error: String::new(),
        };
        let j = result.to_json();
        assert_eq!(j["success"], true);
        assert!(j.get("error").is_none());
    }
}
