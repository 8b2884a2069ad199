//! Daemon configuration: YAML-backed record plus the reloadable store.
//!
//! The configuration is an immutable snapshot. Readers always receive a
//! copy; a reload either installs a fully validated new record or leaves
//! the previous one untouched. Change listeners run after the store's lock
//! is released, so a listener may call back into the store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::util::expand_home;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no configuration path recorded, cannot reload")]
    NoPath,

    #[error("configuration path changed during reload, aborting")]
    PathChanged,
}

/// Control socket settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub path: PathBuf,
    pub backlog: u32,
    /// Per-connection receive/send deadline.
    pub timeout_ms: u64,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/run/vigild/vigild.sock"),
            backlog: 128,
            timeout_ms: 5000,
        }
    }
}

/// Alert store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub db_path: PathBuf,
    /// Rows older than this window are deleted by the kernel's periodic
    /// cleanup pass.
    pub retention_hours: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/vigild/alerts.db"),
            retention_hours: 168,
        }
    }
}

/// Warning/critical threshold pairs, as fractions in (0, 1].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu_warn: f64,
    pub cpu_crit: f64,
    pub mem_warn: f64,
    pub mem_crit: f64,
    pub disk_warn: f64,
    pub disk_crit: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_warn: 0.90,
            cpu_crit: 0.98,
            mem_warn: 0.85,
            mem_crit: 0.95,
            disk_warn: 0.80,
            disk_crit: 0.95,
        }
    }
}

/// Monitor loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Seconds between health checks.
    pub interval_secs: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// LLM worker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Master switch for the worker service and alert enrichment.
    pub enabled: bool,
    /// Model file path or model name, passed through to the backend.
    pub model_path: String,
    /// Local inference endpoint driven by the HTTP backend.
    pub endpoint: String,
    pub context_length: u32,
    pub threads: u32,
    pub batch_size: u32,
    /// Load the model on first request instead of at service start.
    pub lazy_load: bool,
    /// Memory-map the model file.
    pub mmap: bool,
    /// Inference queue depth cap.
    pub max_queue: usize,
    /// Inference admissions per wall-clock second.
    pub max_per_sec: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: String::new(),
            endpoint: "http://127.0.0.1:11434".to_string(),
            context_length: 2048,
            threads: 4,
            batch_size: 512,
            lazy_load: true,
            mmap: true,
            max_queue: 10,
            max_per_sec: 5,
        }
    }
}

/// Socket request admission settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests_per_sec: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests_per_sec: 100,
        }
    }
}

/// Complete daemon configuration snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket: SocketSettings,
    pub alerts: AlertSettings,
    pub thresholds: Thresholds,
    pub monitoring: MonitoringSettings,
    pub llm: LlmSettings,
    pub rate_limit: RateLimitSettings,
    /// 0=DEBUG, 1=INFO, 2=WARN, 3=ERROR, 4=CRITICAL.
    pub log_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: SocketSettings::default(),
            alerts: AlertSettings::default(),
            thresholds: Thresholds::default(),
            monitoring: MonitoringSettings::default(),
            llm: LlmSettings::default(),
            rate_limit: RateLimitSettings::default(),
            log_level: 1,
        }
    }
}

impl Config {
    /// Built-in defaults with paths expanded.
    pub fn defaults() -> Self {
        let mut config = Self::default();
        config.expand_paths();
        config
    }

    /// Load, expand and validate a configuration file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let mut config: Config = serde_yaml::from_str(&raw)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Rewrite a leading `~` in every path-valued field.
    pub fn expand_paths(&mut self) {
        self.socket.path = expand_home(&self.socket.path.to_string_lossy());
        self.alerts.db_path = expand_home(&self.alerts.db_path.to_string_lossy());
        if self.llm.model_path.starts_with('~') {
            self.llm.model_path = expand_home(&self.llm.model_path)
                .to_string_lossy()
                .into_owned();
        }
    }

    /// Validate field ranges. Threshold pairs must satisfy
    /// `0 < warn < crit <= 1.0`; durations and capacities must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            ("cpu", self.thresholds.cpu_warn, self.thresholds.cpu_crit),
            ("mem", self.thresholds.mem_warn, self.thresholds.mem_crit),
            ("disk", self.thresholds.disk_warn, self.thresholds.disk_crit),
        ];
        for (name, warn, crit) in pairs {
            if warn <= 0.0 || !(warn < crit) || crit > 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} thresholds must satisfy 0 < warn < crit <= 1.0 (got warn={warn}, crit={crit})"
                )));
            }
        }

        if self.socket.backlog == 0 {
            return Err(ConfigError::Invalid("socket.backlog must be positive".into()));
        }
        if self.socket.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "socket.timeout_ms must be positive".into(),
            ));
        }
        if self.rate_limit.max_requests_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests_per_sec must be positive".into(),
            ));
        }
        if self.monitoring.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.interval_secs must be positive".into(),
            ));
        }
        if self.alerts.retention_hours == 0 {
            return Err(ConfigError::Invalid(
                "alerts.retention_hours must be positive".into(),
            ));
        }
        if self.llm.context_length == 0 || self.llm.threads == 0 || self.llm.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "llm.context_length, llm.threads and llm.batch_size must be positive".into(),
            ));
        }
        if self.llm.max_queue == 0 || self.llm.max_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "llm.max_queue and llm.max_per_sec must be positive".into(),
            ));
        }
        if self.log_level > 4 {
            return Err(ConfigError::Invalid(
                "log_level must be in 0..=4 (DEBUG, INFO, WARN, ERROR, CRITICAL)".into(),
            ));
        }

        Ok(())
    }
}

type Listener = Arc<dyn Fn(&Config) + Send + Sync>;

struct Inner {
    config: Config,
    path: Option<PathBuf>,
    listeners: Vec<Listener>,
}

/// Thread-safe holder of the current configuration.
///
/// One mutex protects the record, the recorded file path and the listener
/// list. Reload does its file IO outside the lock and aborts if the path
/// was reassigned in between; listeners always run without the lock held.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config: Config::defaults(),
                path: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Load a configuration file and install it.
    ///
    /// On any failure the built-in defaults are installed instead and the
    /// error is returned for the caller to log; the path is recorded either
    /// way so a later `reload` can pick up a corrected file.
    pub fn load(&self, path: &Path) -> Result<(), ConfigError> {
        match Config::load_file(path) {
            Ok(config) => {
                let listeners = {
                    let mut inner = self.inner.lock().expect("config lock poisoned");
                    inner.config = config.clone();
                    inner.path = Some(path.to_path_buf());
                    inner.listeners.clone()
                };
                info!("configuration loaded from {}", path.display());
                for listener in listeners {
                    listener(&config);
                }
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().expect("config lock poisoned");
                inner.config = Config::defaults();
                inner.path = Some(path.to_path_buf());
                warn!("using default configuration: {e}");
                Err(e)
            }
        }
    }

    /// Re-read the previously recorded file.
    ///
    /// The old record is retained on every error path. Returns
    /// [`ConfigError::PathChanged`] if another load reassigned the path
    /// between the IO phase and the swap.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = {
            let inner = self.inner.lock().expect("config lock poisoned");
            inner.path.clone().ok_or(ConfigError::NoPath)?
        };

        // Parse and validate outside the lock.
        let config = Config::load_file(&path)?;

        let listeners = {
            let mut inner = self.inner.lock().expect("config lock poisoned");
            if inner.path.as_deref() != Some(path.as_path()) {
                return Err(ConfigError::PathChanged);
            }
            inner.config = config.clone();
            inner.listeners.clone()
        };

        info!("configuration reloaded from {}", path.display());
        for listener in listeners {
            listener(&config);
        }
        Ok(())
    }

    /// Current configuration, by copy.
    pub fn get(&self) -> Config {
        self.inner.lock().expect("config lock poisoned").config.clone()
    }

    /// Register a change listener. Listeners receive a copy of the new
    /// record after each successful load or reload.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&Config) + Send + Sync + 'static,
    {
        self.inner
            .lock()
            .expect("config lock poisoned")
            .listeners
            .push(Arc::new(listener));
    }
}
