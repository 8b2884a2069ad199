//! Threshold → alert state machine
//!
//! The engine owns the firing set: the in-memory cache of alert keys
//! currently raised. For each monitored category a snapshot lands in one of
//! three bands (none / warn / crit) and the engine raises on band entry,
//! suppresses duplicates while the band holds, downgrades crit → warn, and
//! clears (machine-acknowledging the stored alert) on recovery.
//!
//! ## Duplicate suppression ordering
//!
//! The key is inserted into the firing set *before* the store write; on a
//! failed write the key is removed again. Two monitor ticks can therefore
//! never both observe "missing" and both insert the same alert.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::{InferenceRequest, LlmEngine};
use crate::monitors::health::HealthSnapshot;
use crate::storage::{Alert, AlertCategory, AlertFilter, AlertSeverity, AlertStatus, AlertStore};
use std::sync::Arc;

/// Source tag on every alert this engine creates.
const SOURCE: &str = "monitor";

/// Marker separating the plain alert description from appended analysis.
const ANALYSIS_MARKER: &str = "\n\n💡 Analysis:\n";

/// Deduplication key: at most one ACTIVE alert per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub source: String,
    pub message: String,
}

impl AlertKey {
    fn new(category: AlertCategory, severity: AlertSeverity, message: &str) -> Self {
        Self {
            category,
            severity,
            source: SOURCE.to_string(),
            message: message.to_string(),
        }
    }
}

/// Which band a reading falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    None,
    Warn,
    Crit,
}

pub(crate) fn level_for(fraction: f64, warn: f64, crit: f64) -> Level {
    if fraction >= crit {
        Level::Crit
    } else if fraction >= warn {
        Level::Warn
    } else {
        Level::None
    }
}

fn warn_message(category: AlertCategory) -> &'static str {
    match category {
        AlertCategory::Cpu => "CPU usage above warning threshold",
        AlertCategory::Memory => "Memory usage above warning threshold",
        _ => "Disk usage above warning threshold",
    }
}

fn crit_message(category: AlertCategory) -> &'static str {
    match category {
        AlertCategory::Cpu => "CPU usage above critical threshold",
        AlertCategory::Memory => "Memory usage above critical threshold",
        _ => "Disk usage above critical threshold",
    }
}

const FAILED_UNITS_MESSAGE: &str = "Systemd units in failed state";

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Threshold engine over a shared alert store, with optional LLM enrichment.
pub struct ThresholdEngine {
    store: Arc<AlertStore>,
    llm: Option<LlmEngine>,
    firing: Mutex<HashSet<AlertKey>>,
}

impl ThresholdEngine {
    pub fn new(store: Arc<AlertStore>, llm: Option<LlmEngine>) -> Self {
        Self {
            store,
            llm,
            firing: Mutex::new(HashSet::new()),
        }
    }

    /// Rebuild the firing set from ACTIVE monitor alerts in the store, so a
    /// restart does not raise duplicates for conditions that never cleared.
    pub async fn prime(&self) {
        let filter = AlertFilter {
            status: Some(AlertStatus::Active),
            source: Some(SOURCE.to_string()),
            ..Default::default()
        };
        match self.store.list(&filter).await {
            Ok(alerts) => {
                let mut firing = self.firing.lock().expect("firing set lock poisoned");
                for alert in alerts {
                    firing.insert(AlertKey {
                        category: alert.category,
                        severity: alert.severity,
                        source: alert.source,
                        message: alert.message,
                    });
                }
                debug!("primed firing set with {} active keys", firing.len());
            }
            Err(e) => warn!("failed to prime firing set: {e}"),
        }
    }

    /// Number of currently-raised keys.
    pub fn firing_count(&self) -> usize {
        self.firing.lock().expect("firing set lock poisoned").len()
    }

    /// Consume one snapshot: raise, downgrade and clear per category.
    ///
    /// Categories whose reading is invalid (the collector could not read the
    /// source) are skipped entirely; a zeroed failed read must not masquerade
    /// as a recovery.
    pub async fn process(&self, snapshot: &HealthSnapshot, config: &Config) {
        let enrich = config.llm.enabled;
        let t = &config.thresholds;

        if snapshot.cpu.valid {
            let description = format!("CPU usage is at {:.1}%", snapshot.cpu.percent);
            let mut metadata = BTreeMap::new();
            metadata.insert(
                "usage_percent".to_string(),
                format!("{:.1}", snapshot.cpu.percent),
            );
            self.apply(
                AlertCategory::Cpu,
                level_for(snapshot.cpu_fraction(), t.cpu_warn, t.cpu_crit),
                &description,
                metadata,
                enrich,
            )
            .await;
        }

        if snapshot.memory.valid {
            let description = format!(
                "Memory usage is at {:.1}% ({:.1} GiB used / {:.1} GiB total)",
                snapshot.memory_fraction() * 100.0,
                gib(snapshot.memory.used),
                gib(snapshot.memory.total),
            );
            let mut metadata = BTreeMap::new();
            metadata.insert(
                "usage_percent".to_string(),
                format!("{:.1}", snapshot.memory_fraction() * 100.0),
            );
            metadata.insert("used_bytes".to_string(), snapshot.memory.used.to_string());
            metadata.insert("total_bytes".to_string(), snapshot.memory.total.to_string());
            self.apply(
                AlertCategory::Memory,
                level_for(snapshot.memory_fraction(), t.mem_warn, t.mem_crit),
                &description,
                metadata,
                enrich,
            )
            .await;
        }

        if snapshot.disk.valid {
            let description = format!(
                "Disk usage is at {:.1}% on {} ({:.1} GiB used / {:.1} GiB total)",
                snapshot.disk_fraction() * 100.0,
                snapshot.disk.mount,
                gib(snapshot.disk.used),
                gib(snapshot.disk.total),
            );
            let mut metadata = BTreeMap::new();
            metadata.insert(
                "usage_percent".to_string(),
                format!("{:.1}", snapshot.disk_fraction() * 100.0),
            );
            metadata.insert("mount".to_string(), snapshot.disk.mount.clone());
            metadata.insert("used_bytes".to_string(), snapshot.disk.used.to_string());
            metadata.insert("total_bytes".to_string(), snapshot.disk.total.to_string());
            self.apply(
                AlertCategory::Disk,
                level_for(snapshot.disk_fraction(), t.disk_warn, t.disk_crit),
                &description,
                metadata,
                enrich,
            )
            .await;
        }

        if snapshot.units.valid {
            let key = AlertKey::new(
                AlertCategory::Service,
                AlertSeverity::Error,
                FAILED_UNITS_MESSAGE,
            );
            if snapshot.units.failed > 0 {
                let description = format!(
                    "{} systemd unit(s) are in the failed state",
                    snapshot.units.failed
                );
                let mut metadata = BTreeMap::new();
                metadata.insert("count".to_string(), snapshot.units.failed.to_string());
                self.raise(key, &description, metadata, enrich).await;
            } else {
                self.clear(key).await;
            }
        }
    }

    async fn apply(
        &self,
        category: AlertCategory,
        level: Level,
        description: &str,
        metadata: BTreeMap<String, String>,
        enrich: bool,
    ) {
        let warn_key = AlertKey::new(category, AlertSeverity::Warning, warn_message(category));
        let crit_key = AlertKey::new(category, AlertSeverity::Critical, crit_message(category));

        match level {
            Level::Crit => {
                self.raise(crit_key, description, metadata, enrich).await;
            }
            Level::Warn => {
                self.raise(warn_key, description, metadata, enrich).await;
                // Downgrade: the critical condition no longer holds.
                self.clear(crit_key).await;
            }
            Level::None => {
                self.clear(warn_key).await;
                self.clear(crit_key).await;
            }
        }
    }

    /// Raise the key if it is not already firing.
    ///
    /// The key enters the set before the store write; a failed write rolls
    /// it back so a later tick can retry.
    async fn raise(
        &self,
        key: AlertKey,
        description: &str,
        metadata: BTreeMap<String, String>,
        enrich: bool,
    ) {
        {
            let mut firing = self.firing.lock().expect("firing set lock poisoned");
            if !firing.insert(key.clone()) {
                return;
            }
        }

        let mut alert = Alert::new(key.severity, key.category, SOURCE, &key.message)
            .with_description(description.to_string())
            .with_metadata(metadata);

        if enrich {
            if let Some(analysis) = self.enrich(key.category, description).await {
                alert.description.push_str(ANALYSIS_MARKER);
                alert.description.push_str(&analysis);
                alert
                    .metadata
                    .insert("ai_enhanced".to_string(), "true".to_string());
            }
        }

        match self.store.create(alert).await {
            Ok(created) => {
                info!(
                    "raised {} alert {}: {}",
                    created.severity.as_str(),
                    created.uuid,
                    created.message
                );
            }
            Err(e) => {
                warn!("failed to persist alert '{}': {e}", key.message);
                self.firing
                    .lock()
                    .expect("firing set lock poisoned")
                    .remove(&key);
            }
        }
    }

    /// Clear the key and machine-acknowledge the matching ACTIVE alert, so
    /// at most one ACTIVE alert per key ever exists even across re-raises.
    async fn clear(&self, key: AlertKey) {
        let was_firing = self
            .firing
            .lock()
            .expect("firing set lock poisoned")
            .remove(&key);
        if !was_firing {
            return;
        }

        let filter = AlertFilter {
            status: Some(AlertStatus::Active),
            category: Some(key.category),
            source: Some(key.source.clone()),
            ..Default::default()
        };
        match self.store.list(&filter).await {
            Ok(alerts) => {
                for alert in alerts {
                    if alert.message == key.message && alert.severity == key.severity {
                        match self.store.acknowledge(&alert.uuid).await {
                            Ok(true) => info!("recovered: {}", key.message),
                            Ok(false) => {}
                            Err(e) => warn!("failed to resolve alert {}: {e}", alert.uuid),
                        }
                    }
                }
            }
            Err(e) => warn!("failed to look up alerts for recovery: {e}"),
        }
    }

    /// Ask the LLM worker for a short analysis of the alert context.
    ///
    /// Skips silently whenever no worker is attached, no model is loaded, or
    /// the inference fails.
    async fn enrich(&self, category: AlertCategory, context: &str) -> Option<String> {
        let llm = self.llm.as_ref()?;
        if !llm.is_loaded() {
            return None;
        }

        let request = InferenceRequest {
            prompt: enrichment_prompt(category, context),
            max_tokens: 150,
            temperature: 0.3,
            top_p: 0.9,
            stop: None,
            request_id: String::new(),
        };

        let result = llm.infer_sync(request).await;
        if result.success && !result.output.trim().is_empty() {
            Some(result.output.trim().to_string())
        } else {
            if !result.success {
                debug!("alert enrichment skipped: {}", result.error);
            }
            None
        }
    }
}

/// Fixed per-category prompt templates for alert enrichment.
fn enrichment_prompt(category: AlertCategory, context: &str) -> String {
    match category {
        AlertCategory::Disk => format!(
            "You are a Linux system administrator assistant. Analyze this disk \
             usage alert and provide a brief, actionable response (2-3 sentences \
             max).\n\nContext: {context}\n\nProvide practical suggestions to free \
             disk space. Be specific and concise."
        ),
        AlertCategory::Memory => format!(
            "You are a Linux system administrator assistant. Analyze this memory \
             usage alert and provide a brief, actionable response (2-3 sentences \
             max).\n\nContext: {context}\n\nSuggest how to identify memory-hungry \
             processes and potential fixes. Be specific and concise."
        ),
        AlertCategory::Cpu => format!(
            "You are a Linux system administrator assistant. Analyze this CPU \
             usage alert and provide a brief, actionable response (2-3 sentences \
             max).\n\nContext: {context}\n\nSuggest how to identify CPU-heavy \
             processes and potential fixes. Be specific and concise."
        ),
        _ => format!(
            "You are a Linux system administrator assistant. Analyze this system \
             alert and provide a brief, actionable response (2-3 sentences \
             max).\n\nContext: {context}\n\nProvide practical recommendations. \
             Be specific and concise."
        ),
    }
}
