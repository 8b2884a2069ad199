//! Alert record, enums, filters and counter snapshots
//!
//! Severity, category and status are persisted as small integer codes and
//! travel on the wire as both the code and a lowercase name, so clients can
//! filter numerically or by name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::util::format_utc;

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn code(self) -> i64 {
        match self {
            AlertSeverity::Info => 0,
            AlertSeverity::Warning => 1,
            AlertSeverity::Error => 2,
            AlertSeverity::Critical => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AlertSeverity::Warning,
            2 => AlertSeverity::Error,
            3 => AlertSeverity::Critical,
            _ => AlertSeverity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "error" => Some(AlertSeverity::Error),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// What subsystem an alert concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    Cpu,
    Memory,
    Disk,
    Apt,
    Cve,
    Service,
    System,
}

impl AlertCategory {
    pub fn code(self) -> i64 {
        match self {
            AlertCategory::Cpu => 0,
            AlertCategory::Memory => 1,
            AlertCategory::Disk => 2,
            AlertCategory::Apt => 3,
            AlertCategory::Cve => 4,
            AlertCategory::Service => 5,
            AlertCategory::System => 6,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => AlertCategory::Cpu,
            1 => AlertCategory::Memory,
            2 => AlertCategory::Disk,
            3 => AlertCategory::Apt,
            4 => AlertCategory::Cve,
            5 => AlertCategory::Service,
            _ => AlertCategory::System,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertCategory::Cpu => "cpu",
            AlertCategory::Memory => "memory",
            AlertCategory::Disk => "disk",
            AlertCategory::Apt => "apt",
            AlertCategory::Cve => "cve",
            AlertCategory::Service => "service",
            AlertCategory::System => "system",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(AlertCategory::Cpu),
            "memory" => Some(AlertCategory::Memory),
            "disk" => Some(AlertCategory::Disk),
            "apt" => Some(AlertCategory::Apt),
            "cve" => Some(AlertCategory::Cve),
            "service" => Some(AlertCategory::Service),
            "system" => Some(AlertCategory::System),
            _ => None,
        }
    }
}

/// Lifecycle status. Transitions follow ACTIVE → ACKNOWLEDGED → DISMISSED,
/// with DISMISSED absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Dismissed,
}

impl AlertStatus {
    pub fn code(self) -> i64 {
        match self {
            AlertStatus::Active => 0,
            AlertStatus::Acknowledged => 1,
            AlertStatus::Dismissed => 2,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AlertStatus::Acknowledged,
            2 => AlertStatus::Dismissed,
            _ => AlertStatus::Active,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "dismissed" => Some(AlertStatus::Dismissed),
            _ => None,
        }
    }
}

/// A persistent record of a notable condition observed on the host.
#[derive(Debug, Clone)]
pub struct Alert {
    /// UUID string; immutable after first persist. Empty means the store
    /// assigns a fresh one on insert.
    pub uuid: String,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub status: AlertStatus,
    /// Short tag naming the producer (e.g. "monitor").
    pub source: String,
    /// Single-line summary; stable per alert key so deduplication works.
    pub message: String,
    /// Multi-line details, possibly carrying appended analysis.
    pub description: String,
    /// Creation time. The UNIX epoch means "unset"; the store stamps the
    /// current time on insert.
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    /// New ACTIVE alert with an unset id and timestamp; both are assigned
    /// by [`AlertStore::create`](super::AlertStore::create).
    pub fn new(
        severity: AlertSeverity,
        category: AlertCategory,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            uuid: String::new(),
            severity,
            category,
            status: AlertStatus::Active,
            source: source.into(),
            message: message.into(),
            description: String::new(),
            created_at: DateTime::UNIX_EPOCH,
            acknowledged_at: None,
            dismissed_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Wire representation: codes plus lowercase names, RFC-3339 UTC
    /// timestamps, optional fields omitted when unset.
    pub fn to_json(&self) -> Value {
        let mut j = json!({
            "uuid": self.uuid,
            "severity": self.severity.code(),
            "severity_name": self.severity.as_str(),
            "category": self.category.code(),
            "category_name": self.category.as_str(),
            "status": self.status.code(),
            "status_name": self.status.as_str(),
            "source": self.source,
            "message": self.message,
            "description": self.description,
            "timestamp": format_utc(self.created_at),
            "metadata": self.metadata,
        });
        if let Some(at) = self.acknowledged_at {
            j["acknowledged_at"] = json!(format_utc(at));
        }
        if let Some(at) = self.dismissed_at {
            j["dismissed_at"] = json!(format_utc(at));
        }
        j
    }
}

/// Row filter for [`AlertStore::list`](super::AlertStore::list).
///
/// Dismissed rows are excluded unless `include_dismissed` is set or an
/// explicit status filter asks for them.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<AlertSeverity>,
    pub category: Option<AlertCategory>,
    pub status: Option<AlertStatus>,
    pub source: Option<String>,
    pub include_dismissed: bool,
}

/// Snapshot of the store's in-memory counters: ACTIVE alerts per severity
/// plus their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertCounts {
    pub info: i64,
    pub warning: i64,
    pub error: i64,
    pub critical: i64,
    pub total: i64,
}

impl AlertCounts {
    pub fn to_json(&self) -> Value {
        json!({
            "info": self.info,
            "warning": self.warning,
            "error": self.error,
            "critical": self.critical,
            "total": self.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for severity in [
            AlertSeverity::Info,
            AlertSeverity::Warning,
            AlertSeverity::Error,
            AlertSeverity::Critical,
        ] {
            assert_eq!(AlertSeverity::from_code(severity.code()), severity);
            assert_eq!(AlertSeverity::parse(severity.as_str()), Some(severity));
        }
        for category in [
            AlertCategory::Cpu,
            AlertCategory::Memory,
            AlertCategory::Disk,
            AlertCategory::Apt,
            AlertCategory::Cve,
            AlertCategory::Service,
            AlertCategory::System,
        ] {
            assert_eq!(AlertCategory::from_code(category.code()), category);
            assert_eq!(AlertCategory::parse(category.as_str()), Some(category));
        }
        for status in [
            AlertStatus::Active,
            AlertStatus::Acknowledged,
            AlertStatus::Dismissed,
        ] {
            assert_eq!(AlertStatus::from_code(status.code()), status);
            assert_eq!(AlertStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_names_do_not_parse() {
        assert_eq!(AlertSeverity::parse("fatal"), None);
        assert_eq!(AlertCategory::parse("network"), None);
        assert_eq!(AlertStatus::parse("open"), None);
    }

    #[test]
    fn alert_json_omits_unset_optionals() {
        let alert = Alert::new(
            AlertSeverity::Warning,
            AlertCategory::Disk,
            "monitor",
            "Disk usage above warning threshold",
        );
        let j = alert.to_json();
        assert_eq!(j["severity_name"], "warning");
        assert_eq!(j["category_name"], "disk");
        assert_eq!(j["status_name"], "active");
        assert!(j.get("acknowledged_at").is_none());
        assert!(j.get("dismissed_at").is_none());
    }

    #[test]
    fn alert_json_carries_stamped_optionals() {
        let mut alert = Alert::new(
            AlertSeverity::Error,
            AlertCategory::Service,
            "monitor",
            "Systemd units in failed state",
        );
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(chrono::Utc::now());
        let j = alert.to_json();
        assert_eq!(j["status_name"], "acknowledged");
        assert!(j["acknowledged_at"].is_string());
    }
}
