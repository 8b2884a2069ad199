//! SQLite-backed alert store
//!
//! A single `alerts` table holds every alert; WAL journaling gives crash
//! atomicity (a killed process loses neither more nor less than the
//! in-flight statement) and synchronous NORMAL balances durability against
//! write latency.
//!
//! ## Counter discipline
//!
//! The per-severity counters are plain atomics so `counts()` never blocks,
//! but every mutation happens inside the store's write critical section so
//! the counters stay consistent with the rows they summarize.
//! `acknowledge_all` zeroes them in the same section as its UPDATE; a
//! concurrent insert can only increment strictly after the zeroing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::schema::{Alert, AlertCategory, AlertCounts, AlertFilter, AlertSeverity, AlertStatus};
use crate::util::{format_utc, parse_utc};

const ALERT_COLUMNS: &str = "uuid, severity, category, source, message, description, \
                             timestamp, status, acknowledged_at, dismissed_at, metadata";

#[derive(Debug, Default)]
struct Counters {
    info: AtomicI64,
    warning: AtomicI64,
    error: AtomicI64,
    critical: AtomicI64,
    total: AtomicI64,
}

impl Counters {
    fn bump(&self, severity: AlertSeverity, delta: i64) {
        match severity {
            AlertSeverity::Info => self.info.fetch_add(delta, Ordering::Relaxed),
            AlertSeverity::Warning => self.warning.fetch_add(delta, Ordering::Relaxed),
            AlertSeverity::Error => self.error.fetch_add(delta, Ordering::Relaxed),
            AlertSeverity::Critical => self.critical.fetch_add(delta, Ordering::Relaxed),
        };
        self.total.fetch_add(delta, Ordering::Relaxed);
    }

    fn set(&self, severity: AlertSeverity, value: i64) {
        match severity {
            AlertSeverity::Info => self.info.store(value, Ordering::Relaxed),
            AlertSeverity::Warning => self.warning.store(value, Ordering::Relaxed),
            AlertSeverity::Error => self.error.store(value, Ordering::Relaxed),
            AlertSeverity::Critical => self.critical.store(value, Ordering::Relaxed),
        }
    }

    fn zero(&self) {
        self.info.store(0, Ordering::Relaxed);
        self.warning.store(0, Ordering::Relaxed);
        self.error.store(0, Ordering::Relaxed);
        self.critical.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AlertCounts {
        AlertCounts {
            info: self.info.load(Ordering::Relaxed),
            warning: self.warning.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            critical: self.critical.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe persistent alert store.
pub struct AlertStore {
    pool: Pool<Sqlite>,
    db_path: PathBuf,
    counters: Counters,
    /// Serializes row mutations with their counter updates.
    write_lock: tokio::sync::Mutex<()>,
}

impl AlertStore {
    /// Open (or create) the alert database at `path`.
    ///
    /// Parent directories are created as needed. If the configured location
    /// is unusable the store falls back to `~/.vigild/alerts.db` and logs a
    /// warning. The schema and its indexes are created if absent and the
    /// counters are seeded from the table.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        let store = match Self::connect(path).await {
            Ok(pool) => {
                info!("alert database opened at {}", path.display());
                Self::finish_open(pool, path.to_path_buf()).await
            }
            Err(primary) => {
                let fallback = Self::fallback_path()
                    .ok_or_else(|| StorageError::Unwritable(path.to_path_buf()))?;
                warn!(
                    "alert database path {} unusable ({primary}), falling back to {}",
                    path.display(),
                    fallback.display()
                );
                let pool = Self::connect(&fallback).await?;
                Self::finish_open(pool, fallback).await
            }
        }?;

        Ok(store)
    }

    async fn finish_open(pool: Pool<Sqlite>, db_path: PathBuf) -> StorageResult<Self> {
        let store = Self {
            pool,
            db_path,
            counters: Counters::default(),
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.create_schema().await?;
        store.seed_counters().await?;
        Ok(store)
    }

    async fn connect(path: &Path) -> StorageResult<Pool<Sqlite>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn fallback_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".vigild").join("alerts.db"))
    }

    async fn create_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                uuid TEXT PRIMARY KEY,
                severity INTEGER NOT NULL,
                category INTEGER NOT NULL,
                source TEXT NOT NULL,
                message TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                acknowledged_at TEXT,
                dismissed_at TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_category ON alerts(category)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Recount ACTIVE rows per severity into the counters.
    async fn seed_counters(&self) -> StorageResult<()> {
        let rows = sqlx::query("SELECT severity, COUNT(*) AS n FROM alerts WHERE status = ? GROUP BY severity")
            .bind(AlertStatus::Active.code())
            .fetch_all(&self.pool)
            .await?;

        self.counters.zero();
        let mut total = 0;
        for row in rows {
            let severity = AlertSeverity::from_code(row.get::<i64, _>("severity"));
            let count: i64 = row.get("n");
            self.counters.set(severity, count);
            total += count;
        }
        self.counters.total.store(total, Ordering::Relaxed);
        Ok(())
    }

    /// Where the database actually lives (after any fallback).
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Persist an alert.
    ///
    /// Assigns a fresh UUID when none is set and stamps the current UTC time
    /// when the timestamp is unset. On success the counters are incremented
    /// for ACTIVE alerts and the persisted record is returned; on failure
    /// the counters are untouched.
    pub async fn create(&self, mut alert: Alert) -> StorageResult<Alert> {
        if alert.uuid.is_empty() {
            alert.uuid = Uuid::new_v4().to_string();
        }
        if alert.created_at == DateTime::UNIX_EPOCH {
            alert.created_at = Utc::now();
        }

        let metadata = serde_json::to_string(&alert.metadata)?;
        let timestamp = format_utc(alert.created_at);
        let acknowledged_at = alert.acknowledged_at.map(format_utc);
        let dismissed_at = alert.dismissed_at.map(format_utc);

        let _guard = self.write_lock.lock().await;

        sqlx::query(
            "INSERT INTO alerts (uuid, severity, category, source, message, description, \
             timestamp, status, acknowledged_at, dismissed_at, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&alert.uuid)
        .bind(alert.severity.code())
        .bind(alert.category.code())
        .bind(&alert.source)
        .bind(&alert.message)
        .bind(&alert.description)
        .bind(&timestamp)
        .bind(alert.status.code())
        .bind(&acknowledged_at)
        .bind(&dismissed_at)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        if alert.status == AlertStatus::Active {
            self.counters.bump(alert.severity, 1);
        }

        debug!("created alert {}", alert.uuid);
        Ok(alert)
    }

    /// Fetch one alert by primary key.
    pub async fn get(&self, uuid: &str) -> StorageResult<Option<Alert>> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE uuid = ?"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::row_to_alert(&r)).transpose()
    }

    /// List alerts matching the filter, newest first.
    pub async fn list(&self, filter: &AlertFilter) -> StorageResult<Vec<Alert>> {
        let mut sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1=1");
        if filter.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        } else if !filter.include_dismissed {
            sql.push_str(" AND status != ?");
        }
        if filter.source.is_some() {
            sql.push_str(" AND source = ?");
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut query = sqlx::query(&sql);
        if let Some(severity) = filter.severity {
            query = query.bind(severity.code());
        }
        if let Some(category) = filter.category {
            query = query.bind(category.code());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.code());
        } else if !filter.include_dismissed {
            query = query.bind(AlertStatus::Dismissed.code());
        }
        if let Some(source) = &filter.source {
            query = query.bind(source);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    /// Acknowledge an ACTIVE alert. Returns `false` (without touching
    /// anything) for missing or already-acknowledged rows.
    pub async fn acknowledge(&self, uuid: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(row) = sqlx::query("SELECT severity, status FROM alerts WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(false);
        };

        if AlertStatus::from_code(row.get::<i64, _>("status")) != AlertStatus::Active {
            return Ok(false);
        }
        let severity = AlertSeverity::from_code(row.get::<i64, _>("severity"));

        let changed = sqlx::query(
            "UPDATE alerts SET status = ?, acknowledged_at = ? WHERE uuid = ? AND status = ?",
        )
        .bind(AlertStatus::Acknowledged.code())
        .bind(format_utc(Utc::now()))
        .bind(uuid)
        .bind(AlertStatus::Active.code())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if changed > 0 {
            self.counters.bump(severity, -1);
            return Ok(true);
        }
        Ok(false)
    }

    /// Acknowledge every ACTIVE alert with one statement and zero the
    /// counters in the same critical section. Returns the number of rows
    /// changed.
    pub async fn acknowledge_all(&self) -> StorageResult<u64> {
        let _guard = self.write_lock.lock().await;

        let changed = sqlx::query("UPDATE alerts SET status = ?, acknowledged_at = ? WHERE status = ?")
            .bind(AlertStatus::Acknowledged.code())
            .bind(format_utc(Utc::now()))
            .bind(AlertStatus::Active.code())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if changed > 0 {
            self.counters.zero();
        }

        info!("acknowledged {changed} alerts");
        Ok(changed)
    }

    /// Dismiss an alert. Counters are decremented only when the prior status
    /// was ACTIVE. Returns `false` for missing rows.
    pub async fn dismiss(&self, uuid: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(row) = sqlx::query("SELECT severity, status FROM alerts WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(false);
        };

        let was_active = AlertStatus::from_code(row.get::<i64, _>("status")) == AlertStatus::Active;
        let severity = AlertSeverity::from_code(row.get::<i64, _>("severity"));

        let changed = sqlx::query("UPDATE alerts SET status = ?, dismissed_at = ? WHERE uuid = ?")
            .bind(AlertStatus::Dismissed.code())
            .bind(format_utc(Utc::now()))
            .bind(uuid)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if changed > 0 {
            if was_active {
                self.counters.bump(severity, -1);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Lock-free snapshot of the ACTIVE-alert counters.
    pub fn counts(&self) -> AlertCounts {
        self.counters.snapshot()
    }

    /// Delete rows older than `cutoff`; returns the count. Counters are
    /// recounted when anything was removed, since expired ACTIVE rows
    /// disappear with the rest.
    pub async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let _guard = self.write_lock.lock().await;

        let deleted = sqlx::query("DELETE FROM alerts WHERE timestamp < ?")
            .bind(format_utc(cutoff))
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            self.seed_counters().await?;
            info!("deleted {deleted} expired alerts");
        }
        Ok(deleted)
    }

    fn row_to_alert(row: &SqliteRow) -> StorageResult<Alert> {
        let metadata_raw: String = row.get("metadata");
        let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_raw)?;

        let timestamp_raw: String = row.get("timestamp");

        Ok(Alert {
            uuid: row.get("uuid"),
            severity: AlertSeverity::from_code(row.get::<i64, _>("severity")),
            category: AlertCategory::from_code(row.get::<i64, _>("category")),
            status: AlertStatus::from_code(row.get::<i64, _>("status")),
            source: row.get("source"),
            message: row.get("message"),
            description: row.get("description"),
            created_at: parse_utc(&timestamp_raw).unwrap_or_else(Utc::now),
            acknowledged_at: row
                .get::<Option<String>, _>("acknowledged_at")
                .and_then(|s| parse_utc(&s)),
            dismissed_at: row
                .get::<Option<String>, _>("dismissed_at")
                .and_then(|s| parse_utc(&s)),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn open_store(dir: &tempfile::TempDir) -> AlertStore {
        AlertStore::open(dir.path().join("alerts.db")).await.unwrap()
    }

    fn warning_alert(message: &str) -> Alert {
        Alert::new(
            AlertSeverity::Warning,
            AlertCategory::Disk,
            "monitor",
            message,
        )
    }

    #[tokio::test]
    async fn create_assigns_uuid_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let created = store.create(warning_alert("disk warning")).await.unwrap();
        assert!(!created.uuid.is_empty());
        assert!(created.created_at > DateTime::UNIX_EPOCH);

        let fetched = store.get(&created.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.uuid, created.uuid);
        assert_eq!(fetched.message, "disk warning");
        assert_eq!(fetched.status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        assert!(store
            .get("00000000-0000-0000-0000-000000000000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn counters_track_active_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        for i in 0..3 {
            store
                .create(warning_alert(&format!("warning {i}")))
                .await
                .unwrap();
        }

        let counts = store.counts();
        assert_eq!(counts.warning, 3);
        assert_eq!(counts.total, 3);
        assert_eq!(
            counts.total,
            counts.info + counts.warning + counts.error + counts.critical
        );
    }

    #[tokio::test]
    async fn acknowledge_decrements_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let alert = store.create(warning_alert("w")).await.unwrap();
        assert!(store.acknowledge(&alert.uuid).await.unwrap());
        assert_eq!(store.counts().warning, 0);

        // Second acknowledge is a no-op that reports false.
        assert!(!store.acknowledge(&alert.uuid).await.unwrap());
        assert_eq!(store.counts().warning, 0);

        let fetched = store.get(&alert.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.status, AlertStatus::Acknowledged);
        assert!(fetched.acknowledged_at.is_some());
        assert!(fetched.acknowledged_at.unwrap() >= fetched.created_at);
    }

    #[tokio::test]
    async fn acknowledge_missing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        assert!(!store.acknowledge("no-such-uuid").await.unwrap());
    }

    #[tokio::test]
    async fn acknowledge_all_zeroes_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        for i in 0..3 {
            store
                .create(warning_alert(&format!("warning {i}")))
                .await
                .unwrap();
        }
        assert_eq!(store.counts().warning, 3);

        let changed = store.acknowledge_all().await.unwrap();
        assert_eq!(changed, 3);

        let counts = store.counts();
        assert_eq!(counts.warning, 0);
        assert_eq!(counts.total, 0);

        // Nothing left to acknowledge.
        assert_eq!(store.acknowledge_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dismiss_decrements_only_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let a = store.create(warning_alert("a")).await.unwrap();
        let b = store.create(warning_alert("b")).await.unwrap();
        assert_eq!(store.counts().total, 2);

        // Dismissing an acknowledged alert must not double-decrement.
        assert!(store.acknowledge(&a.uuid).await.unwrap());
        assert_eq!(store.counts().total, 1);
        assert!(store.dismiss(&a.uuid).await.unwrap());
        assert_eq!(store.counts().total, 1);

        assert!(store.dismiss(&b.uuid).await.unwrap());
        assert_eq!(store.counts().total, 0);

        let fetched = store.get(&a.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.status, AlertStatus::Dismissed);
        assert!(fetched.dismissed_at.is_some());
    }

    #[tokio::test]
    async fn dismiss_missing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        assert!(!store
            .dismiss("00000000-0000-0000-0000-000000000000")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_excludes_dismissed_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let keep = store.create(warning_alert("keep")).await.unwrap();
        let dismissed_one = store.create(warning_alert("drop")).await.unwrap();
        store.dismiss(&dismissed_one.uuid).await.unwrap();

        let visible = store.list(&AlertFilter::default()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].uuid, keep.uuid);

        let all = store
            .list(&AlertFilter {
                include_dismissed: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        // An explicit status filter reaches dismissed rows too.
        let dismissed = store
            .list(&AlertFilter {
                status: Some(AlertStatus::Dismissed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(dismissed.len(), 1);
        assert_eq!(dismissed[0].uuid, dismissed_one.uuid);
    }

    #[tokio::test]
    async fn list_filters_by_severity_category_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.create(warning_alert("disk")).await.unwrap();
        store
            .create(Alert::new(
                AlertSeverity::Critical,
                AlertCategory::Memory,
                "monitor",
                "memory critical",
            ))
            .await
            .unwrap();
        store
            .create(Alert::new(
                AlertSeverity::Info,
                AlertCategory::System,
                "operator",
                "note",
            ))
            .await
            .unwrap();

        let critical = store
            .list(&AlertFilter {
                severity: Some(AlertSeverity::Critical),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].category, AlertCategory::Memory);

        let memory = store
            .list(&AlertFilter {
                category: Some(AlertCategory::Memory),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(memory.len(), 1);

        let operator = store
            .list(&AlertFilter {
                source: Some("operator".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(operator.len(), 1);
        assert_eq!(operator[0].message, "note");
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let base = Utc::now() - Duration::hours(3);
        for i in 0..3 {
            let mut alert = warning_alert(&format!("alert {i}"));
            alert.created_at = base + Duration::hours(i);
            store.create(alert).await.unwrap();
        }

        let listed = store.list(&AlertFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].created_at >= listed[1].created_at);
        assert!(listed[1].created_at >= listed[2].created_at);
    }

    #[tokio::test]
    async fn metadata_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let mut metadata = BTreeMap::new();
        metadata.insert("usage_percent".to_string(), "97".to_string());
        metadata.insert("mount".to_string(), "/".to_string());

        let created = store
            .create(warning_alert("disk").with_metadata(metadata.clone()))
            .await
            .unwrap();
        let fetched = store.get(&created.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.metadata, metadata);
    }

    #[tokio::test]
    async fn cleanup_deletes_old_rows_and_recounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let mut old = warning_alert("old");
        old.created_at = Utc::now() - Duration::days(10);
        store.create(old).await.unwrap();
        store.create(warning_alert("fresh")).await.unwrap();
        assert_eq!(store.counts().total, 2);

        let deleted = store
            .cleanup_older_than(Utc::now() - Duration::days(5))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.counts().total, 1);

        let remaining = store.list(&AlertFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "fresh");
    }

    #[tokio::test]
    async fn counters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");

        {
            let store = AlertStore::open(&path).await.unwrap();
            store.create(warning_alert("persisted")).await.unwrap();
            let acked = store.create(warning_alert("acked")).await.unwrap();
            store.acknowledge(&acked.uuid).await.unwrap();
        }

        let reopened = AlertStore::open(&path).await.unwrap();
        let counts = reopened.counts();
        assert_eq!(counts.warning, 1);
        assert_eq!(counts.total, 1);
    }

    #[tokio::test]
    async fn provided_uuid_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let mut alert = warning_alert("fixed id");
        alert.uuid = "11111111-2222-3333-4444-555555555555".to_string();
        let created = store.create(alert).await.unwrap();
        assert_eq!(created.uuid, "11111111-2222-3333-4444-555555555555");
    }
}
