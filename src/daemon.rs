//! Daemon kernel: service lifecycle, signals, watchdog, retention
//!
//! Services are owned values behind the small [`Service`] capability
//! surface, registered into a vector whose lock only protects
//! registration. Startup runs in descending priority order against a
//! snapshot taken under the lock; shutdown runs in reverse. Signals are
//! translated into two atomic flags by dedicated listener tasks and acted
//! upon from the event loop, never from signal context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

use crate::config::ConfigStore;
use crate::logging::LogHandle;
use crate::sdnotify;
use crate::storage::AlertStore;

/// How often expired alerts are purged.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Capability surface the kernel supervises.
///
/// `priority` orders startup: larger starts earlier, and shutdown runs in
/// the reverse order.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self);
    fn is_running(&self) -> bool;
    fn is_healthy(&self) -> bool;
}

/// Owns the service set and drives the daemon lifecycle.
pub struct Daemon {
    services: RwLock<Vec<Arc<dyn Service>>>,
    running: AtomicBool,
    shutdown_requested: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    config: ConfigStore,
    log: Option<LogHandle>,
    store: Option<Arc<AlertStore>>,
    tick: Duration,
    started_at: Mutex<Instant>,
}

impl Daemon {
    pub fn new(config: ConfigStore, log: Option<LogHandle>) -> Self {
        Self {
            services: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            reload_requested: Arc::new(AtomicBool::new(false)),
            config,
            log,
            store: None,
            tick: Duration::from_secs(5),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Attach the alert store so the event loop can run retention cleanup.
    pub fn with_alert_store(mut self, store: Arc<AlertStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the event-loop cadence (tests use a short tick).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Load configuration (failure is non-fatal: defaults are used), apply
    /// the log level and install signal listeners.
    pub fn initialize(&self, config_path: &std::path::Path) -> anyhow::Result<()> {
        if let Err(e) = self.config.load(config_path) {
            warn!("continuing with default configuration: {e}");
        }

        if let Some(log) = &self.log {
            log.set_level(self.config.get().log_level);
        }

        self.install_signal_handlers()?;
        info!("daemon initialized");
        Ok(())
    }

    /// Spawn listeners that translate SIGTERM/SIGINT into the shutdown flag
    /// and SIGHUP into the reload flag. SIGPIPE is already ignored by the
    /// Rust runtime.
    fn install_signal_handlers(&self) -> anyhow::Result<()> {
        let mut term = signal(SignalKind::terminate())?;
        let shutdown = Arc::clone(&self.shutdown_requested);
        tokio::spawn(async move {
            while term.recv().await.is_some() {
                shutdown.store(true, Ordering::SeqCst);
            }
        });

        let mut interrupt = signal(SignalKind::interrupt())?;
        let shutdown = Arc::clone(&self.shutdown_requested);
        tokio::spawn(async move {
            while interrupt.recv().await.is_some() {
                shutdown.store(true, Ordering::SeqCst);
            }
        });

        let mut hangup = signal(SignalKind::hangup())?;
        let reload = Arc::clone(&self.reload_requested);
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                reload.store(true, Ordering::SeqCst);
            }
        });

        debug!("signal handlers installed");
        Ok(())
    }

    pub fn register_service(&self, service: Arc<dyn Service>) {
        debug!("registering service: {}", service.name());
        self.services
            .write()
            .expect("services lock poisoned")
            .push(service);
    }

    /// The flag the `shutdown` socket method flips.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_requested)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .expect("start time lock poisoned")
            .elapsed()
    }

    /// Reload configuration and re-apply the log level, acknowledging the
    /// reload to the supervisor.
    pub fn reload_config(&self) -> bool {
        sdnotify::notify_reloading();
        let ok = match self.config.reload() {
            Ok(()) => {
                if let Some(log) = &self.log {
                    log.set_level(self.config.get().log_level);
                }
                info!("configuration reloaded");
                true
            }
            Err(e) => {
                error!("configuration reload failed: {e}");
                false
            }
        };
        sdnotify::notify_ready();
        ok
    }

    /// Run the daemon until shutdown is requested. Returns the process exit
    /// code: 0 on clean shutdown, 1 when services failed to start.
    pub async fn run(&self) -> i32 {
        let startup = Instant::now();
        *self.started_at.lock().expect("start time lock poisoned") = startup;

        if let Err(e) = self.start_services().await {
            error!("failed to start services: {e}");
            return 1;
        }
        self.running.store(true, Ordering::SeqCst);

        sdnotify::notify_ready();
        info!(
            "startup completed in {:.3}ms",
            startup.elapsed().as_secs_f64() * 1000.0
        );

        let mut last_cleanup = Instant::now();
        while !self.shutdown_requested.load(Ordering::SeqCst) {
            self.event_tick(&mut last_cleanup).await;
            self.interruptible_sleep(self.tick).await;
        }

        info!("shutdown requested, stopping services");
        sdnotify::notify_stopping();
        self.stop_services().await;
        self.running.store(false, Ordering::SeqCst);

        info!("daemon stopped");
        0
    }

    /// One pass of the event loop: signal flags, service health, watchdog,
    /// retention cleanup.
    async fn event_tick(&self, last_cleanup: &mut Instant) {
        if self.reload_requested.swap(false, Ordering::SeqCst) {
            info!("reload signal received");
            self.reload_config();
        }

        {
            let services = self.services.read().expect("services lock poisoned");
            for service in services.iter() {
                if service.is_running() && !service.is_healthy() {
                    warn!("service unhealthy: {}", service.name());
                }
            }
        }

        sdnotify::notify_watchdog();

        if let Some(store) = &self.store {
            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                *last_cleanup = Instant::now();
                let retention = self.config.get().alerts.retention_hours;
                let cutoff = chrono::Utc::now() - chrono::Duration::hours(retention as i64);
                match store.cleanup_older_than(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => info!("retention cleanup removed {n} alerts"),
                    Err(e) => warn!("retention cleanup failed: {e}"),
                }
            }
        }
    }

    /// Sleep up to `duration`, in one-second increments, returning early
    /// once shutdown is requested.
    async fn interruptible_sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown_requested.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
        }
    }

    /// Start every registered service, highest priority first. On failure
    /// the already-started services are stopped in reverse and the error is
    /// propagated.
    async fn start_services(&self) -> anyhow::Result<()> {
        let services: Vec<Arc<dyn Service>> = {
            let mut guard = self.services.write().expect("services lock poisoned");
            guard.sort_by_key(|service| std::cmp::Reverse(service.priority()));
            guard.clone()
        };

        let mut started: Vec<Arc<dyn Service>> = Vec::new();
        for service in services {
            info!("starting service: {}", service.name());
            match service.start().await {
                Ok(()) => started.push(service),
                Err(e) => {
                    error!("failed to start service {}: {e}", service.name());
                    for prior in started.iter().rev() {
                        prior.stop().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stop services in reverse priority order, against a local snapshot so
    /// no lock is held across `stop`.
    async fn stop_services(&self) {
        let services: Vec<Arc<dyn Service>> = {
            let guard = self.services.read().expect("services lock poisoned");
            guard.iter().rev().cloned().collect()
        };

        for service in services {
            if service.is_running() {
                info!("stopping service: {}", service.name());
                service.stop().await;
            }
        }
    }
}
