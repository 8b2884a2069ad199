//! Monitor service - the periodic loop driving collector and thresholds
//!
//! An actor task ticks once a second and runs a health check when the
//! configured interval has elapsed or a check was requested. The latest
//! snapshot is published through a watch channel; the `health` request
//! handler asks for a fresh one via [`MonitorHandle::force_check`].
//!
//! ## Message Flow
//!
//! ```text
//! 1s tick ──▶ interval elapsed? ──▶ collect ──▶ publish snapshot
//!     ▲                                   └──▶ threshold engine
//!     └── Commands (TriggerCheck, ForceCheck, Shutdown)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::daemon::Service;
use crate::monitors::health::{HealthCollector, HealthSnapshot};
use crate::monitors::thresholds::ThresholdEngine;

/// Commands understood by the monitor actor.
enum MonitorCommand {
    /// Run a check as soon as possible.
    TriggerCheck,
    /// Run a check now and return the fresh snapshot.
    ForceCheck {
        respond_to: oneshot::Sender<HealthSnapshot>,
    },
    /// Exit the actor loop.
    Shutdown,
}

struct MonitorActor {
    collector: HealthCollector,
    engine: Arc<ThresholdEngine>,
    config: ConfigStore,
    command_rx: mpsc::Receiver<MonitorCommand>,
    snapshot_tx: watch::Sender<HealthSnapshot>,
}

impl MonitorActor {
    async fn run(mut self) {
        debug!("monitor loop started");

        // Rebuild duplicate-suppression state from ACTIVE alerts, then run
        // an initial check immediately.
        self.engine.prime().await;
        self.run_checks().await;
        let mut last_check = Instant::now();

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let interval =
                        Duration::from_secs(self.config.get().monitoring.interval_secs);
                    if last_check.elapsed() >= interval {
                        self.run_checks().await;
                        last_check = Instant::now();
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(MonitorCommand::TriggerCheck) => {
                        debug!("check requested");
                        self.run_checks().await;
                        last_check = Instant::now();
                    }
                    Some(MonitorCommand::ForceCheck { respond_to }) => {
                        let snapshot = self.run_checks().await;
                        last_check = Instant::now();
                        let _ = respond_to.send(snapshot);
                    }
                    Some(MonitorCommand::Shutdown) | None => break,
                }
            }
        }

        debug!("monitor loop stopped");
    }

    async fn run_checks(&mut self) -> HealthSnapshot {
        let config = self.config.get();
        let snapshot = self.collector.collect().await;
        self.snapshot_tx.send_replace(snapshot.clone());
        self.engine.process(&snapshot, &config).await;
        snapshot
    }
}

/// Cloneable handle for talking to the monitor actor.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
    snapshot_rx: watch::Receiver<HealthSnapshot>,
}

impl MonitorHandle {
    /// Request an immediate check without waiting for the result.
    pub fn trigger_check(&self) {
        let _ = self.tx.try_send(MonitorCommand::TriggerCheck);
    }

    /// Run a check now and return the fresh snapshot, or `None` when the
    /// monitor is not running.
    pub async fn force_check(&self) -> Option<HealthSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(MonitorCommand::ForceCheck { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Most recently published snapshot (zero-filled before the first
    /// check).
    pub fn latest_snapshot(&self) -> HealthSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// The monitor as a kernel-supervised service.
pub struct MonitorService {
    actor: Mutex<Option<MonitorActor>>,
    handle: MonitorHandle,
    tx: mpsc::Sender<MonitorCommand>,
    running: AtomicBool,
    join: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MonitorService {
    pub fn new(
        collector: HealthCollector,
        engine: Arc<ThresholdEngine>,
        config: ConfigStore,
    ) -> Self {
        let (tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(HealthSnapshot::default());

        let actor = MonitorActor {
            collector,
            engine,
            config,
            command_rx,
            snapshot_tx,
        };

        Self {
            actor: Mutex::new(Some(actor)),
            handle: MonitorHandle {
                tx: tx.clone(),
                snapshot_rx,
            },
            tx,
            running: AtomicBool::new(false),
            join: tokio::sync::Mutex::new(None),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Service for MonitorService {
    fn name(&self) -> &'static str {
        "monitor"
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let actor = self
            .actor
            .lock()
            .expect("monitor actor lock poisoned")
            .take();
        let Some(actor) = actor else {
            self.running.store(false, Ordering::SeqCst);
            anyhow::bail!("monitor service cannot be restarted");
        };

        *self.join.lock().await = Some(tokio::spawn(actor.run()));
        info!("monitor started");
        Ok(())
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if self.tx.send(MonitorCommand::Shutdown).await.is_err() {
            warn!("monitor actor already gone");
        }
        if let Some(handle) = self.join.lock().await.take() {
            let _ = handle.await;
        }
        info!("monitor stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}
