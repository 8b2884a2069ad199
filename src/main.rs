//! vigild daemon entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info};

use vigild::config::ConfigStore;
use vigild::daemon::Daemon;
use vigild::llm::{HttpBackend, LlmEngine};
use vigild::logging::{self, LogHandle};
use vigild::monitors::{HealthCollector, MonitorService, ThresholdEngine};
use vigild::server::{handlers::register_all, ControlServer, HandlerContext};
use vigild::storage::AlertStore;

#[derive(Debug, Parser)]
#[command(
    name = "vigild",
    version,
    about = "Single-host supervisory daemon",
    long_about = "Monitors host health, persists threshold alerts, answers a JSON \
                  protocol on a local Unix socket and optionally enriches alerts \
                  through a local LLM worker. Designed to run under systemd \
                  (Type=notify) but works standalone with --foreground."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", default_value = "/etc/vigild/config.yaml")]
    config: PathBuf,

    /// Enable debug logging regardless of the configured level
    #[arg(short, long)]
    verbose: bool,

    /// Run in the foreground with human-readable logs
    #[arg(short, long)]
    foreground: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log = logging::init(args.foreground, args.verbose);
    let code = run(args, log).await;
    std::process::exit(code);
}

async fn run(args: Args, log: LogHandle) -> i32 {
    info!("vigild starting, version {}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::new();
    let daemon = Daemon::new(config_store.clone(), Some(log.clone()));
    if let Err(e) = daemon.initialize(&args.config) {
        error!("failed to initialize daemon: {e}");
        return 1;
    }
    if args.verbose {
        // -v wins over whatever the file configured.
        log.set_level(0);
    }
    let config = config_store.get();

    let store = match AlertStore::open(&config.alerts.db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to initialize alert store: {e}");
            return 1;
        }
    };
    let daemon = daemon.with_alert_store(Arc::clone(&store));

    let backend = match HttpBackend::new(&config.llm.endpoint) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("failed to construct LLM backend: {e}");
            return 1;
        }
    };
    let llm = LlmEngine::new(backend, config.llm.clone());

    let engine = Arc::new(ThresholdEngine::new(
        Arc::clone(&store),
        config.llm.enabled.then(|| llm.clone()),
    ));
    let monitor = Arc::new(MonitorService::new(
        HealthCollector::new(),
        engine,
        config_store.clone(),
    ));
    let monitor_handle = monitor.handle();

    // Re-evaluate thresholds promptly after every configuration change.
    {
        let handle = monitor_handle.clone();
        config_store.on_change(move |_| handle.trigger_check());
    }

    let server = ControlServer::new(
        config.socket.path.clone(),
        Duration::from_millis(config.socket.timeout_ms),
        config.rate_limit.max_requests_per_sec,
    );
    register_all(
        &server,
        HandlerContext {
            config: config_store.clone(),
            store: Arc::clone(&store),
            monitor: monitor_handle,
            llm: llm.clone(),
            log: Some(log),
            shutdown: daemon.shutdown_flag(),
            started_at: Instant::now(),
        },
    );

    daemon.register_service(Arc::new(server));
    daemon.register_service(monitor);
    if config.llm.enabled {
        daemon.register_service(Arc::new(llm));
    }

    let code = daemon.run().await;
    info!("vigild shutdown complete");
    code
}
