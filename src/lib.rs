//! vigild - a single-host supervisory daemon
//!
//! The daemon samples host health (CPU, memory, disk, failed systemd units),
//! raises and clears threshold alerts into a local SQLite store, answers a
//! JSON request/response protocol on a local Unix socket, and can enrich
//! alert text through a local LLM inference worker.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌───────────────────┐
//!                  │   Daemon kernel   │  start/stop ordering, signals,
//!                  └─────────┬─────────┘  watchdog, retention cleanup
//!                            │ supervises
//!         ┌──────────────────┼──────────────────┐
//!         │                  │                  │
//! ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//! │ ControlServer │  │ MonitorService│  │   LlmEngine   │
//! │ (unix socket) │  │ (collector +  │  │ (worker queue)│
//! └───────┬───────┘  │  thresholds)  │  └───────▲───────┘
//!         │          └───────┬───────┘          │
//!         │ handlers         │ raises/clears    │ enrichment
//!         └──────────────────▼──────────────────┘
//!                      ┌───────────┐
//!                      │ AlertStore│ (SQLite, WAL)
//!                      └───────────┘
//! ```
//!
//! Components are owned by the composition root in `main.rs` and handed to
//! each other at construction; nothing is looked up through globals.

pub mod config;
pub mod daemon;
pub mod llm;
pub mod logging;
pub mod monitors;
pub mod sdnotify;
pub mod server;
pub mod storage;
pub mod util;

/// Daemon name as reported by the `version` method.
pub const DAEMON_NAME: &str = "vigild";
