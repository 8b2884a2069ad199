//! Minimal `sd_notify(3)` protocol implementation.
//!
//! Readiness, shutdown, reload and watchdog messages are datagrams sent to
//! the Unix socket named by the `NOTIFY_SOCKET` environment variable. All
//! sends are best-effort: when the daemon runs outside systemd the variable
//! is unset and every call is a no-op.

use std::os::unix::net::UnixDatagram;
use std::path::Path;

use tracing::{debug, trace};

const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Validate a `NOTIFY_SOCKET` value: absolute path or abstract socket.
fn valid_socket_path(path: &str) -> bool {
    !path.is_empty() && (path.starts_with('/') || path.starts_with('@'))
}

fn notify_raw(state: &str) -> bool {
    let Ok(socket_path) = std::env::var(NOTIFY_SOCKET_ENV) else {
        trace!("NOTIFY_SOCKET not set, skipping sd_notify");
        return false;
    };

    if !valid_socket_path(&socket_path) {
        debug!("ignoring invalid NOTIFY_SOCKET value");
        return false;
    }

    // Abstract sockets are addressed with a leading NUL byte.
    let resolved = socket_path
        .strip_prefix('@')
        .map_or_else(|| socket_path.clone(), |rest| format!("\0{rest}"));

    let Ok(sock) = UnixDatagram::unbound() else {
        debug!("failed to create datagram socket for sd_notify");
        return false;
    };

    match sock.send_to(state.as_bytes(), Path::new(&resolved)) {
        Ok(_) => true,
        Err(e) => {
            debug!("sd_notify send failed: {e}");
            false
        }
    }
}

/// `READY=1` - initialization is complete, the daemon accepts requests.
pub fn notify_ready() -> bool {
    notify_raw("READY=1\nSTATUS=Running")
}

/// `STOPPING=1` - the shutdown sequence has begun.
pub fn notify_stopping() -> bool {
    notify_raw("STOPPING=1\nSTATUS=Shutting down")
}

/// `WATCHDOG=1` - keepalive ping for `WatchdogSec` supervision.
pub fn notify_watchdog() -> bool {
    notify_raw("WATCHDOG=1")
}

/// `RELOADING=1` - a configuration reload is in progress. Follow up with
/// [`notify_ready`] once the new configuration is applied.
pub fn notify_reloading() -> bool {
    notify_raw("RELOADING=1")
}
