//! Process-wide Ctrl+C handling.
//!
//! One handler is installed at startup. What it does depends on what has
//! been registered since:
//! - a build registers its [`CancelSignal`], which is cancelled
//! - the dev server registers its HTTP server, which is unblocked
//! - with nothing registered the process exits immediately

use std::sync::{Arc, OnceLock};

use tiny_http::Server;

use crate::log;
use crate::plugin::CancelSignal;

static SIGNAL: OnceLock<CancelSignal> = OnceLock::new();
static SERVER: OnceLock<Arc<Server>> = OnceLock::new();

pub fn setup_shutdown_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        if let Some(signal) = SIGNAL.get() {
            log!("build"; "cancelling...");
            signal.cancel();
        }
        if let Some(server) = SERVER.get() {
            log!("dev"; "shutting down...");
            server.unblock();
        }
        if SIGNAL.get().is_none() && SERVER.get().is_none() {
            std::process::exit(0);
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Cancel `signal` on Ctrl+C.
pub fn register_signal(signal: CancelSignal) {
    let _ = SIGNAL.set(signal);
}

/// Unblock `server` on Ctrl+C so its request loop returns.
pub fn register_server(server: Arc<Server>) {
    let _ = SERVER.set(server);
}
