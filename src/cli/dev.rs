//! `simmer dev`: serve cooked sources and push hot updates.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;

use super::{display_path, shutdown};
use crate::config::SimmerConfig;
use crate::dev::{DevServer, FileWatcher, http};
use crate::log;
use crate::plugins;

/// Serve until Ctrl+C unblocks the HTTP server.
pub fn run_dev(config: &SimmerConfig, runtime: &Runtime) -> Result<()> {
    let dev = Arc::new(DevServer::new(config.dev_options()?, || plugins::standard(Vec::new())));

    let bound = http::bind(config.dev.interface, config.dev.port)?;
    shutdown::register_server(bound.server());

    if config.dev.watch {
        let root = config.root_dir();
        // the watcher registers with the OS before the first request is answered
        let watcher = FileWatcher::new(&root, Arc::clone(&dev))
            .with_context(|| format!("failed to watch {}", display_path(&root)))?;
        runtime.spawn(watcher.run());
        log!("watch"; "watching {}", display_path(&root));
    }

    bound.run(dev, runtime.handle().clone())?;
    Ok(())
}
