// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! OBLink - local control plane for one audio broadcast link.
//!
//! Drives the link worker process and the Redis service, polls per-role
//! VU telemetry out of Redis, and publishes animated levels plus
//! running/cooldown state to subscribers.

mod app;
mod config;
mod controller;
mod levels;
mod process;
mod state;
mod telemetry;

use config::ConfigStore;
use controller::Controller;
use process::{RedisServiceManager, WorkerCommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("oblink=debug".parse().unwrap()))
        .init();

    info!("Starting OBLink");

    let config_store = match ConfigStore::open() {
        Ok(store) => store,
        Err(e) => {
            warn!("No usable config directory ({e}); settings will be kept beside the binary");
            ConfigStore::at(Path::new("."))
        }
    };

    let worker = WorkerCommand::discover();
    info!(
        "Worker launch recipe: runtime={} entry={}",
        worker.runtime.display(),
        worker.entry.display()
    );

    let (controller, handles) = Controller::new(
        config_store,
        worker,
        PathBuf::from("/usr/bin/gst-launch-1.0"),
        RedisServiceManager::DEFAULT_UNIT,
    );

    app::run(controller, handles).await;

    info!("OBLink stopped");
}
