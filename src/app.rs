// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Headless runtime wiring.
//!
//! Hosts the controller behind a single async mutex and drives the poll
//! loops: telemetry at a fixed 100 ms, animation at its adaptive rate,
//! service status every 2 s, and a 1 Hz cooldown ticker. Every loop body
//! takes the lock, does its work, and schedules exactly its own
//! successor; worker output reaches the controller only through the line
//! channel its pipe readers feed.

use crate::controller::{
    Controller, ControllerEvent, ControllerHandles, STATUS_POLL_INTERVAL, VU_POLL_INTERVAL,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Settle time before the automatic start fires.
const AUTO_START_DELAY: Duration = Duration::from_millis(1500);

/// Run the control plane until a shutdown signal arrives.
pub async fn run(controller: Controller, handles: ControllerHandles) {
    let controller = Arc::new(Mutex::new(controller));
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let mut ctrl = controller.lock().await;
        let messages = ctrl.initialize().await;
        for line in &messages {
            info!("requirement: {line}");
        }
    }

    // Everything a presentation layer would subscribe to lands in the log.
    let ControllerHandles {
        mut events,
        mut worker_lines,
    } = handles;
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::Log(line) => info!("{line}"),
                ControllerEvent::StatusChanged {
                    redis_running,
                    worker_running,
                } => {
                    debug!("status: redis={redis_running} worker={worker_running}");
                }
                ControllerEvent::RequirementsChecked(lines) => {
                    for line in lines {
                        debug!("requirement: {line}");
                    }
                }
                ControllerEvent::CooldownTick(remaining) => {
                    info!("Restart allowed in {remaining}s");
                }
                ControllerEvent::CooldownEnded => info!("Cooldown finished"),
            }
        }
    });

    // Worker output drain: the pipe readers only enqueue, this task hands
    // each line to the controller on the control side of the channel.
    let line_controller = controller.clone();
    let line_task = tokio::spawn(async move {
        while let Some(line) = worker_lines.recv().await {
            line_controller.lock().await.handle_worker_line(&line);
        }
    });

    // Telemetry poll, fixed period.
    let vu_controller = controller.clone();
    let vu_shutdown = shutdown.clone();
    let vu_task = tokio::spawn(async move {
        while !vu_shutdown.load(Ordering::Relaxed) {
            vu_controller.lock().await.update_from_telemetry();
            tokio::time::sleep(VU_POLL_INTERVAL).await;
        }
    });

    // Animation frames at the level-dependent rate.
    let anim_controller = controller.clone();
    let anim_shutdown = shutdown.clone();
    let anim_task = tokio::spawn(async move {
        while !anim_shutdown.load(Ordering::Relaxed) {
            let delay = anim_controller.lock().await.animate();
            tokio::time::sleep(delay).await;
        }
    });

    // Service and worker status poll.
    let status_controller = controller.clone();
    let status_shutdown = shutdown.clone();
    let status_task = tokio::spawn(async move {
        while !status_shutdown.load(Ordering::Relaxed) {
            status_controller.lock().await.refresh_status().await;
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    });

    // Cooldown ticker: 1 Hz, only advances while a lockout is armed.
    let cooldown_controller = controller.clone();
    let cooldown_shutdown = shutdown.clone();
    let cooldown_task = tokio::spawn(async move {
        while !cooldown_shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut ctrl = cooldown_controller.lock().await;
            if ctrl.state().cooldown_active {
                ctrl.tick_cooldown();
            }
        }
    });

    // One-shot auto start, matching the operator flipping the switch.
    let auto_controller = controller.clone();
    let auto_task = tokio::spawn(async move {
        tokio::time::sleep(AUTO_START_DELAY).await;
        let mut ctrl = auto_controller.lock().await;
        if ctrl.auto_start_enabled() && !ctrl.is_worker_running() {
            info!("Auto-start enabled, starting the worker");
            let result = ctrl.toggle().await;
            if !result.success {
                warn!("Auto-start failed: {}", result.message);
            }
        }
    });

    shutdown_signal().await;

    shutdown.store(true, Ordering::Relaxed);
    auto_task.abort();
    let _ = tokio::time::timeout(Duration::from_secs(2), vu_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), anim_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(3), status_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), cooldown_task).await;

    controller.lock().await.shutdown().await;
    event_task.abort();
    line_task.abort();
}

/// Resolve when the operator asks the process to exit.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let sigterm = signal(SignalKind::terminate());
        match sigterm {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt, shutting down...");
    }
}
