// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Orchestration core.
//!
//! The controller owns all runtime state and mediates between the config
//! store, the service and process managers, and the telemetry client. It
//! moves through three states: idle (worker down, no cooldown), running
//! (worker alive), and cooldown (worker just stopped, restart locked for
//! a few seconds to prevent stop/start flapping). Subscribers receive
//! [`ControllerEvent`]s; the controller never calls into any UI.

#![allow(dead_code)]

use crate::config::{ConfigStore, LinkConfig, Role, SavedConfig};
use crate::levels;
use crate::process::{
    ControlResult, RedisServiceManager, RequirementsChecker, ServiceStatus, WorkerCommand,
    WorkerManager, STOP_TIMEOUT,
};
use crate::state::{AppState, VuStatus, VuTarget, DECAY_FACTOR, DECAY_FLOOR};
use crate::telemetry::{self, LevelFetch, TelemetryClient, VuSample};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

/// Restart lockout after a stop, in whole seconds.
pub const COOLDOWN_SECS: u32 = 5;

/// Telemetry poll period.
pub const VU_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Service and worker status poll period.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Settle delay between asking systemd to start Redis and re-checking it.
const SERVICE_SETTLE: Duration = Duration::from_millis(300);

/// Notifications pushed to whatever presentation layer is subscribed.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A line for the operator-visible log pane.
    Log(String),
    /// Service or worker liveness was re-evaluated.
    StatusChanged {
        redis_running: bool,
        worker_running: bool,
    },
    /// Requirement check results, one line per dependency.
    RequirementsChecked(Vec<String>),
    /// Cooldown seconds remaining after a 1 Hz tick.
    CooldownTick(u32),
    /// Cooldown finished; starting is allowed again.
    CooldownEnded,
}

/// Receiving ends handed to the runtime that hosts the controller.
pub struct ControllerHandles {
    /// State-change and log notifications.
    pub events: UnboundedReceiver<ControllerEvent>,
    /// Raw worker output lines, forwarded by the pipe readers.
    pub worker_lines: UnboundedReceiver<String>,
}

pub struct Controller {
    state: AppState,
    link: LinkConfig,
    args_string: String,
    config_store: ConfigStore,
    telemetry: TelemetryClient,
    redis: RedisServiceManager,
    worker: WorkerManager,
    requirements: RequirementsChecker,
    events: UnboundedSender<ControllerEvent>,
    worker_lines: UnboundedSender<String>,
}

impl Controller {
    /// Build the controller and its subscription handles.
    ///
    /// Loads the persisted settings and derives the initial launch line
    /// from the active role.
    pub fn new(
        mut config_store: ConfigStore,
        worker_command: WorkerCommand,
        audio_tool: PathBuf,
        redis_unit: &str,
    ) -> (Self, ControllerHandles) {
        config_store.load();
        let args_string = config_store.config().current_args();
        let link = LinkConfig::from_args(&args_string);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();

        let controller = Self {
            state: AppState::default(),
            link,
            args_string,
            requirements: RequirementsChecker::new(
                worker_command.clone(),
                audio_tool,
                redis_unit,
            ),
            worker: WorkerManager::new(worker_command),
            redis: RedisServiceManager::with_unit(redis_unit),
            telemetry: TelemetryClient::new(),
            config_store,
            events: events_tx,
            worker_lines: lines_tx,
        };
        let handles = ControllerHandles {
            events: events_rx,
            worker_lines: lines_rx,
        };
        (controller, handles)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn link(&self) -> &LinkConfig {
        &self.link
    }

    pub fn current_args(&self) -> &str {
        &self.args_string
    }

    pub fn saved_config(&self) -> &SavedConfig {
        self.config_store.config()
    }

    pub fn auto_start_enabled(&self) -> bool {
        self.config_store.config().auto_start
    }

    /// First-run setup: parse the launch line and check requirements.
    pub async fn initialize(&mut self) -> Vec<String> {
        self.update_link_config();
        self.check_requirements().await
    }

    /// Re-check every dependency and refresh the liveness flags.
    pub async fn check_requirements(&mut self) -> Vec<String> {
        let messages = self.requirements.check_all().await;
        self.state.redis_running = self.requirements.is_redis_running().await;
        self.state.worker_running = self.worker.is_running();
        let _ = self
            .events
            .send(ControllerEvent::RequirementsChecked(messages.clone()));
        self.notify_status();
        messages
    }

    // ==================== Launch Arguments ====================

    /// Replace the launch line, re-derive the link, persist the change.
    pub fn set_args(&mut self, args: &str) {
        self.args_string = args.to_string();
        self.update_link_config();

        let role = self.link.role.unwrap_or(Role::Tx);
        self.config_store.update_from_args(args, role);
        self.config_store.save();
    }

    pub fn set_auto_start(&mut self, enabled: bool) {
        self.config_store.config_mut().auto_start = enabled;
        self.config_store.save();
    }

    fn update_link_config(&mut self) {
        let old_host = self.link.config_host.clone();
        self.link = LinkConfig::from_args(&self.args_string);
        // A different config host invalidates the telemetry connection.
        if old_host != self.link.config_host {
            self.telemetry.disconnect();
        }
    }

    // ==================== Redis Service Control ====================

    pub async fn start_redis(&mut self) -> ControlResult {
        let result = self.redis.start().await;
        if result.success {
            self.log("Requested start of the Redis service");
            tokio::time::sleep(SERVICE_SETTLE).await;
            self.state.redis_running = self.requirements.is_redis_running().await;
            self.notify_status();
        } else {
            self.log_error(format!("Redis service start failed: {}", result.message));
        }
        result
    }

    pub async fn stop_redis(&mut self) -> ControlResult {
        let result = self.redis.stop().await;
        if result.success {
            self.log("Requested stop of the Redis service");
            self.state.redis_running = false;
            self.notify_status();
        } else {
            self.log_error(format!("Redis service stop failed: {}", result.message));
        }
        result
    }

    pub async fn is_redis_running(&mut self) -> bool {
        self.state.redis_running = self.redis.get_status().await == ServiceStatus::Running;
        self.state.redis_running
    }

    // ==================== Worker Control ====================

    pub async fn start_worker(&mut self, use_fallback: bool) -> ControlResult {
        let (can_start, reason) = self.worker.can_start();
        if !can_start && !use_fallback {
            return ControlResult::fail(reason);
        }
        if !self.is_redis_running().await {
            return ControlResult::fail("Redis not running");
        }

        self.log(format!("Launching worker with args: {}", self.args_string));
        let result = self
            .worker
            .start(&self.args_string, self.worker_lines.clone(), use_fallback);
        if result.success {
            self.log(result.message.clone());
            self.state.worker_running = true;
            self.notify_status();
        } else {
            self.log_error(format!("Failed to start worker: {}", result.message));
        }
        result
    }

    pub async fn stop_worker(&mut self) -> ControlResult {
        if !self.worker.is_running() {
            return ControlResult::fail("Worker not running");
        }

        let result = self.worker.stop(STOP_TIMEOUT).await;
        if result.success {
            self.log("Worker stopped");
        } else {
            self.log_error(format!("Error stopping worker: {}", result.message));
        }
        self.state.worker_running = false;
        self.notify_status();
        result
    }

    pub fn is_worker_running(&mut self) -> bool {
        self.state.worker_running = self.worker.is_running();
        self.state.worker_running
    }

    /// Stop if running, start if stopped. Refused during cooldown before
    /// any manager is consulted.
    pub async fn toggle(&mut self) -> ControlResult {
        if self.state.cooldown_active {
            return ControlResult::fail("Cooldown active");
        }

        if self.is_worker_running() {
            let result = self.stop_worker().await;
            if result.success {
                self.start_cooldown(COOLDOWN_SECS);
            }
            result
        } else {
            self.start_worker(false).await
        }
    }

    // ==================== Cooldown ====================

    /// Arm the restart lockout. It cannot be cancelled early.
    pub fn start_cooldown(&mut self, seconds: u32) {
        self.state.cooldown_active = true;
        self.state.cooldown_remaining = seconds;
    }

    /// One 1 Hz cooldown step. Returns true while the lockout holds.
    pub fn tick_cooldown(&mut self) -> bool {
        if !self.state.cooldown_active {
            return false;
        }

        self.state.cooldown_remaining = self.state.cooldown_remaining.saturating_sub(1);
        if self.state.cooldown_remaining == 0 {
            self.state.cooldown_active = false;
            let _ = self.events.send(ControllerEvent::CooldownEnded);
            return false;
        }

        let _ = self
            .events
            .send(ControllerEvent::CooldownTick(self.state.cooldown_remaining));
        true
    }

    // ==================== Telemetry ====================

    /// One telemetry poll: fetch both roles and apply them to the meters.
    ///
    /// Without a link name neither meter is fed and the store is not even
    /// contacted. The local meter always mirrors the transmitted signal
    /// and the remote bar the received one, regardless of which role this
    /// node plays.
    pub fn update_from_telemetry(&mut self) {
        let link_name = match self.link.link_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                self.set_vu_silence(VuTarget::Local, VuStatus::NoLink, "Link name missing");
                self.set_vu_silence(VuTarget::Remote, VuStatus::NoLink, "Link name missing");
                return;
            }
        };

        if !self.telemetry.is_connected() {
            let raw_host = self.link.config_host.clone().unwrap_or_default();
            let (host, port) = telemetry::parse_host_port(&raw_host);
            let connected = match host {
                Some(host) => self.telemetry.connect(&host, port),
                None => false,
            };
            if !connected {
                self.set_vu_silence(VuTarget::Local, VuStatus::Blocked, "Cannot reach telemetry store");
                self.set_vu_silence(VuTarget::Remote, VuStatus::Blocked, "Cannot reach telemetry store");
                return;
            }
        }

        self.fetch_and_apply(&link_name, Role::Tx, VuTarget::Local);
        self.fetch_and_apply(&link_name, Role::Rx, VuTarget::Remote);
    }

    fn fetch_and_apply(&mut self, link_name: &str, role: Role, target: VuTarget) {
        let sample = match self.telemetry.fetch_level(link_name, role) {
            LevelFetch::Missing => {
                self.set_vu_silence(
                    target,
                    VuStatus::NoData,
                    &format!("No data for {}", role.as_str()),
                );
                return;
            }
            LevelFetch::Invalid => {
                self.set_vu_silence(
                    target,
                    VuStatus::InvalidData,
                    &format!("Non-numeric level data for {}", role.as_str()),
                );
                return;
            }
            LevelFetch::Sample(sample) => sample,
        };

        if sample.is_stale {
            self.set_vu_silence(
                target,
                VuStatus::Stale,
                &format!("Stale data for {}", role.as_str()),
            );
            return;
        }

        self.apply_sample(target, &sample);
        self.record_vu_status(target, VuStatus::Ok, None);
    }

    fn apply_sample(&mut self, target: VuTarget, sample: &VuSample) {
        let left_norm = levels::db_to_normalized(sample.left_db);
        let right_norm = levels::db_to_normalized(sample.right_db);
        let avg = (left_norm + right_norm) / 2.0;
        let (left, right, factor) = levels::apply_jitter(left_norm, right_norm, avg);

        let vu = match target {
            VuTarget::Local => &mut self.state.local_vu,
            VuTarget::Remote => &mut self.state.remote_vu,
        };
        vu.left = levels::smooth(vu.left, left, factor);
        vu.right = levels::smooth(vu.right, right, factor);
        vu.has_real_data = true;
    }

    fn set_vu_silence(&mut self, target: VuTarget, status: VuStatus, detail: &str) {
        match target {
            VuTarget::Local => self.state.local_vu.has_real_data = false,
            VuTarget::Remote => self.state.remote_vu.has_real_data = false,
        }
        self.record_vu_status(target, status, Some(detail));
    }

    /// Log a diagnostic transition once; repeats of the same status for
    /// the same target are suppressed.
    fn record_vu_status(&mut self, target: VuTarget, status: VuStatus, detail: Option<&str>) {
        if self.state.vu_diag.get(&target) == Some(&status) {
            return;
        }
        self.state.vu_diag.insert(target, status);

        let mut message = format!("{} VU status: {}", target.as_str(), status.as_str());
        if let Some(detail) = detail {
            message = format!("{message} ({detail})");
        }
        if status.is_ok() {
            info!("{message}");
        } else {
            warn!("{message}");
            let _ = self.events.send(ControllerEvent::Log(message));
        }
    }

    // ==================== Animation ====================

    /// Advance one animation frame; returns the delay until the next one.
    ///
    /// Meters without fresh data decay monotonically toward zero. The
    /// receiver bar follows the remote meter's average when live and
    /// decays on its own otherwise.
    pub fn animate(&mut self) -> Duration {
        if !self.state.local_vu.has_real_data {
            self.state.local_vu.decay();
        }

        if self.state.remote_vu.has_real_data {
            self.state.receiver_level = self.state.remote_vu.average();
        } else {
            self.state.remote_vu.decay();
            self.state.receiver_level *= DECAY_FACTOR;
            if self.state.receiver_level < DECAY_FLOOR {
                self.state.receiver_level = 0.0;
            }
        }

        let max_level = self
            .state
            .local_vu
            .max_level()
            .max(self.state.receiver_level);
        Duration::from_millis(levels::refresh_interval_ms(max_level))
    }

    // ==================== Status ====================

    /// Refresh service and worker liveness (the 2 s poll body).
    pub async fn refresh_status(&mut self) {
        self.state.redis_running = self.requirements.is_redis_running().await;
        self.state.worker_running = self.worker.is_running();
        self.notify_status();
    }

    /// Forward one worker output line to subscribers.
    pub fn handle_worker_line(&mut self, line: &str) {
        let _ = self
            .events
            .send(ControllerEvent::Log(format!("[worker] {}", line.trim_end())));
    }

    fn notify_status(&self) {
        let _ = self.events.send(ControllerEvent::StatusChanged {
            redis_running: self.state.redis_running,
            worker_running: self.state.worker_running,
        });
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        let _ = self.events.send(ControllerEvent::Log(message));
    }

    fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        let _ = self.events.send(ControllerEvent::Log(message));
    }

    // ==================== Shutdown ====================

    /// Clean shutdown: stop the worker if needed, drop the connection.
    pub async fn shutdown(&mut self) {
        if self.worker.is_running() {
            let _ = self.worker.stop(STOP_TIMEOUT).await;
        }
        self.telemetry.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_controller(dir: &std::path::Path) -> (Controller, ControllerHandles) {
        let store = ConfigStore::at(dir);
        let worker = WorkerCommand {
            runtime: PathBuf::from("/nonexistent/runtime"),
            entry: PathBuf::from("/nonexistent/entry"),
            fallback: None,
            working_dir: None,
        };
        Controller::new(
            store,
            worker,
            PathBuf::from("/nonexistent/audio-tool"),
            "nonexistent-unit.service",
        )
    }

    #[test]
    fn test_initial_args_come_from_saved_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (controller, _handles) = test_controller(dir.path());
        assert_eq!(
            controller.current_args(),
            "127.0.0.1 emetteur transmission tx 192.168.1.17 -e pcm -r 48000 -j 60 -a auto"
        );
        assert_eq!(controller.link().role, Some(Role::Tx));
    }

    #[tokio::test]
    async fn test_toggle_during_cooldown_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        controller.start_cooldown(COOLDOWN_SECS);

        let result = controller.toggle().await;
        assert!(!result.success);
        assert_eq!(result.message, "Cooldown active");
        assert!(!controller.state().worker_running);
        assert!(controller.state().cooldown_active);
    }

    #[tokio::test]
    async fn test_stop_worker_when_not_running_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());

        let result = controller.stop_worker().await;
        assert!(!result.success);
        assert!(!controller.state().worker_running);
    }

    #[tokio::test]
    async fn test_start_worker_refused_without_prerequisites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());

        let result = controller.start_worker(false).await;
        assert!(!result.success);
        assert!(result.message.contains("not found"));
        assert!(!controller.state().worker_running);
    }

    #[test]
    fn test_cooldown_ticks_down_to_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, mut handles) = test_controller(dir.path());
        controller.start_cooldown(COOLDOWN_SECS);
        assert_eq!(controller.state().cooldown_remaining, 5);

        let mut remaining = Vec::new();
        while controller.tick_cooldown() {
            remaining.push(controller.state().cooldown_remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1]);
        assert!(!controller.state().cooldown_active);
        assert_eq!(controller.state().cooldown_remaining, 0);

        let mut events = Vec::new();
        while let Ok(event) = handles.events.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                ControllerEvent::CooldownTick(4),
                ControllerEvent::CooldownTick(3),
                ControllerEvent::CooldownTick(2),
                ControllerEvent::CooldownTick(1),
                ControllerEvent::CooldownEnded,
            ]
        );

        // A further tick in idle is a no-op.
        assert!(!controller.tick_cooldown());
    }

    #[test]
    fn test_missing_link_name_marks_both_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        controller.set_args("");

        controller.update_from_telemetry();
        assert_eq!(
            controller.state().vu_diag.get(&VuTarget::Local),
            Some(&VuStatus::NoLink)
        );
        assert_eq!(
            controller.state().vu_diag.get(&VuTarget::Remote),
            Some(&VuStatus::NoLink)
        );
        // The telemetry store was never contacted.
        assert!(!controller.state().local_vu.has_real_data);
        assert!(!controller.state().remote_vu.has_real_data);
    }

    #[test]
    fn test_duplicate_diagnostics_are_suppressed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, mut handles) = test_controller(dir.path());
        controller.set_args("");

        controller.update_from_telemetry();
        controller.update_from_telemetry();

        let log_lines: Vec<_> = std::iter::from_fn(|| handles.events.try_recv().ok())
            .filter(|event| matches!(event, ControllerEvent::Log(_)))
            .collect();
        // One transition per target, not one per poll.
        assert_eq!(log_lines.len(), 2);
    }

    #[test]
    fn test_set_args_updates_saved_role_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());

        controller.set_args("10.2.2.2 regie showlink rx -a alsa -d hw:0,0");
        let saved = controller.saved_config();
        assert_eq!(saved.active_role, Role::Rx);
        assert_eq!(saved.rx_config_host, "10.2.2.2");
        assert_eq!(saved.rx_alsa_device, "hw:0,0");
        // The transmitter side keeps its defaults.
        assert_eq!(saved.tx_config_host, "127.0.0.1");
        assert_eq!(controller.link().role, Some(Role::Rx));
    }

    #[test]
    fn test_set_auto_start_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        assert!(controller.auto_start_enabled());

        controller.set_auto_start(false);
        assert!(!controller.auto_start_enabled());

        let mut fresh = ConfigStore::at(dir.path());
        assert!(!fresh.load().auto_start);
    }

    #[test]
    fn test_animate_decays_monotonically_to_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        controller.state.local_vu.left = 0.5;
        controller.state.local_vu.right = 0.3;
        controller.state.receiver_level = 0.8;

        let mut previous = (0.5f32, 0.8f32);
        for _ in 0..100 {
            controller.animate();
            let current = (
                controller.state().local_vu.left,
                controller.state().receiver_level,
            );
            assert!(current.0 <= previous.0);
            assert!(current.1 <= previous.1);
            previous = current;
        }
        assert_eq!(controller.state().local_vu.left, 0.0);
        assert_eq!(controller.state().receiver_level, 0.0);
    }

    #[test]
    fn test_animate_paces_by_peak_level() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());

        controller.state.local_vu.left = 0.9;
        controller.state.local_vu.has_real_data = true;
        assert_eq!(controller.animate(), Duration::from_millis(40));

        controller.state.local_vu.left = 0.0;
        controller.state.local_vu.has_real_data = false;
        controller.state.receiver_level = 0.0;
        assert_eq!(controller.animate(), Duration::from_millis(80));
    }

    #[test]
    fn test_apply_sample_feeds_the_right_meter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        let sample = VuSample {
            left_db: -20.0,
            right_db: -10.0,
            timestamp: None,
            is_stale: false,
        };

        controller.apply_sample(VuTarget::Local, &sample);
        assert!(controller.state().local_vu.has_real_data);
        assert!(!controller.state().remote_vu.has_real_data);
        assert!(controller.state().local_vu.left > 0.0);
        assert!(controller.state().local_vu.left <= 1.0);
        assert!(controller.state().local_vu.right > 0.0);

        controller.apply_sample(VuTarget::Remote, &sample);
        assert!(controller.state().remote_vu.has_real_data);
    }

    #[test]
    fn test_receiver_level_follows_live_remote_average() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        controller.state.remote_vu.left = 0.4;
        controller.state.remote_vu.right = 0.8;
        controller.state.remote_vu.has_real_data = true;

        controller.animate();
        assert_eq!(controller.state().receiver_level, 0.6);
    }

    #[test]
    fn test_host_change_disconnects_telemetry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut controller, _handles) = test_controller(dir.path());
        // Not connected yet, so this only exercises the reset path.
        controller.set_args("10.9.9.9 emetteur transmission tx 10.9.9.10");
        assert_eq!(
            controller.link().config_host.as_deref(),
            Some("10.9.9.9")
        );
        assert!(!controller.state().local_vu.has_real_data);
    }
}
