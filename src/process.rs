// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External process and service control.
//!
//! Three collaborators live here: the systemd-backed manager for the
//! Redis service, the worker process manager with graceful stop and line
//! streaming, and the startup requirements checker. All operations report
//! failure as [`ControlResult`] values; nothing in this module panics at
//! the caller.

#![allow(dead_code)]

use crate::config::link::tokenize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Grace period between the terminate request and the forced kill.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of a control operation, shaped for direct presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResult {
    pub success: bool,
    pub message: String,
}

impl ControlResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Observed state of the Redis service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    /// The unit does not exist on this machine. Valid, not an error.
    NotInstalled,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Running => "Running",
            ServiceStatus::Stopped => "Stopped",
            ServiceStatus::NotInstalled => "NotInstalled",
            ServiceStatus::Unknown => "Unknown",
        }
    }
}

// ==================== Redis Service Manager ====================

/// Controls the Redis service through `systemctl --user`.
///
/// Every operation is a bounded-time systemctl round trip; failures come
/// back as statuses or `ControlResult`s, never as panics.
pub struct RedisServiceManager {
    unit: String,
}

impl RedisServiceManager {
    pub const DEFAULT_UNIT: &'static str = "redis-server.service";

    pub fn new() -> Self {
        Self::with_unit(Self::DEFAULT_UNIT)
    }

    pub fn with_unit(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    /// Query the unit state. Never errors; an unreadable answer is Unknown.
    pub async fn get_status(&self) -> ServiceStatus {
        let output = Command::new("systemctl")
            .args(["--user", "show", self.unit.as_str(), "-p", "LoadState,ActiveState"])
            .output()
            .await;
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to query service {}: {e}", self.unit);
                return ServiceStatus::Unknown;
            }
        };
        parse_show_output(&String::from_utf8_lossy(&output.stdout))
    }

    pub async fn start(&self) -> ControlResult {
        self.control("start").await
    }

    pub async fn stop(&self) -> ControlResult {
        self.control("stop").await
    }

    async fn control(&self, verb: &str) -> ControlResult {
        let output = Command::new("systemctl")
            .args(["--user", verb, self.unit.as_str()])
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                info!("systemctl {verb} {} succeeded", self.unit);
                ControlResult::ok(format!("Redis service {verb} requested"))
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                error!("systemctl {verb} {} failed: {stderr}", self.unit);
                ControlResult::fail(format!("Failed to {verb} Redis service: {stderr}"))
            }
            Err(e) => {
                error!("Failed to run systemctl: {e}");
                ControlResult::fail(format!("Failed to run systemctl: {e}"))
            }
        }
    }
}

impl Default for RedisServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Map `systemctl show -p LoadState,ActiveState` output to a status.
fn parse_show_output(stdout: &str) -> ServiceStatus {
    let mut load_state = "";
    let mut active_state = "";
    for line in stdout.lines() {
        if let Some(value) = line.strip_prefix("LoadState=") {
            load_state = value.trim();
        } else if let Some(value) = line.strip_prefix("ActiveState=") {
            active_state = value.trim();
        }
    }
    match (load_state, active_state) {
        ("not-found", _) => ServiceStatus::NotInstalled,
        (_, "active") | (_, "activating") => ServiceStatus::Running,
        ("", "") => ServiceStatus::Unknown,
        _ => ServiceStatus::Stopped,
    }
}

// ==================== Worker Process Manager ====================

/// Fixed launch recipe for the link worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Interpreter or runtime executable.
    pub runtime: PathBuf,
    /// Worker entry point handed to the runtime.
    pub entry: PathBuf,
    /// Alternate launch script for when the direct path is unusable.
    pub fallback: Option<PathBuf>,
    /// Working directory for the spawned process.
    pub working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    /// Probe the locations the installers lay the worker out in: a venv
    /// beside the running executable first, then one under the current
    /// directory.
    pub fn discover() -> Self {
        let mut base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if let Ok(exe) = std::env::current_exe() {
            if let Some(parent) = exe.parent() {
                if parent.join(".venv").is_dir() {
                    base = parent.to_path_buf();
                }
            }
        }

        let venv = base.join(".venv").join("bin");
        let fallback = base.join("scripts").join("start_worker.sh");
        Self {
            runtime: venv.join("python3"),
            entry: venv.join("oblink-worker"),
            fallback: fallback.exists().then_some(fallback),
            working_dir: Some(base),
        }
    }
}

/// Owns the worker process handle; the only component allowed to signal it.
pub struct WorkerManager {
    command: WorkerCommand,
    child: Option<Child>,
}

impl WorkerManager {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            child: None,
        }
    }

    /// Liveness comes from polling the handle, not from a cached flag.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) | Err(_) => {
                    self.child = None;
                    false
                }
            },
            None => false,
        }
    }

    /// Whether a start attempt could succeed, with the blocking reason.
    pub fn can_start(&self) -> (bool, String) {
        if !self.command.runtime.exists() {
            return (
                false,
                format!("Worker runtime not found at {}", self.command.runtime.display()),
            );
        }
        if !self.command.entry.exists() {
            if self.fallback_path().is_some() {
                return (true, String::new());
            }
            return (
                false,
                format!("Worker entry point not found at {}", self.command.entry.display()),
            );
        }
        (true, String::new())
    }

    fn fallback_path(&self) -> Option<&Path> {
        self.command
            .fallback
            .as_deref()
            .filter(|path| path.exists())
    }

    /// Spawn the worker and stream its combined output as lines.
    ///
    /// Refuses (without side effects) when a worker is already running or
    /// the argument string is empty. Each output pipe gets a reader task
    /// that only forwards lines into `lines`; consumers decide what to do
    /// with them.
    pub fn start(
        &mut self,
        args: &str,
        lines: UnboundedSender<String>,
        use_fallback: bool,
    ) -> ControlResult {
        if self.is_running() {
            return ControlResult::fail("Worker already running");
        }
        if args.trim().is_empty() {
            return ControlResult::fail("Empty worker arguments");
        }

        let (mut command, method) = match (use_fallback, self.fallback_path()) {
            (true, Some(script)) => {
                let mut command = Command::new("sh");
                command.arg(script).arg(args);
                (command, "fallback script")
            }
            _ => {
                let mut command = Command::new(&self.command.runtime);
                command.arg(&self.command.entry).args(tokenize(args));
                (command, "direct runtime")
            }
        };
        if let Some(dir) = &self.command.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start worker: {e}");
                return ControlResult::fail(format!("Failed to start worker: {e}"));
            }
        };

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, lines.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, lines);
        }

        self.child = Some(child);
        info!("Started worker ({method})");
        ControlResult::ok(format!("Started worker ({method})"))
    }

    /// Stop the worker: terminate, wait up to `timeout`, then kill.
    ///
    /// The handle is cleared on every path, so `is_running` never lies
    /// afterwards.
    pub async fn stop(&mut self, timeout: Duration) -> ControlResult {
        if !self.is_running() {
            return ControlResult::fail("Worker not running");
        }
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return ControlResult::fail("Worker not running"),
        };

        terminate(&mut child);
        info!("Sent terminate signal to worker");

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Worker terminated gracefully ({status})");
                ControlResult::ok("Worker stopped")
            }
            Ok(Err(e)) => {
                error!("Error waiting for worker: {e}");
                ControlResult::fail(format!("Error waiting for worker: {e}"))
            }
            Err(_) => {
                warn!("Worker force killed after {}s timeout", timeout.as_secs());
                match child.kill().await {
                    Ok(()) => ControlResult::ok("Worker stopped"),
                    Err(e) => {
                        error!("Failed to kill worker: {e}");
                        ControlResult::fail(format!("Failed to kill worker: {e}"))
                    }
                }
            }
        }
    }
}

/// Ask the process to exit: SIGTERM where available, hard kill otherwise.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            return;
        }
    }
    let _ = child.start_kill();
}

/// Forward each output line into the channel until the pipe closes.
fn spawn_line_reader<R>(pipe: R, lines: UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if lines.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Worker output stream ended: {e}");
                    break;
                }
            }
        }
    });
}

// ==================== Requirements Checker ====================

/// Verifies the pieces a broadcast needs before the operator hits start.
pub struct RequirementsChecker {
    worker: WorkerCommand,
    audio_tool: PathBuf,
    redis: RedisServiceManager,
}

impl RequirementsChecker {
    pub fn new(worker: WorkerCommand, audio_tool: PathBuf, redis_unit: &str) -> Self {
        Self {
            worker,
            audio_tool,
            redis: RedisServiceManager::with_unit(redis_unit),
        }
    }

    /// One human-readable status line per dependency.
    pub async fn check_all(&self) -> Vec<String> {
        let mut messages = Vec::new();

        if self.worker.runtime.exists() {
            messages.push("worker runtime: OK".to_string());
        } else {
            messages.push(format!(
                "worker runtime not found at {}",
                self.worker.runtime.display()
            ));
        }

        let has_fallback = self
            .worker
            .fallback
            .as_deref()
            .map(Path::exists)
            .unwrap_or(false);
        if self.worker.entry.exists() {
            messages.push("worker entry point: OK".to_string());
        } else if has_fallback {
            messages.push("worker entry point: MISSING (fallback available)".to_string());
        } else {
            messages.push(format!(
                "worker entry point not found at {}",
                self.worker.entry.display()
            ));
        }

        if self.audio_tool.exists() {
            messages.push("audio toolchain: OK".to_string());
        } else {
            messages.push(format!(
                "audio toolchain not found at {}",
                self.audio_tool.display()
            ));
        }

        let status = self.redis.get_status().await;
        match status {
            ServiceStatus::NotInstalled => {
                messages.push("Redis service: NOT INSTALLED".to_string());
            }
            status => messages.push(format!("Redis service: {}", status.as_str())),
        }

        messages
    }

    pub async fn is_redis_running(&self) -> bool {
        self.redis.get_status().await == ServiceStatus::Running
    }
}
