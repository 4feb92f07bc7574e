// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Runtime state owned by the controller.

use std::collections::HashMap;

/// Decay multiplier applied per animation frame without fresh data.
pub const DECAY_FACTOR: f32 = 0.85;

/// Below this a decaying level snaps to exactly zero, so the fade ends in
/// a bounded number of frames instead of an asymptotic tail.
pub const DECAY_FLOOR: f32 = 0.01;

/// Stereo level pair for one meter.
///
/// When `has_real_data` is false the pair only ever decays toward zero;
/// it never snaps, so a lost signal fades instead of popping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VuState {
    pub left: f32,
    pub right: f32,
    pub has_real_data: bool,
}

impl VuState {
    /// One decay step with the standard factor and floor.
    pub fn decay(&mut self) {
        self.decay_with(DECAY_FACTOR, DECAY_FLOOR);
    }

    /// One decay step. Values below `floor` snap to 0.0.
    pub fn decay_with(&mut self, factor: f32, floor: f32) {
        self.left *= factor;
        self.right *= factor;
        if self.left < floor {
            self.left = 0.0;
        }
        if self.right < floor {
            self.right = 0.0;
        }
    }

    pub fn average(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    pub fn max_level(&self) -> f32 {
        self.left.max(self.right)
    }
}

/// Which meter a telemetry sample feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VuTarget {
    /// The locally originated signal (big input meter).
    Local,
    /// The counterpart's signal (receiver bar).
    Remote,
}

impl VuTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            VuTarget::Local => "local",
            VuTarget::Remote => "remote",
        }
    }
}

/// Why a meter is, or is not, showing live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuStatus {
    /// Fresh numeric sample applied.
    Ok,
    /// No link name configured; telemetry is not even consulted.
    NoLink,
    /// Telemetry store unreachable.
    Blocked,
    /// No record published for this role.
    NoData,
    /// A record exists but its timestamp is older than the threshold.
    Stale,
    /// A record exists but its level fields are not numeric.
    InvalidData,
}

impl VuStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VuStatus::Ok => "ok",
            VuStatus::NoLink => "no-link",
            VuStatus::Blocked => "blocked",
            VuStatus::NoData => "no-data",
            VuStatus::Stale => "stale",
            VuStatus::InvalidData => "invalid-data",
        }
    }

    pub fn is_ok(self) -> bool {
        self == VuStatus::Ok
    }
}

/// Root runtime state. Mutated only under the controller's lock.
#[derive(Debug, Default)]
pub struct AppState {
    /// Local (transmitted signal) meter.
    pub local_vu: VuState,
    /// Remote (received signal) meter.
    pub remote_vu: VuState,
    /// Derived receiver bar value.
    pub receiver_level: f32,

    /// Redis service liveness, from the last status poll.
    pub redis_running: bool,
    /// Worker process liveness, from the last status poll.
    pub worker_running: bool,

    /// Restart lockout in effect.
    pub cooldown_active: bool,
    /// Whole seconds left in the lockout.
    pub cooldown_remaining: u32,

    /// Last reported diagnostic per meter, used to suppress duplicate
    /// log lines.
    pub vu_diag: HashMap<VuTarget, VuStatus>,
}
