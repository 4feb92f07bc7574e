// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Redis telemetry client for per-role VU samples.
//!
//! The worker publishes one hash per link and role under
//! `telemetry:<link>:level:<role>`. Producers vary in their field naming,
//! so reads go through a prioritized list of synonyms with a last-resort
//! numeric extraction from a combined field. A sample whose timestamp is
//! older than the threshold is flagged stale and shown as silence.

#![allow(dead_code)]

use crate::config::Role;
use redis::Commands;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Samples older than this many seconds are displayed as silence.
pub const STALE_THRESHOLD_SECS: f64 = 5.0;

/// Default Redis port when the config host carries none.
pub const DEFAULT_PORT: u16 = 6379;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// One VU reading published by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct VuSample {
    pub left_db: f32,
    pub right_db: f32,
    /// Producer timestamp in epoch seconds, when one was published.
    pub timestamp: Option<f64>,
    pub is_stale: bool,
}

impl VuSample {
    /// Sample age in seconds relative to `now`, if the producer stamped one.
    pub fn age_secs(&self, now: f64) -> Option<f64> {
        self.timestamp.map(|ts| now - ts)
    }
}

/// Outcome of one level fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelFetch {
    /// A parsed sample, possibly flagged stale.
    Sample(VuSample),
    /// No record published under the key.
    Missing,
    /// A record exists but its level fields are not numeric.
    Invalid,
}

/// Connection to the key-value store the worker publishes levels into.
///
/// Connecting is idempotent for an unchanged host and port; a different
/// endpoint tears the old connection down first. A failed attempt always
/// leaves the client fully disconnected.
pub struct TelemetryClient {
    conn: Option<redis::Connection>,
    host: Option<String>,
    port: u16,
}

impl Default for TelemetryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryClient {
    pub fn new() -> Self {
        Self {
            conn: None,
            host: None,
            port: DEFAULT_PORT,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Connect to `host:port`, verifying with a ping.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        if self.conn.is_some() && self.host.as_deref() == Some(host) && self.port == port {
            return true;
        }
        self.disconnect();

        let url = format!("redis://{host}:{port}/");
        let client = match redis::Client::open(url.as_str()) {
            Ok(client) => client,
            Err(e) => {
                warn!("Invalid telemetry endpoint {host}:{port}: {e}");
                return false;
            }
        };
        let mut conn = match client.get_connection_with_timeout(CONNECT_TIMEOUT) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to connect to telemetry store at {host}:{port}: {e}");
                return false;
            }
        };
        if let Err(e) = redis::cmd("PING").query::<String>(&mut conn) {
            warn!("Telemetry store at {host}:{port} did not answer ping: {e}");
            return false;
        }

        self.conn = Some(conn);
        self.host = Some(host.to_string());
        self.port = port;
        info!("Connected to telemetry store at {host}:{port}");
        true
    }

    pub fn disconnect(&mut self) {
        self.conn = None;
        self.host = None;
        self.port = DEFAULT_PORT;
    }

    /// Fetch the level record for one link and role.
    ///
    /// A transport error drops the connection so the next poll can retry
    /// the connect (and surface "blocked" if the store stays down).
    pub fn fetch_level(&mut self, link_name: &str, role: Role) -> LevelFetch {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return LevelFetch::Missing,
        };

        let key = level_key(link_name, role);
        let data: HashMap<String, String> = match conn.hgetall(&key) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to fetch {key}: {e}");
                self.disconnect();
                return LevelFetch::Missing;
            }
        };
        if data.is_empty() {
            return LevelFetch::Missing;
        }

        sample_from_hash(&data, epoch_now())
    }
}

/// Key the worker publishes a role's levels under.
pub fn level_key(link_name: &str, role: Role) -> String {
    format!("telemetry:{}:level:{}", link_name, role.as_str())
}

/// Build a sample from a raw hash, classifying staleness against `now`.
pub fn sample_from_hash(data: &HashMap<String, String>, now: f64) -> LevelFetch {
    let (left_db, right_db) = match parse_levels(data) {
        Some(pair) => pair,
        None => return LevelFetch::Invalid,
    };
    let timestamp = parse_timestamp(data);
    let is_stale = timestamp
        .map(|ts| now - ts > STALE_THRESHOLD_SECS)
        .unwrap_or(false);
    LevelFetch::Sample(VuSample {
        left_db,
        right_db,
        timestamp,
        is_stale,
    })
}

/// First non-empty value among the candidate field names, in order.
fn first_field<'a>(data: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| data.get(*name))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid pattern"))
}

/// Parse the left/right dB pair out of a level hash.
///
/// Tries per-channel synonyms first; if neither channel is present, falls
/// back to extracting numeric tokens from a combined field, taking the
/// last two (or duplicating a single one). A value that fails numeric
/// conversion poisons the whole pair.
fn parse_levels(data: &HashMap<String, String>) -> Option<(f32, f32)> {
    let mut left = first_field(data, &["left_db", "left", "l"]).map(str::to_string);
    let mut right = first_field(data, &["right_db", "right", "r"]).map(str::to_string);

    if left.is_none() && right.is_none() {
        if let Some(combined) = first_field(data, &["audio_level_db", "audio_level", "level"]) {
            let numbers: Vec<&str> = number_pattern()
                .find_iter(combined)
                .map(|m| m.as_str())
                .collect();
            match numbers.len() {
                0 => {}
                1 => {
                    left = Some(numbers[0].to_string());
                    right = left.clone();
                }
                n => {
                    left = Some(numbers[n - 2].to_string());
                    right = Some(numbers[n - 1].to_string());
                }
            }
        }
    }

    let left_db: f32 = left?.trim().parse().ok()?;
    let right_db: f32 = match right {
        Some(value) => value.trim().parse().ok()?,
        None => left_db,
    };
    Some((left_db, right_db))
}

fn parse_timestamp(data: &HashMap<String, String>) -> Option<f64> {
    first_field(data, &["updated_ts", "ts"]).and_then(|ts| ts.trim().parse().ok())
}

/// Split an optional `host:port` string; port defaults to [`DEFAULT_PORT`].
pub fn parse_host_port(raw: &str) -> (Option<String>, u16) {
    if raw.is_empty() {
        return (None, DEFAULT_PORT);
    }
    match raw.split_once(':') {
        Some((host, port)) => (
            Some(host.to_string()),
            port.parse().unwrap_or(DEFAULT_PORT),
        ),
        None => (Some(raw.to_string()), DEFAULT_PORT),
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
