// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Launch-argument model for one link.
//!
//! The worker takes a single argument string of the form
//! `<config-host> <node-id> <link-name> <tx|rx> [<peer-ip>]` followed by
//! optional `-e/-r/-j/-a/-d` flag pairs. Parsing is permissive by
//! contract: malformed input yields missing fields, never an error, and
//! callers check field presence.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// Link role: transmitter or receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tx,
    Rx,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tx => "tx",
            Role::Rx => "rx",
        }
    }

    pub fn parse(token: &str) -> Option<Role> {
        match token {
            "tx" => Some(Role::Tx),
            "rx" => Some(Role::Rx),
            _ => None,
        }
    }
}

/// Structured view of a worker launch-argument string.
///
/// Never mutated in place; a configuration change produces a new parse.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub config_host: Option<String>,
    pub node_id: Option<String>,
    pub link_name: Option<String>,
    pub role: Option<Role>,
    /// Counterpart address; only meaningful for `tx`.
    pub peer_address: Option<String>,
    pub encoding: String,
    pub sample_rate: String,
    pub jitter_buffer_ms: String,
    pub audio_backend: String,
    /// ALSA output device; only meaningful for `rx`.
    pub alsa_device: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            config_host: None,
            node_id: None,
            link_name: None,
            role: None,
            peer_address: None,
            encoding: "pcm".to_string(),
            sample_rate: String::new(),
            jitter_buffer_ms: String::new(),
            audio_backend: "auto".to_string(),
            alsa_device: String::new(),
        }
    }
}

/// Shell-like tokenization, tolerant of malformed quoting.
///
/// Broken quoting falls back to a naive whitespace split rather than
/// failing, matching the permissive-parse contract.
pub(crate) fn tokenize(args: &str) -> Vec<String> {
    shell_words::split(args)
        .unwrap_or_else(|_| args.split_whitespace().map(str::to_string).collect())
}

impl LinkConfig {
    /// Parse a launch-argument string. Never fails.
    pub fn from_args(args: &str) -> LinkConfig {
        let parts = tokenize(args);
        let mut config = LinkConfig::default();

        config.config_host = parts.first().cloned();
        config.node_id = parts.get(1).cloned();
        config.link_name = parts.get(2).cloned();
        config.role = parts.get(3).and_then(|t| Role::parse(t));
        // A fifth positional token is the peer only when it is not a flag.
        if let Some(token) = parts.get(4) {
            if !token.starts_with('-') {
                config.peer_address = Some(token.clone());
            }
        }

        let mut i = if config.peer_address.is_some() { 5 } else { 4 };
        while i < parts.len() {
            let has_value = i + 1 < parts.len();
            match parts[i].as_str() {
                "-e" if has_value => {
                    config.encoding = parts[i + 1].clone();
                    i += 2;
                }
                "-r" if has_value => {
                    config.sample_rate = parts[i + 1].clone();
                    i += 2;
                }
                "-j" if has_value => {
                    config.jitter_buffer_ms = parts[i + 1].clone();
                    i += 2;
                }
                "-a" if has_value => {
                    config.audio_backend = parts[i + 1].clone();
                    i += 2;
                }
                "-d" if has_value => {
                    config.alsa_device = parts[i + 1].clone();
                    i += 2;
                }
                // Unrecognized or argument-less flags are skipped.
                _ => i += 1,
            }
        }

        config
    }

    /// Serialize back to the canonical argument string.
    ///
    /// Positionals first (peer only for `tx`), then non-empty flags in
    /// fixed order. Empty optional fields are omitted entirely.
    pub fn to_args(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(host) = &self.config_host {
            parts.push(host.clone());
        }
        if let Some(node) = &self.node_id {
            parts.push(node.clone());
        }
        if let Some(link) = &self.link_name {
            parts.push(link.clone());
        }
        if let Some(role) = self.role {
            parts.push(role.as_str().to_string());
            if role == Role::Tx {
                if let Some(peer) = &self.peer_address {
                    parts.push(peer.clone());
                }
            }
        }

        for (flag, value) in [
            ("-e", &self.encoding),
            ("-r", &self.sample_rate),
            ("-j", &self.jitter_buffer_ms),
            ("-a", &self.audio_backend),
            ("-d", &self.alsa_device),
        ] {
            if !value.is_empty() {
                parts.push(flag.to_string());
                parts.push(value.clone());
            }
        }

        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX_ARGS: &str =
        "127.0.0.1 emetteur transmission tx 192.168.1.17 -e pcm -r 48000 -j 60 -a auto";

    #[test]
    fn test_parse_tx_args() {
        let config = LinkConfig::from_args(TX_ARGS);
        assert_eq!(config.config_host.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.node_id.as_deref(), Some("emetteur"));
        assert_eq!(config.link_name.as_deref(), Some("transmission"));
        assert_eq!(config.role, Some(Role::Tx));
        assert_eq!(config.peer_address.as_deref(), Some("192.168.1.17"));
        assert_eq!(config.encoding, "pcm");
        assert_eq!(config.sample_rate, "48000");
        assert_eq!(config.jitter_buffer_ms, "60");
        assert_eq!(config.audio_backend, "auto");
    }

    #[test]
    fn test_tx_round_trip_is_exact() {
        let config = LinkConfig::from_args(TX_ARGS);
        assert_eq!(config.to_args(), TX_ARGS);
        assert_eq!(LinkConfig::from_args(&config.to_args()), config);
    }

    #[test]
    fn test_rx_round_trip_with_device() {
        let args = "192.168.1.15 recepteur transmission rx -a alsa -d hw:1,0";
        let config = LinkConfig::from_args(args);
        assert_eq!(config.role, Some(Role::Rx));
        assert_eq!(config.peer_address, None);
        assert_eq!(config.alsa_device, "hw:1,0");
        // Defaulted encoding is emitted canonically before the parsed flags.
        let round = LinkConfig::from_args(&config.to_args());
        assert_eq!(round, config);
    }

    #[test]
    fn test_fifth_flag_token_is_not_a_peer() {
        let config = LinkConfig::from_args("host node link tx -e opus");
        assert_eq!(config.peer_address, None);
        assert_eq!(config.encoding, "opus");
    }

    #[test]
    fn test_unknown_and_bare_flags_are_skipped() {
        let config = LinkConfig::from_args("host node link rx -x 99 -a jack -d");
        assert_eq!(config.audio_backend, "jack");
        assert_eq!(config.alsa_device, "");
    }

    #[test]
    fn test_malformed_quoting_falls_back() {
        let config = LinkConfig::from_args("host node link tx \"unterminated");
        assert_eq!(config.role, Some(Role::Tx));
        assert_eq!(config.peer_address.as_deref(), Some("\"unterminated"));
    }

    #[test]
    fn test_quoted_device_value() {
        let config = LinkConfig::from_args("host node link rx -d 'front speakers'");
        assert_eq!(config.alsa_device, "front speakers");
    }

    #[test]
    fn test_empty_and_short_input() {
        let config = LinkConfig::from_args("");
        assert_eq!(config.config_host, None);
        assert_eq!(config.role, None);

        let config = LinkConfig::from_args("10.0.0.1 studio");
        assert_eq!(config.config_host.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.link_name, None);
    }

    #[test]
    fn test_peer_omitted_for_rx() {
        let mut config = LinkConfig::from_args("host node link rx");
        config.peer_address = Some("10.0.0.9".to_string());
        assert!(!config.to_args().contains("10.0.0.9"));
    }
}
