// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Durable operator settings covering both link roles.

use super::link::{tokenize, Role};
use serde::{Deserialize, Serialize};

/// The persisted settings record.
///
/// Both roles keep their full field sets at all times; only the active
/// role's fields feed the live link, and switching roles never loses the
/// other side's input. Unknown or missing fields deserialize to defaults
/// so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedConfig {
    /// Which role's fields build the current launch line.
    pub active_role: Role,
    /// Reserved for a future tunnel integration. Never read today.
    pub vpn_enabled: bool,

    // Transmitter side
    pub tx_config_host: String,
    pub tx_node_id: String,
    pub tx_link_name: String,
    pub tx_peer_address: String,
    pub tx_encoding: String,
    pub tx_sample_rate: String,
    pub tx_jitter_buffer_ms: String,
    pub tx_audio_backend: String,

    // Receiver side
    pub rx_config_host: String,
    pub rx_node_id: String,
    pub rx_link_name: String,
    pub rx_audio_backend: String,
    pub rx_alsa_device: String,

    /// Start the worker automatically shortly after launch.
    pub auto_start: bool,
}

impl Default for SavedConfig {
    fn default() -> Self {
        Self {
            active_role: Role::Tx,
            vpn_enabled: false,
            tx_config_host: "127.0.0.1".to_string(),
            tx_node_id: "emetteur".to_string(),
            tx_link_name: "transmission".to_string(),
            tx_peer_address: "192.168.1.17".to_string(),
            tx_encoding: "pcm".to_string(),
            tx_sample_rate: "48000".to_string(),
            tx_jitter_buffer_ms: "60".to_string(),
            tx_audio_backend: "auto".to_string(),
            rx_config_host: "192.168.1.15".to_string(),
            rx_node_id: "recepteur".to_string(),
            rx_link_name: "transmission".to_string(),
            rx_audio_backend: "auto".to_string(),
            rx_alsa_device: String::new(),
            auto_start: true,
        }
    }
}

impl SavedConfig {
    /// Launch arguments for the active role.
    pub fn current_args(&self) -> String {
        match self.active_role {
            Role::Tx => self.tx_args(),
            Role::Rx => self.rx_args(),
        }
    }

    /// Build the transmitter launch line.
    pub fn tx_args(&self) -> String {
        let mut parts = vec![
            self.tx_config_host.clone(),
            self.tx_node_id.clone(),
            self.tx_link_name.clone(),
            "tx".to_string(),
            self.tx_peer_address.clone(),
        ];
        for (flag, value) in [
            ("-e", &self.tx_encoding),
            ("-r", &self.tx_sample_rate),
            ("-j", &self.tx_jitter_buffer_ms),
            ("-a", &self.tx_audio_backend),
        ] {
            if !value.is_empty() {
                parts.push(flag.to_string());
                parts.push(value.clone());
            }
        }
        parts.join(" ")
    }

    /// Build the receiver launch line.
    pub fn rx_args(&self) -> String {
        let mut parts = vec![
            self.rx_config_host.clone(),
            self.rx_node_id.clone(),
            self.rx_link_name.clone(),
            "rx".to_string(),
        ];
        for (flag, value) in [
            ("-a", &self.rx_audio_backend),
            ("-d", &self.rx_alsa_device),
        ] {
            if !value.is_empty() {
                parts.push(flag.to_string());
                parts.push(value.clone());
            }
        }
        parts.join(" ")
    }

    /// Re-derive one role's fields from a launch-argument string.
    ///
    /// Only tokens that are actually present overwrite stored values, and
    /// the other role's fields are never touched. A string without the
    /// four positional slots only switches the active role.
    pub fn update_from_args(&mut self, args: &str, role: Role) {
        self.active_role = role;

        let parts = tokenize(args);
        if parts.len() < 4 {
            return;
        }

        match role {
            Role::Tx => {
                self.tx_config_host = parts[0].clone();
                self.tx_node_id = parts[1].clone();
                self.tx_link_name = parts[2].clone();
                if let Some(peer) = parts.get(4).filter(|t| !t.starts_with('-')) {
                    self.tx_peer_address = peer.clone();
                }
                let mut i = 5;
                while i < parts.len() {
                    let has_value = i + 1 < parts.len();
                    match parts[i].as_str() {
                        "-e" if has_value => {
                            self.tx_encoding = parts[i + 1].clone();
                            i += 2;
                        }
                        "-r" if has_value => {
                            self.tx_sample_rate = parts[i + 1].clone();
                            i += 2;
                        }
                        "-j" if has_value => {
                            self.tx_jitter_buffer_ms = parts[i + 1].clone();
                            i += 2;
                        }
                        "-a" if has_value => {
                            self.tx_audio_backend = parts[i + 1].clone();
                            i += 2;
                        }
                        _ => i += 1,
                    }
                }
            }
            Role::Rx => {
                self.rx_config_host = parts[0].clone();
                self.rx_node_id = parts[1].clone();
                self.rx_link_name = parts[2].clone();
                let mut i = 4;
                while i < parts.len() {
                    let has_value = i + 1 < parts.len();
                    match parts[i].as_str() {
                        "-a" if has_value => {
                            self.rx_audio_backend = parts[i + 1].clone();
                            i += 2;
                        }
                        "-d" if has_value => {
                            self.rx_alsa_device = parts[i + 1].clone();
                            i += 2;
                        }
                        _ => i += 1,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tx_args() {
        let config = SavedConfig::default();
        assert_eq!(
            config.current_args(),
            "127.0.0.1 emetteur transmission tx 192.168.1.17 -e pcm -r 48000 -j 60 -a auto"
        );
    }

    #[test]
    fn test_default_rx_args() {
        let mut config = SavedConfig::default();
        config.active_role = Role::Rx;
        assert_eq!(config.current_args(), "192.168.1.15 recepteur transmission rx -a auto");
    }

    #[test]
    fn test_update_tx_preserves_rx() {
        let mut config = SavedConfig::default();
        config.update_from_args("10.1.1.1 studio showlink tx 10.1.1.2 -e opus -r 44100", Role::Tx);
        assert_eq!(config.active_role, Role::Tx);
        assert_eq!(config.tx_config_host, "10.1.1.1");
        assert_eq!(config.tx_node_id, "studio");
        assert_eq!(config.tx_link_name, "showlink");
        assert_eq!(config.tx_peer_address, "10.1.1.2");
        assert_eq!(config.tx_encoding, "opus");
        assert_eq!(config.tx_sample_rate, "44100");
        // Flags not present keep their previous values.
        assert_eq!(config.tx_jitter_buffer_ms, "60");
        // The receiver side is untouched.
        assert_eq!(config.rx_config_host, "192.168.1.15");
        assert_eq!(config.rx_node_id, "recepteur");
    }

    #[test]
    fn test_update_rx_reads_device() {
        let mut config = SavedConfig::default();
        config.update_from_args("10.2.2.2 regie showlink rx -a alsa -d hw:0,0", Role::Rx);
        assert_eq!(config.active_role, Role::Rx);
        assert_eq!(config.rx_config_host, "10.2.2.2");
        assert_eq!(config.rx_audio_backend, "alsa");
        assert_eq!(config.rx_alsa_device, "hw:0,0");
        assert_eq!(config.tx_config_host, "127.0.0.1");
    }

    #[test]
    fn test_short_string_only_switches_role() {
        let mut config = SavedConfig::default();
        config.update_from_args("10.9.9.9 lonely", Role::Rx);
        assert_eq!(config.active_role, Role::Rx);
        assert_eq!(config.rx_config_host, "192.168.1.15");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = SavedConfig::default();
        config.active_role = Role::Rx;
        config.rx_alsa_device = "hw:1,0".to_string();
        let text = toml::to_string_pretty(&config).expect("serialize");
        let back: SavedConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_file_loads_with_defaults() {
        let back: SavedConfig = toml::from_str("active_role = \"rx\"\n").expect("deserialize");
        assert_eq!(back.active_role, Role::Rx);
        assert_eq!(back.tx_encoding, "pcm");
        assert!(back.auto_start);
    }
}
