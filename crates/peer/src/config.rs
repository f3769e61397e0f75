//! Peer Configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use whiteboard_sync::SyncConfig;

/// Peer configuration, loadable from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Network settings shared with every other peer
    pub sync: SyncConfig,
    /// Honour clear requests from other peers
    pub accept_clear: bool,
    /// Seconds between status lines (0 = never)
    pub status_interval_secs: u64,
}

impl PeerConfig {
    /// Load from `path`. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw =
            serde_json::to_string_pretty(self).expect("PeerConfig serialization should not fail");
        std::fs::write(path, raw).with_context(|| format!("writing config {}", path.display()))
    }

    /// Apply command line overrides on top of the file
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(group) = overrides.group {
            self.sync.multicast_group = group;
        }
        if let Some(interface) = overrides.interface {
            self.sync.interface = interface;
        }
        if let Some(ip) = overrides.advertise_ip {
            self.sync.advertise_ip = Some(ip);
        }
        if overrides.accept_clear {
            self.accept_clear = true;
        }
        if let Some(secs) = overrides.status_interval_secs {
            self.status_interval_secs = secs;
        }
    }
}

/// Command line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub group: Option<Ipv4Addr>,
    pub interface: Option<Ipv4Addr>,
    pub advertise_ip: Option<Ipv4Addr>,
    pub accept_clear: bool,
    pub status_interval_secs: Option<u64>,
}
