//! Configuration loading and validation.
//!
//! Both roles share one file format; the `[server]` or `[client]` section is
//! required depending on which role the process is started in.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::constants::{
    DEFAULT_MTU, DEFAULT_PADDING_TARGET, HEARTBEAT_INTERVAL, LIVENESS_TIMEOUT,
    REPLAY_RETENTION_WINDOW, TIMEDIFF_TOLERANCE,
};
use super::error::TunnelError;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Pre-shared secret. Must be identical on both ends.
    pub secret: String,
    /// Virtual network addresses.
    pub ip: IpConfig,
    /// Tunnel behaviour knobs, all optional.
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Listening endpoints, required when running as a server.
    pub server: Option<ServerEndpoints>,
    /// Dial targets, required when running as a client.
    pub client: Option<ClientEndpoints>,
}

/// Addresses assigned to the two ends of the virtual link.
#[derive(Debug, Clone, Deserialize)]
pub struct IpConfig {
    /// Address of the server end.
    pub server: String,
    /// Address of the client end.
    pub client: String,
    /// Netmask for the point-to-point link.
    #[serde(default = "default_netmask")]
    pub netmask: String,
    /// MTU of the virtual device.
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

fn default_netmask() -> String {
    "255.255.255.0".to_string()
}

fn default_mtu() -> u16 {
    DEFAULT_MTU
}

/// Optional tunnel knobs, in file units (seconds / bytes).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TunnelConfig {
    /// Target size for padded records.
    pub padding_target: Option<usize>,
    /// Seconds between outgoing heartbeats.
    pub heartbeat_interval_secs: Option<u64>,
    /// Seconds of heartbeat silence before a session is declared dead.
    pub liveness_timeout_secs: Option<u64>,
    /// Retention window for replay nonces, in seconds.
    pub replay_window_secs: Option<u64>,
}

/// A single listen endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Host or interface address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

/// Server-side listening endpoints, per transport kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEndpoints {
    /// WebSocket listener.
    pub ws: Option<EndpointConfig>,
    /// Plain TCP listener.
    pub tcp: Option<EndpointConfig>,
}

/// Client-side dial targets, per transport kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEndpoints {
    /// WebSocket URIs, e.g. `ws://203.0.113.5:8765`.
    #[serde(default)]
    pub ws: Vec<String>,
    /// TCP addresses, e.g. `203.0.113.5:8766`.
    #[serde(default)]
    pub tcp: Vec<String>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TunnelError> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| TunnelError::Config(format!("cannot read config file: {e}")))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("cannot parse config file: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TunnelError> {
        if self.secret.is_empty() {
            return Err(TunnelError::Config("secret must not be empty".into()));
        }
        if let Some(target) = self.tunnel.padding_target {
            if target <= super::constants::PADDING_TOTAL_OVERHEAD {
                return Err(TunnelError::Config(format!(
                    "padding_target must exceed the {} byte record overhead",
                    super::constants::PADDING_TOTAL_OVERHEAD
                )));
            }
        }
        if let Some(server) = &self.server {
            if server.ws.is_none() && server.tcp.is_none() {
                return Err(TunnelError::Config(
                    "[server] section has no ws or tcp endpoint".into(),
                ));
            }
        }
        if let Some(client) = &self.client {
            if client.ws.is_empty() && client.tcp.is_empty() {
                return Err(TunnelError::Config(
                    "[client] section has no ws or tcp targets".into(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the runtime tunnel settings, applying defaults.
    pub fn settings(&self) -> TunnelSettings {
        let t = &self.tunnel;
        TunnelSettings {
            padding_target: t.padding_target.unwrap_or(DEFAULT_PADDING_TARGET),
            heartbeat_interval: t
                .heartbeat_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(HEARTBEAT_INTERVAL),
            liveness_timeout: t
                .liveness_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(LIVENESS_TIMEOUT),
            replay_window: t
                .replay_window_secs
                .map(Duration::from_secs)
                .unwrap_or(REPLAY_RETENTION_WINDOW),
            timediff_tolerance: TIMEDIFF_TOLERANCE,
        }
    }
}

/// Resolved runtime settings shared by every session of a tunnel.
#[derive(Debug, Clone, Copy)]
pub struct TunnelSettings {
    /// Target size for padded records.
    pub padding_target: usize,
    /// Interval between outgoing heartbeats.
    pub heartbeat_interval: Duration,
    /// Heartbeat silence before a session is declared dead.
    pub liveness_timeout: Duration,
    /// Retention window for replay nonces.
    pub replay_window: Duration,
    /// Maximum tolerated peer clock skew.
    pub timediff_tolerance: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            padding_target: DEFAULT_PADDING_TARGET,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness_timeout: LIVENESS_TIMEOUT,
            replay_window: REPLAY_RETENTION_WINDOW,
            timediff_tolerance: TIMEDIFF_TOLERANCE,
        }
    }
}

/// A complete commented sample configuration, printed by `--example`.
pub const EXAMPLE_CONFIG: &str = r#"# Example emberlink configuration
# -------------------------------
# Save as e.g. tunnel.toml and start with:
#   emberlink --client tunnel.toml   # on the client machine
#   emberlink --server tunnel.toml   # on the server machine

# Pre-shared secret authorizing access to the virtual network.
# Must be identical on both ends and kept private.
secret = "example-key"

# Addresses assigned to the two ends of the virtual link.
[ip]
server = "10.1.0.1"
client = "10.1.0.2"
# netmask = "255.255.255.0"
# mtu = 1500

# Optional tunnel knobs (defaults shown).
# [tunnel]
# padding_target = 4096
# heartbeat_interval_secs = 5
# liveness_timeout_secs = 30
# replay_window_secs = 300

# The server listens on one or both transports.
[server.ws]
host = "0.0.0.0"
port = 8765

# [server.tcp]
# host = "0.0.0.0"
# port = 8766

# The client dials one or more targets; each becomes an independent
# carrier connection. URIs may point at reverse proxies.
[client]
ws = [
    "ws://203.0.113.5:8765",
    # "wss://example.org/tunnel",
]
# tcp = ["203.0.113.5:8766"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.secret, "example-key");
        assert_eq!(config.ip.server, "10.1.0.1");
        assert_eq!(config.ip.mtu, DEFAULT_MTU);
        assert!(config.server.as_ref().unwrap().ws.is_some());
        assert_eq!(config.client.as_ref().unwrap().ws.len(), 1);
    }

    #[test]
    fn settings_defaults() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        let settings = config.settings();
        assert_eq!(settings.padding_target, DEFAULT_PADDING_TARGET);
        assert_eq!(settings.heartbeat_interval, HEARTBEAT_INTERVAL);
    }

    #[test]
    fn rejects_empty_secret() {
        let toml = r#"
            secret = ""
            [ip]
            server = "10.1.0.1"
            client = "10.1.0.2"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_padding_target() {
        let toml = r#"
            secret = "k"
            [ip]
            server = "10.1.0.1"
            client = "10.1.0.2"
            [tunnel]
            padding_target = 32
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
