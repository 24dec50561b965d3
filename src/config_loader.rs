use std::fs::File;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::{error, warn};
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

// ---------- Data structures ----------

/// Config file as written by the operator. Every tunable is kept loosely
/// typed so a bad value falls back to its default instead of failing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub api_token: Option<String>,
    pub server_id: Option<Value>,
    pub api_host: Option<String>,
    pub listen_port: Option<Value>,
    pub target_port: Option<Value>,
    pub idle_timeout_minutes: Option<Value>,
    pub max_players: Option<Value>,
    pub mc_protocol: Option<Value>,
    pub mc_version_name: Option<Value>,
    pub motd_title: Option<Value>,
    pub start_cooldown_seconds: Option<Value>,
    pub stop_cooldown_seconds: Option<Value>,
    pub startup_grace_seconds: Option<Value>,
    pub connect_retry_seconds: Option<Value>,
    pub connect_retry_interval: Option<Value>,
    pub handshake_timeout_seconds: Option<Value>,
    pub log_connections: Option<Value>,
}

/// Immutable settings for the whole process.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub api_token: String,
    pub server_id: String,
    pub api_host: String,
    pub listen_port: u16,
    pub target_port: u16,
    pub idle_timeout_minutes: u32,
    pub max_players: u32,
    pub mc_protocol: u32,
    pub mc_version_name: String,
    pub motd_title: String,
    pub start_cooldown: Duration,
    pub stop_cooldown: Duration,
    pub startup_grace: Duration,
    pub connect_retry: Duration,
    pub connect_retry_interval: Duration,
    pub handshake_timeout: Duration,
    pub log_connections: bool,
}

// ---------- Defaults ----------

const DEFAULT_API_HOST: &str = "https://127.0.0.1:8443";
const DEFAULT_LISTEN_PORT: u16 = 25565;
const DEFAULT_TARGET_PORT: u16 = 25500;
const DEFAULT_IDLE_TIMEOUT_MINUTES: u32 = 20;
const DEFAULT_MAX_PLAYERS: u32 = 5;
const DEFAULT_MC_PROTOCOL: u32 = 767;
const DEFAULT_MC_VERSION_NAME: &str = "1.21.1";
const DEFAULT_MOTD_TITLE: &str = "Crafty Proxy";
const DEFAULT_START_COOLDOWN_SECONDS: u64 = 120;
const DEFAULT_STOP_COOLDOWN_SECONDS: u64 = 120;
const DEFAULT_STARTUP_GRACE_SECONDS: u64 = 180;
const DEFAULT_CONNECT_RETRY_SECONDS: u64 = 6;
const DEFAULT_CONNECT_RETRY_INTERVAL: f64 = 0.3;
const DEFAULT_HANDSHAKE_TIMEOUT_SECONDS: u64 = 2;

// ---------- Coercion helpers ----------

fn is_false_literal(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().eq_ignore_ascii_case("false"))
}

fn to_int<T: TryFrom<i64>>(value: Option<&Value>, default: T) -> T {
    let parsed = match value {
        Some(v) if is_false_literal(v) => None,
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| T::try_from(n).ok())
        .unwrap_or(default)
}

fn to_float(value: Option<&Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(v) if is_false_literal(v) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite() && *f >= 0.0)
        .unwrap_or(default)
}

fn to_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => true,
            "false" | "0" | "no" | "n" | "off" => false,
            _ => default,
        },
        Some(Value::Number(n)) => n.as_f64().map_or(default, |f| f != 0.0),
        _ => default,
    }
}

fn to_text(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

fn seconds(value: Option<&Value>, default: u64) -> Duration {
    Duration::from_secs(to_int(value, default))
}

/// Values too large for a `Duration` fall back to the default too.
fn fractional_seconds(value: Option<&Value>, default: f64) -> Duration {
    Duration::try_from_secs_f64(to_float(value, default))
        .unwrap_or_else(|_| Duration::from_secs_f64(default))
}

// ---------- Public API ----------

impl ProxyConfig {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let api_token = raw
            .api_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingField("api_token"))?;
        let server_id = Some(to_text(raw.server_id.as_ref(), ""))
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingField("server_id"))?;

        let api_host = raw
            .api_host
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string());

        Ok(ProxyConfig {
            api_token,
            server_id,
            api_host: api_host.trim_end_matches('/').to_string(),
            listen_port: to_int(raw.listen_port.as_ref(), DEFAULT_LISTEN_PORT),
            target_port: to_int(raw.target_port.as_ref(), DEFAULT_TARGET_PORT),
            idle_timeout_minutes: to_int(
                raw.idle_timeout_minutes.as_ref(),
                DEFAULT_IDLE_TIMEOUT_MINUTES,
            ),
            max_players: to_int(raw.max_players.as_ref(), DEFAULT_MAX_PLAYERS),
            mc_protocol: to_int(raw.mc_protocol.as_ref(), DEFAULT_MC_PROTOCOL),
            mc_version_name: to_text(raw.mc_version_name.as_ref(), DEFAULT_MC_VERSION_NAME),
            motd_title: to_text(raw.motd_title.as_ref(), DEFAULT_MOTD_TITLE),
            start_cooldown: seconds(
                raw.start_cooldown_seconds.as_ref(),
                DEFAULT_START_COOLDOWN_SECONDS,
            ),
            stop_cooldown: seconds(
                raw.stop_cooldown_seconds.as_ref(),
                DEFAULT_STOP_COOLDOWN_SECONDS,
            ),
            startup_grace: seconds(
                raw.startup_grace_seconds.as_ref(),
                DEFAULT_STARTUP_GRACE_SECONDS,
            ),
            connect_retry: seconds(
                raw.connect_retry_seconds.as_ref(),
                DEFAULT_CONNECT_RETRY_SECONDS,
            ),
            connect_retry_interval: fractional_seconds(
                raw.connect_retry_interval.as_ref(),
                DEFAULT_CONNECT_RETRY_INTERVAL,
            ),
            handshake_timeout: seconds(
                raw.handshake_timeout_seconds.as_ref(),
                DEFAULT_HANDSHAKE_TIMEOUT_SECONDS,
            ),
            log_connections: to_bool(raw.log_connections.as_ref(), false),
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents)?;
        Self::from_raw(raw)
    }

    /// Loads YAML from `config_path`. A missing file is replaced by the
    /// commented default, which still lacks the required credentials.
    pub fn load(config_path: &str) -> Result<Self, ConfigError> {
        let mut contents = String::new();
        match File::open(config_path) {
            Ok(mut file) => {
                file.read_to_string(&mut contents)
                    .map_err(|source| ConfigError::Read {
                        path: config_path.to_string(),
                        source,
                    })?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("Config file not found. Creating a default config file...");
                contents = default_config();
                match File::create(config_path) {
                    Ok(mut file) => {
                        if let Err(e) = file.write_all(contents.as_bytes()) {
                            warn!("Unable to write default config file: {}", e);
                        }
                    }
                    Err(e) => warn!("Unable to create default config file: {}", e),
                }
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: config_path.to_string(),
                    source,
                })
            }
        }
        Self::from_yaml(&contents)
    }

    pub fn api_base_url(&self) -> String {
        format!("{}/api/v2/servers/{}", self.api_host, self.server_id)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.listen_port)
    }

    pub fn backend_addr(&self) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), self.target_port)
    }
}

// A default config, just in case the file doesn't exist.
fn default_config() -> String {
    r#"# Lazy-wake proxy configuration.
# Bearer token and server id for the management API (required).
api_token: ""
server_id: ""
# Management API host; the proxy talks to {api_host}/api/v2/servers/{server_id}
api_host: "https://127.0.0.1:8443"

# Public port players connect to, and the backend's local port.
listen_port: 25565
target_port: 25500

# Minutes with nobody online before the backend is stopped.
idle_timeout_minutes: 20
max_players: 5
mc_protocol: 767
mc_version_name: "1.21.1"
motd_title: "Crafty Proxy"

start_cooldown_seconds: 120
stop_cooldown_seconds: 120
# Time after a start request during which the backend is not considered joinable.
startup_grace_seconds: 180
# How long to keep retrying the backend connection, and the pause between tries.
connect_retry_seconds: 6
connect_retry_interval: 0.3
handshake_timeout_seconds: 2
log_connections: false
"#
    .to_string()
}
