use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Chat hub server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chathub-server", version, about = "Real-time chat hub server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATHUB_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATHUB_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chathub.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATHUB_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, generated keys)
    #[arg(long, env = "CHATHUB_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Shared session secret used by the admin panel to sign `jwt_token` cookies.
    /// When unset a random key is generated and stored in the data directory.
    #[arg(long, env = "CHATHUB_JWT_SECRET")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Path to a custom message fragment template
    #[arg(long, env = "CHATHUB_MESSAGE_TEMPLATE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,

    /// Hub tuning (loaded from [hub] section in TOML or CHATHUB_HUB__* env).
    /// Not serialized, so the CLI layer cannot mask it with defaults.
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub hub: HubConfig,
}

/// Connection and dispatch tuning for the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per connection (default: 1)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Maximum inbound message size in bytes (default: 512)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Seconds without a pong before the peer is considered dead (default: 60)
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Seconds between pings (default: 54)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Deadline in seconds for a single socket write (default: 10)
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            max_message_size: default_max_message_size(),
            pong_wait_secs: default_pong_wait(),
            ping_interval_secs: default_ping_interval(),
            write_wait_secs: default_write_wait(),
        }
    }
}

fn default_outbound_buffer() -> usize {
    1
}

fn default_max_message_size() -> usize {
    512
}

fn default_pong_wait() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    // 9/10 of the pong wait so a ping always lands before the read deadline
    54
}

fn default_write_wait() -> u64 {
    10
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hub.outbound_buffer must be at least 1")]
    ZeroBuffer,
    #[error("hub.max_message_size must be greater than zero")]
    ZeroMessageSize,
    #[error("hub.write_wait_secs must be greater than zero")]
    ZeroWriteWait,
    #[error("hub.ping_interval_secs ({ping}) must be non-zero and shorter than hub.pong_wait_secs ({pong})")]
    PingInterval { ping: u64, pong: u64 },
}

impl HubConfig {
    /// Reject settings that would evict every peer or never detect dead ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        if self.write_wait_secs == 0 {
            return Err(ConfigError::ZeroWriteWait);
        }
        if self.ping_interval_secs == 0 || self.ping_interval_secs >= self.pong_wait_secs {
            return Err(ConfigError::PingInterval {
                ping: self.ping_interval_secs,
                pong: self.pong_wait_secs,
            });
        }
        Ok(())
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./chathub.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            message_template: None,
            hub: HubConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATHUB_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATHUB_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat hub server configuration
# Place this file at ./chathub.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATHUB_PORT,
# CHATHUB_HUB__OUTBOUND_BUFFER, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated keys
# data_dir = "./data"

# Secret shared with the admin panel for `jwt_token` session cookies.
# Leave unset to generate one in data_dir/jwt_secret.
# jwt_secret = "change-me"

# Custom message fragment template. Placeholders:
# {{sender_id}} {{sender_name}} {{recipient_id}} {{text}} {{created_at}}
# message_template = "./templates/message.html"

# ---- Hub ----
# [hub]

# Pending deliveries per connection before it is evicted as a slow consumer
# outbound_buffer = 1

# Largest accepted inbound frame in bytes
# max_message_size = 512

# Liveness: pings every ping_interval_secs, peer dropped after pong_wait_secs
# without a pong. ping_interval_secs must be shorter than pong_wait_secs.
# pong_wait_secs = 60
# ping_interval_secs = 54

# Deadline for each socket write
# write_wait_secs = 10
"#
    .to_string()
}
