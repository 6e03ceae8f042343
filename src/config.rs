use dotenvy::dotenv;
use serenity::all::ChannelId;
use std::env;
use std::time::Duration;

use crate::bot::BotOptions;
use crate::cluster::zookeeper::{ZkConnector, DEFAULT_CONNECT};
use crate::cluster::{ClusterConfig, DEFAULT_RECONNECT_DELAY};
use crate::ui::DEFAULT_SESSION_DURATION;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub bot_name: String,
    pub bot_help_message: String,

    // Cluster membership
    pub cluster_enabled: bool,
    pub cluster_connect: String,
    pub cluster_timeout: Option<Duration>,
    pub cluster_path_prefix: String,
    pub cluster_reconnect_delay: Duration,

    // Command registration
    pub register_commands: bool,
    pub register_commands_as_global: bool,

    // Log forwarding to a Discord channel
    pub error_logging_enabled: bool,
    pub general_logging_enabled: bool,
    pub error_channel: Option<ChannelId>,

    pub log_level: String,
    pub session_duration: Duration,
}

/// `true` only for the literal value `"true"`; `default` when unset.
fn env_flag_or_default(name: &str, default: bool) -> bool {
    env::var(name).map(|v| v == "true").unwrap_or(default)
}

fn env_duration(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| humantime::parse_duration(v.trim()).ok())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            bot_name: env::var("BOT_NAME").unwrap_or_else(|_| "bot".to_string()),
            bot_help_message: env::var("BOT_HELP_MESSAGE").unwrap_or_default(),
            cluster_enabled: env_flag_or_default("CLUSTER_ENABLED", false),
            cluster_connect: env::var("CLUSTER_CONNECT")
                .unwrap_or_else(|_| DEFAULT_CONNECT.to_string()),
            cluster_timeout: env_duration("CLUSTER_TIMEOUT"),
            cluster_path_prefix: env::var("CLUSTER_PATH_PREFIX")
                .unwrap_or_else(|_| "/bot".to_string()),
            cluster_reconnect_delay: env_duration("CLUSTER_RECONNECT_DELAY")
                .unwrap_or(DEFAULT_RECONNECT_DELAY),
            register_commands: env_flag_or_default("DISCORD_REGISTER_COMMANDS", true),
            register_commands_as_global: env_flag_or_default(
                "DISCORD_REGISTER_COMMANDS_AS_GLOBAL",
                false,
            ),
            error_logging_enabled: env_flag_or_default("DISCORD_ERROR_LOGGING_ENABLED", true),
            general_logging_enabled: env_flag_or_default("DISCORD_GENERAL_LOGGING_ENABLED", false),
            error_channel: env::var("DISCORD_ERROR_CHANNEL")
                .ok()
                .and_then(|id| id.trim().parse::<u64>().ok())
                .filter(|id| *id != 0)
                .map(ChannelId::new),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            session_duration: env_duration("DEFAULT_SESSION_DURATION")
                .unwrap_or(DEFAULT_SESSION_DURATION),
        })
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            enabled: self.cluster_enabled,
            path_prefix: self.cluster_path_prefix.clone(),
            timeout: self.cluster_timeout,
            reconnect_delay: self.cluster_reconnect_delay,
        }
    }

    /// Connector for the configured ZooKeeper ensemble; the cluster timeout
    /// doubles as the session timeout.
    pub fn cluster_connector(&self) -> ZkConnector {
        ZkConnector::new(&self.cluster_connect, self.cluster_timeout)
    }

    pub fn bot_options(&self) -> BotOptions {
        BotOptions {
            register_commands: self.register_commands,
            register_globally: self.register_commands_as_global,
        }
    }

    /// Whether any log lines should be posted to the error channel.
    pub fn forwards_logs(&self) -> bool {
        self.error_channel.is_some() && (self.error_logging_enabled || self.general_logging_enabled)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("bot_name", &self.bot_name)
            .field("bot_help_message", &self.bot_help_message)
            .field("cluster_enabled", &self.cluster_enabled)
            .field("cluster_connect", &self.cluster_connect)
            .field("cluster_timeout", &self.cluster_timeout)
            .field("cluster_path_prefix", &self.cluster_path_prefix)
            .field("cluster_reconnect_delay", &self.cluster_reconnect_delay)
            .field("register_commands", &self.register_commands)
            .field(
                "register_commands_as_global",
                &self.register_commands_as_global,
            )
            .field("error_logging_enabled", &self.error_logging_enabled)
            .field("general_logging_enabled", &self.general_logging_enabled)
            .field("error_channel", &self.error_channel)
            .field("log_level", &self.log_level)
            .field("session_duration", &self.session_duration)
            .finish()
    }
}
