use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation cycles. Clamped to 5..=60; anything
    /// above a minute would let daily schedules slip past unfired.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Upper bound on any single remote shell session (connect + auth +
    /// command). One unreachable host must not starve the whole cycle.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    /// Directory on remote hosts that receives per-bot log files,
    /// relative to the login user's home.
    #[serde(default = "default_remote_log_dir")]
    pub remote_log_dir: String,
}

fn default_poll_secs() -> u64 {
    60
}

fn default_remote_timeout_secs() -> u64 {
    15
}

fn default_remote_log_dir() -> String {
    "botherd-logs".into()
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            remote_timeout_secs: default_remote_timeout_secs(),
            remote_log_dir: default_remote_log_dir(),
        }
    }
}

impl ReconcilerConfig {
    pub fn effective_poll_secs(&self) -> u64 {
        self.poll_secs.clamp(5, 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat ids allowed to issue commands; also the notification audience.
    #[serde(default)]
    pub admin_chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_bind() -> String {
    "127.0.0.1:8642".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_gateway_bind(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("could not find home directory")?;
        let botherd_dir = home.join(".botherd");
        let config_path = botherd_dir.join("config.toml");

        if !botherd_dir.exists() {
            fs::create_dir_all(&botherd_dir).context("failed to create .botherd directory")?;
            fs::create_dir_all(botherd_dir.join("workspace"))
                .context("failed to create workspace directory")?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("failed to parse config file")?;
            config.config_path.clone_from(&config_path);
            config.workspace_dir = botherd_dir.join("workspace");
            Ok(config)
        } else {
            let config = Self {
                config_path: config_path.clone(),
                workspace_dir: botherd_dir.join("workspace"),
                ..Self::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("failed to write config file")?;
        Ok(())
    }

    /// Local per-bot log files live here.
    pub fn logs_dir(&self) -> PathBuf {
        self.workspace_dir.join("logs")
    }
}
