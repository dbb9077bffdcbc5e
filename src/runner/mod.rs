mod local;
mod remote;

pub use local::LocalRunner;
pub use remote::RemoteRunner;

use crate::config::Config;
use crate::registry::{Bot, BotKind};
use anyhow::Result;
use async_trait::async_trait;

/// Sentinel text returned when a bot has no log file (or, for remote bots,
/// when the host cannot be reached; the two are deliberately not
/// distinguished).
pub const NO_LOG_SENTINEL: &str = "no log file yet";

/// Launch, kill, and liveness primitives for a bot's host.
///
/// Queries (`is_running`, `tail_log`) never error: an unreachable host or
/// a failed process-table enumeration reads as "not running" / "no log".
/// Only the state-changing operations report explicit failure.
#[async_trait]
pub trait BotRunner: Send + Sync {
    async fn launch(&self, bot: &Bot) -> Result<()>;
    async fn terminate(&self, bot: &Bot) -> Result<()>;
    async fn is_running(&self, bot: &Bot) -> bool;
    async fn tail_log(&self, bot: &Bot, lines: usize) -> String;
}

/// Dispatches each operation to the local or remote runner by bot kind.
pub struct HostRunner {
    local: LocalRunner,
    remote: RemoteRunner,
}

impl HostRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            local: LocalRunner::new(config.logs_dir()),
            remote: RemoteRunner::new(&config.reconciler),
        }
    }
}

#[async_trait]
impl BotRunner for HostRunner {
    async fn launch(&self, bot: &Bot) -> Result<()> {
        match bot.kind {
            BotKind::Local => self.local.launch(&bot.script_path).await,
            BotKind::Remote => {
                self.remote
                    .launch(require_target(bot)?, &bot.script_path)
                    .await
            }
        }
    }

    async fn terminate(&self, bot: &Bot) -> Result<()> {
        match bot.kind {
            BotKind::Local => self.local.terminate(&bot.name).await,
            BotKind::Remote => self.remote.terminate(require_target(bot)?, &bot.name).await,
        }
    }

    async fn is_running(&self, bot: &Bot) -> bool {
        match (bot.kind, bot.remote.as_ref()) {
            (BotKind::Local, _) => self.local.is_running(&bot.script_path).await,
            (BotKind::Remote, Some(target)) => {
                self.remote.is_running(target, &bot.script_path).await
            }
            (BotKind::Remote, None) => false,
        }
    }

    async fn tail_log(&self, bot: &Bot, lines: usize) -> String {
        match (bot.kind, bot.remote.as_ref()) {
            (BotKind::Local, _) => self.local.tail_log(&bot.script_path, lines).await,
            (BotKind::Remote, Some(target)) => {
                self.remote.tail_log(target, &bot.script_path, lines).await
            }
            (BotKind::Remote, None) => NO_LOG_SENTINEL.to_string(),
        }
    }
}

fn require_target(bot: &Bot) -> Result<&crate::registry::RemoteTarget> {
    bot.remote
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("remote bot '{}' has no remote target", bot.name))
}

/// Base filename of a script path, used as the process-matching pattern.
/// Substring matching against a process listing is a known approximation:
/// overlapping filenames can false-positive.
pub(crate) fn script_basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
