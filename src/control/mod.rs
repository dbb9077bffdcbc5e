use crate::error::RegistryError;
use crate::notify::Notifier;
use crate::registry::{Bot, BotKind, BotSpec, BotStatus, Registry, Schedule};
use crate::runner::BotRunner;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Pause between the stop and start halves of a restart, giving the OS a
/// moment to release the old process before the new one collides with it.
const RESTART_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Recorded status was already `Running`; nothing was launched.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Orchestrates start/stop/restart requests, dispatching to the local or
/// remote runner by bot kind and writing the resulting status back to the
/// registry. Every successful transition fans out an admin notification.
pub struct LifecycleController {
    registry: Registry,
    runner: Arc<dyn BotRunner>,
    notifier: Arc<dyn Notifier>,
    restart_pause: Duration,
}

impl LifecycleController {
    pub fn new(registry: Registry, runner: Arc<dyn BotRunner>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            registry,
            runner,
            notifier,
            restart_pause: RESTART_PAUSE,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_restart_pause(mut self, pause: Duration) -> Self {
        self.restart_pause = pause;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn start(&self, id: i64) -> Result<StartOutcome> {
        let bot = self.registry.get(id)?;
        let outcome = self.start_record(&bot).await?;
        if outcome == StartOutcome::Started {
            self.notifier
                .notify(&format!("bot '{}' started", bot.name))
                .await;
        }
        Ok(outcome)
    }

    /// Start on behalf of the scheduler: same transition, but the
    /// notification names the schedule as the trigger.
    pub(crate) async fn start_scheduled(&self, bot: &Bot, schedule: Schedule) -> Result<StartOutcome> {
        let outcome = self.start_record(bot).await?;
        if outcome == StartOutcome::Started {
            self.notifier
                .notify(&format!(
                    "bot '{}' started on schedule ({schedule})",
                    bot.name
                ))
                .await;
        }
        Ok(outcome)
    }

    async fn start_record(&self, bot: &Bot) -> Result<StartOutcome> {
        if bot.status.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        // On launch failure the recorded status stays untouched.
        self.runner.launch(bot).await?;
        self.registry.update_status(bot.id, BotStatus::Running)?;
        Ok(StartOutcome::Started)
    }

    pub async fn stop(&self, id: i64) -> Result<StopOutcome> {
        let bot = self.registry.get(id)?;
        if !bot.status.is_running() {
            return Ok(StopOutcome::AlreadyStopped);
        }
        self.runner.terminate(&bot).await?;
        self.registry.update_status(id, BotStatus::Stopped)?;
        self.notifier
            .notify(&format!("bot '{}' stopped", bot.name))
            .await;
        Ok(StopOutcome::Stopped)
    }

    pub async fn restart(&self, id: i64) -> Result<StartOutcome> {
        self.stop(id).await?;
        tokio::time::sleep(self.restart_pause).await;
        self.start(id).await
    }

    /// Validates and creates a bot record. Local bots must point at an
    /// existing script path; remote paths are taken on trust.
    pub fn add_bot(&self, spec: &BotSpec) -> Result<Bot> {
        if spec.kind == BotKind::Local && !Path::new(&spec.script_path).exists() {
            return Err(RegistryError::Invalid(format!(
                "local script path does not exist: {}",
                spec.script_path
            ))
            .into());
        }
        self.registry.add(spec)
    }

    pub fn delete_bot(&self, id: i64) -> Result<()> {
        self.registry.remove(id)
    }

    pub fn set_schedule(&self, id: i64, schedule: Option<Schedule>) -> Result<()> {
        self.registry.update_schedule(id, schedule)
    }

    pub async fn get_log(&self, id: i64, lines: usize) -> Result<String> {
        let bot = self.registry.get(id)?;
        Ok(self.runner.tail_log(&bot, lines).await)
    }
}
