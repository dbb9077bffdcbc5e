use crate::control::LifecycleController;
use crate::notify::Notifier;
use crate::registry::{Bot, BotStatus};
use crate::runner::BotRunner;
use anyhow::Result;
use chrono::{Local, NaiveTime};
use std::sync::Arc;
use tokio::time::{self, Duration};

/// Background loop that corrects drift between recorded status and
/// observed process liveness, and fires daily scheduled starts.
///
/// Recorded status is a cache of reality, not a lock; this loop is the
/// sole source of truth correction. There is no supervised restart: a
/// crashed bot stays stopped until a human or its schedule starts it.
pub struct Reconciler {
    controller: Arc<LifecycleController>,
    runner: Arc<dyn BotRunner>,
    notifier: Arc<dyn Notifier>,
    poll: Duration,
}

impl Reconciler {
    pub fn new(
        controller: Arc<LifecycleController>,
        runner: Arc<dyn BotRunner>,
        notifier: Arc<dyn Notifier>,
        poll_secs: u64,
    ) -> Self {
        Self {
            controller,
            runner,
            notifier,
            poll: Duration::from_secs(poll_secs),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let mut interval = time::interval(self.poll);
        loop {
            interval.tick().await;
            self.run_cycle(Local::now().time()).await;
        }
    }

    /// One reconciliation pass over every registered bot. Takes the clock
    /// as a parameter so tests can pin it. Each bot is fault-isolated: one
    /// bot's failure is logged and skipped, never aborting the cycle.
    pub async fn run_cycle(&self, now: NaiveTime) {
        let bots = match self.controller.registry().list() {
            Ok(bots) => bots,
            Err(e) => {
                tracing::warn!("reconciliation cycle could not list bots: {e:#}");
                return;
            }
        };

        for bot in bots {
            if let Err(e) = self.reconcile_bot(bot.clone(), now).await {
                tracing::warn!("reconciliation failed for bot '{}': {e:#}", bot.name);
            }
        }
    }

    async fn reconcile_bot(&self, mut bot: Bot, now: NaiveTime) -> Result<()> {
        let real_running = self.runner.is_running(&bot).await;

        match (bot.status.is_running(), real_running) {
            (true, false) => {
                // The process died outside our control.
                self.controller
                    .registry()
                    .update_status(bot.id, BotStatus::Stopped)?;
                bot.status = BotStatus::Stopped;
                self.notifier
                    .notify(&format!("bot '{}' stopped unexpectedly", bot.name))
                    .await;
            }
            (false, true) => {
                // Something started it behind our back (earlier controller
                // run, manual start). Resynchronization, not an event.
                self.controller
                    .registry()
                    .update_status(bot.id, BotStatus::Running)?;
                bot.status = BotStatus::Running;
            }
            _ => {}
        }

        if let Some(schedule) = bot.schedule {
            // The real_running guard keeps a bot already alive during its
            // scheduled minute from being launched twice across two polls.
            if schedule.matches(now) && !real_running {
                self.controller.start_scheduled(&bot, schedule).await?;
            }
        }

        Ok(())
    }
}
