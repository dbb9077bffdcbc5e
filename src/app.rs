use crate::channels::TelegramChannel;
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::control::{LifecycleController, StartOutcome, StopOutcome};
use crate::notify::{Notifier, NullNotifier, TelegramNotifier};
use crate::reconcile::Reconciler;
use crate::registry::{BotKind, BotSpec, Registry, RemoteAuth, RemoteTarget, Schedule};
use crate::runner::{BotRunner, HostRunner};
use anyhow::{Context, Result};
use std::sync::Arc;

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run => run_daemon(config).await,

        Commands::AddLocal {
            name,
            script_path,
            group,
            schedule,
        } => {
            let (controller, ..) = build_core(&config);
            let bot = controller.add_bot(&BotSpec {
                name,
                kind: BotKind::Local,
                script_path,
                remote: None,
                group,
                schedule: parse_schedule_arg(schedule.as_deref())?,
            })?;
            println!("✅ Added local bot '{}' (#{})", bot.name, bot.id);
            Ok(())
        }

        Commands::AddRemote {
            name,
            script_path,
            host,
            port,
            user,
            password,
            key,
            group,
            schedule,
        } => {
            let auth = match (password, key) {
                (Some(password), None) => RemoteAuth::Password(password),
                (None, Some(key)) => RemoteAuth::KeyFile(key),
                _ => anyhow::bail!("provide exactly one of --password or --key"),
            };
            let (controller, ..) = build_core(&config);
            let bot = controller.add_bot(&BotSpec {
                name,
                kind: BotKind::Remote,
                script_path,
                remote: Some(RemoteTarget {
                    host,
                    port,
                    username: user,
                    auth,
                }),
                group,
                schedule: parse_schedule_arg(schedule.as_deref())?,
            })?;
            println!("✅ Added remote bot '{}' (#{})", bot.name, bot.id);
            Ok(())
        }

        Commands::List => {
            let (controller, ..) = build_core(&config);
            let bots = controller.registry().list()?;
            if bots.is_empty() {
                println!("No bots registered.");
                return Ok(());
            }
            for bot in bots {
                let schedule = bot.schedule.map(|s| format!(" @ {s}")).unwrap_or_default();
                let group = bot
                    .group
                    .as_deref()
                    .map(|g| format!(" ({g})"))
                    .unwrap_or_default();
                println!(
                    "#{} {} [{}] {}{schedule}{group}",
                    bot.id, bot.name, bot.kind, bot.status
                );
            }
            Ok(())
        }

        Commands::Start { id } => {
            let (controller, ..) = build_core(&config);
            match controller.start(id).await? {
                StartOutcome::Started => println!("✅ Bot {id} started"),
                StartOutcome::AlreadyRunning => println!("Bot {id} is already running"),
            }
            Ok(())
        }

        Commands::Stop { id } => {
            let (controller, ..) = build_core(&config);
            match controller.stop(id).await? {
                StopOutcome::Stopped => println!("✅ Bot {id} stopped"),
                StopOutcome::AlreadyStopped => println!("Bot {id} is already stopped"),
            }
            Ok(())
        }

        Commands::Restart { id } => {
            let (controller, ..) = build_core(&config);
            controller.restart(id).await?;
            println!("✅ Bot {id} restarted");
            Ok(())
        }

        Commands::Rm { id } => {
            let (controller, ..) = build_core(&config);
            controller.delete_bot(id)?;
            println!("✅ Bot {id} removed");
            Ok(())
        }

        Commands::Schedule { id, time } => {
            let (controller, ..) = build_core(&config);
            let schedule = parse_schedule_arg(Some(&time))?;
            controller.set_schedule(id, schedule)?;
            match schedule {
                Some(s) => println!("✅ Bot {id} scheduled daily at {s}"),
                None => println!("✅ Bot {id} schedule cleared"),
            }
            Ok(())
        }

        Commands::Log { id, lines } => {
            let (controller, ..) = build_core(&config);
            println!("{}", controller.get_log(id, lines).await?);
            Ok(())
        }
    }
}

fn parse_schedule_arg(raw: Option<&str>) -> Result<Option<Schedule>> {
    match raw {
        None | Some("off") => Ok(None),
        Some(raw) => {
            let schedule = raw
                .parse()
                .with_context(|| format!("invalid schedule '{raw}'"))?;
            Ok(Some(schedule))
        }
    }
}

fn build_core(
    config: &Config,
) -> (Arc<LifecycleController>, Arc<dyn BotRunner>, Arc<dyn Notifier>) {
    let registry = Registry::new(&config.workspace_dir);
    let runner: Arc<dyn BotRunner> = Arc::new(HostRunner::new(config));
    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) if !telegram.admin_chat_ids.is_empty() => {
            Arc::new(TelegramNotifier::new(telegram))
        }
        _ => Arc::new(NullNotifier),
    };
    let controller = Arc::new(LifecycleController::new(
        registry,
        Arc::clone(&runner),
        Arc::clone(&notifier),
    ));
    (controller, runner, notifier)
}

async fn run_daemon(config: Config) -> Result<()> {
    let (controller, runner, notifier) = build_core(&config);

    let reconciler = Reconciler::new(
        Arc::clone(&controller),
        runner,
        notifier,
        config.reconciler.effective_poll_secs(),
    );
    tokio::spawn(async move {
        if let Err(e) = reconciler.run().await {
            tracing::error!("reconciliation loop exited: {e:#}");
        }
    });

    if let Some(telegram) = config.telegram.clone() {
        let channel = TelegramChannel::new(&telegram, Arc::clone(&controller));
        tokio::spawn(async move {
            if let Err(e) = channel.listen().await {
                tracing::error!("Telegram channel exited: {e:#}");
            }
        });
    } else {
        tracing::info!("no Telegram config; chat channel disabled");
    }

    if config.gateway.enabled {
        let bind = config.gateway.bind.clone();
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(e) = crate::gateway::run(controller, &bind).await {
                tracing::error!("HTTP mirror exited: {e:#}");
            }
        });
    }

    tracing::info!(
        "botherd daemon up (poll every {}s)",
        config.reconciler.effective_poll_secs()
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_arg_accepts_time_and_off() {
        assert_eq!(parse_schedule_arg(None).unwrap(), None);
        assert_eq!(parse_schedule_arg(Some("off")).unwrap(), None);
        assert_eq!(
            parse_schedule_arg(Some("07:45")).unwrap(),
            Some("07:45".parse().unwrap())
        );
        assert!(parse_schedule_arg(Some("7pm")).is_err());
    }
}
