use crate::config::TelegramConfig;
use crate::control::{LifecycleController, StartOutcome, StopOutcome};
use crate::registry::Schedule;
use anyhow::Result;
use std::sync::Arc;

const LOG_TAIL_LINES: usize = 20;

/// Telegram command channel: long-polls the Bot API for updates and maps
/// plain text commands onto the lifecycle controller. Adding bots is a CLI
/// concern; this channel only drives lifecycle and inspection.
pub struct TelegramChannel {
    bot_token: String,
    admin_chat_ids: Vec<String>,
    api_base: String,
    client: reqwest::Client,
    controller: Arc<LifecycleController>,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig, controller: Arc<LifecycleController>) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            admin_chat_ids: config.admin_chat_ids.clone(),
            api_base: "https://api.telegram.org".to_string(),
            client: reqwest::Client::new(),
            controller,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn is_admin(&self, chat_id: &str) -> bool {
        self.admin_chat_ids.iter().any(|id| id == chat_id)
    }

    pub async fn listen(&self) -> Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for commands...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": 30,
                "allowed_updates": ["message"]
            });

            let resp = match self
                .client
                .post(self.api_url("getUpdates"))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(serde_json::Value::as_array) else {
                continue;
            };

            for update in results {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(message) = update.get("message") else {
                    continue;
                };
                let Some(text) = message.get("text").and_then(serde_json::Value::as_str) else {
                    continue;
                };
                let chat_id = message
                    .get("chat")
                    .and_then(|c| c.get("id"))
                    .and_then(serde_json::Value::as_i64)
                    .map(|id| id.to_string())
                    .unwrap_or_default();

                if !self.is_admin(&chat_id) {
                    tracing::warn!("Telegram: ignoring command from non-admin chat {chat_id}");
                    continue;
                }

                let Some(command) = parse_command(text) else {
                    continue;
                };
                let reply = handle_command(&self.controller, command).await;
                self.send(&reply, &chat_id).await;
            }
        }
    }

    async fn send(&self, message: &str, chat_id: &str) {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
        });
        let sent = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await;
        if let Err(e) = sent {
            tracing::warn!("Telegram reply to {chat_id} failed: {e}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    List,
    Start(i64),
    Stop(i64),
    Restart(i64),
    Log(i64),
    SetSchedule(i64, Option<Schedule>),
}

pub(crate) fn parse_command(text: &str) -> Option<Command> {
    let mut words = text.split_whitespace();
    let verb = words.next()?;

    match verb {
        "/help" | "/start" => Some(Command::Help),
        "/list" => Some(Command::List),
        "/run" => next_id(&mut words).map(Command::Start),
        "/stop" => next_id(&mut words).map(Command::Stop),
        "/restart" => next_id(&mut words).map(Command::Restart),
        "/log" => next_id(&mut words).map(Command::Log),
        "/schedule" => {
            let id = next_id(&mut words)?;
            match words.next()? {
                "off" => Some(Command::SetSchedule(id, None)),
                raw => raw
                    .parse::<Schedule>()
                    .ok()
                    .map(|s| Command::SetSchedule(id, Some(s))),
            }
        }
        _ => None,
    }
}

fn next_id<'a>(words: &mut impl Iterator<Item = &'a str>) -> Option<i64> {
    words.next()?.parse().ok()
}

pub(crate) async fn handle_command(
    controller: &LifecycleController,
    command: Command,
) -> String {
    match command {
        Command::Help => "Commands: /list, /run <id>, /stop <id>, /restart <id>, \
                          /log <id>, /schedule <id> <HH:MM|off>"
            .to_string(),
        Command::List => match controller.registry().list() {
            Ok(bots) if bots.is_empty() => "No bots registered.".to_string(),
            Ok(bots) => bots
                .iter()
                .map(|bot| {
                    let schedule = bot
                        .schedule
                        .map(|s| format!(" @ {s}"))
                        .unwrap_or_default();
                    format!("#{} {} [{}] {}{schedule}", bot.id, bot.name, bot.kind, bot.status)
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("❌ {e:#}"),
        },
        Command::Start(id) => match controller.start(id).await {
            Ok(StartOutcome::Started) => format!("✅ bot {id} started"),
            Ok(StartOutcome::AlreadyRunning) => format!("bot {id} is already running"),
            Err(e) => format!("❌ {e:#}"),
        },
        Command::Stop(id) => match controller.stop(id).await {
            Ok(StopOutcome::Stopped) => format!("✅ bot {id} stopped"),
            Ok(StopOutcome::AlreadyStopped) => format!("bot {id} is already stopped"),
            Err(e) => format!("❌ {e:#}"),
        },
        Command::Restart(id) => match controller.restart(id).await {
            Ok(_) => format!("✅ bot {id} restarted"),
            Err(e) => format!("❌ {e:#}"),
        },
        Command::Log(id) => match controller.get_log(id, LOG_TAIL_LINES).await {
            Ok(text) => text,
            Err(e) => format!("❌ {e:#}"),
        },
        Command::SetSchedule(id, schedule) => match controller.set_schedule(id, schedule) {
            Ok(()) => match schedule {
                Some(s) => format!("✅ bot {id} scheduled daily at {s}"),
                None => format!("✅ bot {id} schedule cleared"),
            },
            Err(e) => format!("❌ {e:#}"),
        },
    }
}
