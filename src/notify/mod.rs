use crate::config::TelegramConfig;
use async_trait::async_trait;

/// Fire-and-forget administrator notification sink.
///
/// Delivery is best-effort: failures are logged and swallowed so an
/// unreachable administrator can never block a lifecycle transition or a
/// reconciliation cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Used when no Telegram credentials are configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, text: &str) {
        tracing::info!("notification (no sink configured): {text}");
    }
}

/// Fans a notification out to every admin chat id via the Telegram Bot API.
pub struct TelegramNotifier {
    bot_token: String,
    admin_chat_ids: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self::with_api_base(config, "https://api.telegram.org".to_string())
    }

    pub fn with_api_base(config: &TelegramConfig, api_base: String) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            admin_chat_ids: config.admin_chat_ids.clone(),
            api_base,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        for chat_id in &self.admin_chat_ids {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            });
            let sent = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&body)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    tracing::warn!(
                        "Telegram notification to {chat_id} rejected: {}",
                        resp.status()
                    );
                }
                Err(e) => {
                    tracing::warn!("Telegram notification to {chat_id} failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Notifier;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Captures notifications for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.messages.lock().unwrap())
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> TelegramConfig {
        TelegramConfig {
            bot_token: "123:abc".into(),
            admin_chat_ids: vec!["42".into(), "43".into()],
        }
    }

    #[tokio::test]
    async fn notify_fans_out_to_every_admin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_api_base(&test_config(), server.uri());
        notifier.notify("bot 'worker1' stopped unexpectedly").await;
    }

    #[tokio::test]
    async fn notify_swallows_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_api_base(&test_config(), server.uri());
        // Must not panic or error; failures are logged and dropped.
        notifier.notify("unreachable admins are fine").await;
    }
}
