use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    consts::NOTIFY_ACTION,
    core::truncate_message,
    error::HandlerError,
    model::PushMessage,
    notifications::{is_quiet_hours, Notice, Notifier},
    router::{HandlerOutcome, MessageContext, MessageHandler},
    settings::Config,
};

/// Mirrors incoming messages to the notifier when `show_all_notifications`
/// is on, honoring the priority floor and quiet hours.
pub struct NotifyHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotifyHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    fn suppressed_by(config: &Config, message: &PushMessage) -> Option<&'static str> {
        if !config.show_all_notifications {
            return Some("disabled");
        }
        if message.priority < config.min_priority {
            return Some("below minimum priority");
        }
        if is_quiet_hours(config.quiet_hours_start, config.quiet_hours_end) {
            return Some("quiet hours");
        }
        None
    }
}

#[async_trait]
impl MessageHandler for NotifyHandler {
    fn action(&self) -> &str {
        NOTIFY_ACTION
    }

    fn validate(&self, message: &PushMessage) -> bool {
        !message.title.trim().is_empty() || !message.body.trim().is_empty()
    }

    async fn handle(
        &self,
        message: &PushMessage,
        context: &MessageContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        if !self.validate(message) {
            return Ok(HandlerOutcome::Skipped);
        }
        if let Some(reason) = Self::suppressed_by(&context.config, message) {
            tracing::trace!(id = message.id, reason, "notification suppressed");
            return Ok(HandlerOutcome::Skipped);
        }

        let title = if message.title.trim().is_empty() {
            "Gotify".to_string()
        } else {
            truncate_message(&message.title, 80)
        };
        self.notifier
            .notify(Notice::info(title, truncate_message(&message.body, 220)))
            .await;
        Ok(HandlerOutcome::Handled)
    }
}
