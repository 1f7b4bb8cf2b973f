use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    consts::OPEN_URL_ACTION,
    error::HandlerError,
    model::PushMessage,
    notifications::{Notice, Notifier},
    router::{HandlerOutcome, MessageContext, MessageHandler},
    tabs::TabOpener,
};

/// Opens the URL of a directive that carries an `openTab` action owned by
/// this client.
pub struct OpenUrlHandler {
    opener: Arc<dyn TabOpener>,
    notifier: Arc<dyn Notifier>,
}

impl OpenUrlHandler {
    pub fn new(opener: Arc<dyn TabOpener>, notifier: Arc<dyn Notifier>) -> Self {
        Self { opener, notifier }
    }
}

#[async_trait]
impl MessageHandler for OpenUrlHandler {
    fn action(&self) -> &str {
        OPEN_URL_ACTION
    }

    /// Owner tags are checked in `handle`, where the config is known.
    fn validate(&self, message: &PushMessage) -> bool {
        message.directive().is_some_and(|directive| {
            directive.url().is_some()
                && directive
                    .actions
                    .iter()
                    .any(|action| action.kind == OPEN_URL_ACTION)
        })
    }

    async fn handle(
        &self,
        message: &PushMessage,
        context: &MessageContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let Some(directive) = message.directive() else {
            return Ok(HandlerOutcome::Skipped);
        };
        let Some(url) = directive.url() else {
            tracing::debug!(id = message.id, "directive has no openable url");
            return Ok(HandlerOutcome::Skipped);
        };
        let Some(action) = directive
            .local_actions(OPEN_URL_ACTION, &context.config.local_owner)
            .next()
        else {
            tracing::debug!(id = message.id, "no openTab action for this client");
            return Ok(HandlerOutcome::Skipped);
        };

        let activate = action.param_bool("activate").unwrap_or(true);
        tracing::info!(id = message.id, %url, activate, "opening tab");

        match self.opener.open(url, activate).await {
            Ok(()) => {
                if context.config.notify_on_open {
                    self.notifier.notify(Notice::success("Link opened", url)).await;
                }
                Ok(HandlerOutcome::Handled)
            }
            Err(error) => {
                if context.config.notify_on_open {
                    self.notifier
                        .notify(Notice::error("Could not open link", url))
                        .await;
                }
                Err(HandlerError::failed(OPEN_URL_ACTION, error.to_string()))
            }
        }
    }
}
