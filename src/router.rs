//! Fans one push message out to every registered action handler.

use async_trait::async_trait;
use futures_util::FutureExt as _;
use std::{
    any::Any,
    collections::HashSet,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use crate::{
    core::truncate_message, error::HandlerError, ledger::ProcessedLedger, model::PushMessage,
    settings::Config,
};

/// Dependencies handed to a handler for one `route` call.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub config: Arc<Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
    /// The message was not meant for this handler.
    Skipped,
}

/// A pluggable reaction to push messages.
///
/// The router calls every handler for every message, so `handle` must filter
/// for itself; `validate` is the same check without side effects.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Action-type label; registration is keyed by it.
    fn action(&self) -> &str;

    fn validate(&self, message: &PushMessage) -> bool;

    async fn handle(
        &self,
        message: &PushMessage,
        context: &MessageContext,
    ) -> Result<HandlerOutcome, HandlerError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No config snapshot has been set yet.
    NotConfigured,
    /// A directive message whose id is already in the ledger or is being
    /// routed by an overlapping call.
    AlreadyProcessed,
    Dispatched(DispatchReport),
}

impl RouteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Dispatched(report) if report.failed == 0)
    }
}

#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
    config: RwLock<Option<Arc<Config>>>,
    ledger: Option<Arc<ProcessedLedger>>,
    /// Directive ids between claim and ledger mark.
    routing: Mutex<HashSet<i64>>,
}

/// Releases a claimed directive id, also when the route future is dropped.
struct RoutingClaim<'a> {
    routing: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl Drop for RoutingClaim<'_> {
    fn drop(&mut self) {
        self.routing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: Arc<ProcessedLedger>) -> Self {
        Self {
            ledger: Some(ledger),
            ..Self::default()
        }
    }

    /// The last registration for a label wins and keeps the original slot.
    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        let Ok(mut handlers) = self.handlers.write() else {
            tracing::error!("handler registry lock poisoned");
            return;
        };
        let action = handler.action().to_string();
        match handlers.iter().position(|existing| existing.action() == action) {
            Some(index) => handlers[index] = handler,
            None => handlers.push(handler),
        }
        tracing::debug!(%action, "registered handler");
    }

    pub fn handler_actions(&self) -> Vec<String> {
        self.handlers
            .read()
            .map(|handlers| handlers.iter().map(|h| h.action().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn set_config(&self, config: Arc<Config>) {
        if let Ok(mut slot) = self.config.write() {
            *slot = Some(config);
        }
    }

    pub fn config(&self) -> Option<Arc<Config>> {
        self.config.read().ok().and_then(|slot| slot.clone())
    }

    pub async fn route(&self, message: &PushMessage) -> RouteOutcome {
        tracing::debug!(
            id = message.id,
            app_id = message.app_id,
            title = %truncate_message(&message.title, 60),
            "routing message"
        );

        let Some(config) = self.config() else {
            tracing::warn!(id = message.id, "no configuration set, ignoring message");
            return RouteOutcome::NotConfigured;
        };

        let has_directive = message.directive().is_some();
        let mut _claim = None;
        if has_directive {
            if let Some(ledger) = &self.ledger {
                _claim = match self.claim(message.id) {
                    Some(claim) => Some(claim),
                    None => {
                        tracing::debug!(id = message.id, "directive already being routed, skipping");
                        return RouteOutcome::AlreadyProcessed;
                    }
                };
                match ledger.contains(message.id).await {
                    Ok(true) => {
                        tracing::debug!(id = message.id, "directive already processed, skipping");
                        return RouteOutcome::AlreadyProcessed;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(id = message.id, %error, "ledger lookup failed, dispatching anyway")
                    }
                }
            }
        }

        let context = MessageContext { config };
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .map(|handlers| handlers.clone())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for handler in handlers {
            let action = handler.action().to_string();
            let result = AssertUnwindSafe(handler.handle(message, &context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(HandlerError::Panicked {
                        action: action.clone(),
                        reason: panic_reason(panic.as_ref()),
                    })
                });
            match result {
                Ok(HandlerOutcome::Handled) => report.handled += 1,
                Ok(HandlerOutcome::Skipped) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(id = message.id, %action, %error, "handler failed");
                }
            }
        }

        if has_directive {
            if let Some(ledger) = &self.ledger {
                if let Err(error) = ledger.mark_processed(&[message.id]).await {
                    tracing::warn!(id = message.id, %error, "failed to mark message processed");
                }
            }
        }

        RouteOutcome::Dispatched(report)
    }

    /// Check and insert happen under one lock, so overlapping routes of the
    /// same id cannot both get past the ledger lookup.
    fn claim(&self, id: i64) -> Option<RoutingClaim<'_>> {
        let mut routing = self.routing.lock().unwrap_or_else(PoisonError::into_inner);
        if !routing.insert(id) {
            return None;
        }
        Some(RoutingClaim {
            routing: &self.routing,
            id,
        })
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}
