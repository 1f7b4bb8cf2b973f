//! Catch-up of directives sent while the stream was down.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    error::ReconcileError,
    ledger::ProcessedLedger,
    messages::HistoryClient,
    model::PushMessage,
    notifications::{Notice, Notifier},
    router::MessageRouter,
    settings::ConfigStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InvalidConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub replayed: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another sync held the guard; nothing was fetched.
    AlreadyRunning,
    Skipped(SkipReason),
    Completed(SyncReport),
}

pub struct BacklogReconciler {
    config_store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryClient>,
    ledger: Arc<ProcessedLedger>,
    router: Arc<MessageRouter>,
    notifier: Arc<dyn Notifier>,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BacklogReconciler {
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        history: Arc<dyn HistoryClient>,
        ledger: Arc<ProcessedLedger>,
        router: Arc<MessageRouter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config_store,
            history,
            ledger,
            router,
            notifier,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Failures are logged and notified here; callers may ignore the result.
    pub async fn sync(&self) -> Result<SyncOutcome, ReconcileError> {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("history sync already running, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        tracing::info!("history sync started");
        match self.run().await {
            Ok(outcome) => {
                tracing::info!(?outcome, "history sync finished");
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!(%error, "history sync failed");
                self.notifier
                    .notify(Notice::error("History sync failed", error.to_string()))
                    .await;
                Err(error)
            }
        }
    }

    async fn run(&self) -> Result<SyncOutcome, ReconcileError> {
        let config = self.config_store.load().await?;
        if !config.history_sync_enabled {
            tracing::debug!("history sync disabled");
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        }
        if !config.is_valid() {
            tracing::warn!("configuration incomplete, skipping history sync");
            return Ok(SyncOutcome::Skipped(SkipReason::InvalidConfig));
        }

        let fetched = self
            .history
            .fetch_recent(&config, config.fetch_history_limit)
            .await?;
        let fetched_count = fetched.len();
        let processed = self.ledger.get_all().await?;
        let install_time = self.ledger.install_time().await?;

        let batch = select_backlog(
            fetched,
            &processed,
            install_time,
            &config.local_owner,
            config.max_open_tabs as usize,
        );
        tracing::info!(
            fetched = fetched_count,
            selected = batch.len(),
            "history messages selected for replay"
        );
        if batch.is_empty() {
            return Ok(SyncOutcome::Completed(SyncReport {
                fetched: fetched_count,
                ..SyncReport::default()
            }));
        }

        let interval = Duration::from_millis(config.batch_open_interval_ms);
        let mut succeeded = 0;
        for (index, message) in batch.iter().enumerate() {
            tracing::debug!(
                id = message.id,
                position = index + 1,
                total = batch.len(),
                "replaying message"
            );
            let outcome = self.router.route(message).await;
            if outcome.is_success() {
                succeeded += 1;
            } else {
                tracing::warn!(id = message.id, ?outcome, "replay did not fully succeed");
            }
            if index + 1 < batch.len() {
                tokio::time::sleep(interval).await;
            }
        }

        let replayed_ids: Vec<i64> = batch.iter().map(|message| message.id).collect();
        self.ledger.mark_processed(&replayed_ids).await?;

        if config.show_batch_notification && succeeded > 0 {
            self.notifier
                .notify(Notice::info(
                    "History restored",
                    format!("Opened {succeeded} link(s) from message history"),
                ))
                .await;
        }

        Ok(SyncOutcome::Completed(SyncReport {
            fetched: fetched_count,
            replayed: batch.len(),
            succeeded,
        }))
    }
}

/// Picks the backlog to replay: inside the install window, not yet
/// processed, openable here, newest first, capped at `max_open`.
///
/// With a cutoff, messages without a parseable date are dropped.
pub fn select_backlog(
    messages: Vec<PushMessage>,
    processed_ids: &[i64],
    install_time: Option<i64>,
    local_owner: &str,
    max_open: usize,
) -> Vec<PushMessage> {
    let mut selected: Vec<PushMessage> = messages
        .into_iter()
        .filter(|message| match install_time {
            Some(cutoff) => message
                .timestamp()
                .is_some_and(|date| date.timestamp_millis() >= cutoff),
            None => true,
        })
        .filter(|message| !ProcessedLedger::is_processed(message.id, processed_ids))
        .filter(|message| {
            message
                .directive()
                .is_some_and(|directive| directive.is_openable_by(local_owner))
        })
        .collect();

    selected.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    selected.truncate(max_open);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn openable(id: i64, date: &str) -> PushMessage {
        serde_json::from_value(json!({
            "id": id, "appid": 1, "message": "m", "date": date,
            "extras": {"directive": {
                "content": {"type": "url", "value": format!("https://example.com/{id}")},
                "actions": [{"type": "openTab"}]
            }}
        }))
        .unwrap()
    }

    fn millis(date: &str) -> i64 {
        DateTime::parse_from_rfc3339(date)
            .unwrap()
            .with_timezone(&Utc)
            .timestamp_millis()
    }

    fn ids(messages: &[PushMessage]) -> Vec<i64> {
        messages.iter().map(|message| message.id).collect()
    }

    #[test]
    fn install_window_and_ledger_filter() {
        let cutoff = millis("2026-05-01T12:00:00Z");
        let messages = vec![
            openable(1, "2026-05-01T11:00:00Z"),
            openable(2, "2026-05-01T13:00:00Z"),
            openable(3, "2026-05-01T14:00:00Z"),
            openable(4, "not a date"),
        ];

        let selected = select_backlog(messages.clone(), &[3], Some(cutoff), "desktop", 10);
        assert_eq!(ids(&selected), vec![2]);

        let unbounded = select_backlog(messages, &[3], None, "desktop", 10);
        assert_eq!(ids(&unbounded), vec![2, 1, 4]);
    }

    #[test]
    fn message_at_cutoff_is_kept() {
        let date = "2026-05-01T12:00:00Z";
        let selected = select_backlog(vec![openable(1, date)], &[], Some(millis(date)), "desktop", 10);
        assert_eq!(ids(&selected), vec![1]);
    }

    #[test]
    fn keeps_newest_up_to_cap() {
        let messages: Vec<PushMessage> = (1..=37)
            .map(|minute| openable(minute, &format!("2026-05-01T12:{minute:02}:00Z")))
            .collect();
        let selected = select_backlog(messages, &[], None, "desktop", 10);
        assert_eq!(ids(&selected), (28..=37).rev().collect::<Vec<_>>());
    }

    #[test]
    fn only_locally_openable_directives() {
        let foreign: PushMessage = serde_json::from_value(json!({
            "id": 5, "appid": 1, "message": "m", "date": "2026-05-01T12:00:00Z",
            "extras": {"directive": {
                "content": {"type": "url", "value": "https://example.com"},
                "actions": [{"type": "openTab", "handler": "phone"}]
            }}
        }))
        .unwrap();
        let plain: PushMessage = serde_json::from_value(json!({
            "id": 6, "appid": 1, "message": "m", "date": "2026-05-01T12:00:00Z"
        }))
        .unwrap();

        let selected = select_backlog(
            vec![foreign, plain, openable(7, "2026-05-01T12:00:00Z")],
            &[],
            None,
            "desktop",
            10,
        );
        assert_eq!(ids(&selected), vec![7]);
    }
}
