use std::{process::ExitCode, sync::Arc, time::Duration};

use droplink::{
    consts::CONFIG_POLL_INTERVAL_SECS,
    core::unix_now_millis,
    error::{ConfigError, FetchError, StorageError},
    handlers::{NotifyHandler, OpenUrlHandler},
    ledger::{FileLedgerStore, ProcessedLedger},
    messages::GotifyRestClient,
    notifications::{LogNotifier, Notifier},
    reconciler::BacklogReconciler,
    router::MessageRouter,
    settings::{default_settings_path, Config, ConfigStore, FileConfigStore},
    stream::ConnectionController,
    tabs::SystemBrowser,
    transport::WsConnector,
};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("No configuration path; set DROPLINK_CONFIG or HOME")]
    NoConfigPath,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Http(#[from] FetchError),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "droplink failed to start");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = fmt().with_env_filter(filter).try_init() {
        eprintln!("droplink: logging unavailable: {error}");
    }
}

async fn run() -> Result<(), StartupError> {
    let settings_path = default_settings_path().ok_or(StartupError::NoConfigPath)?;
    tracing::info!(
        pid = std::process::id(),
        settings = %settings_path.display(),
        "droplink starting"
    );

    let config_store = Arc::new(FileConfigStore::open(&settings_path)?);
    let ledger = Arc::new(ProcessedLedger::new(FileLedgerStore::new(
        settings_path.with_file_name("ledger.json"),
    )));
    let install_time = ledger.ensure_install_time(unix_now_millis()).await?;
    let stats = ledger.stats().await?;
    tracing::info!(
        install_time,
        processed = stats.count,
        last_sync = ?stats.last_sync_time,
        "processed ledger loaded"
    );

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let router = Arc::new(MessageRouter::with_ledger(ledger.clone()));
    router.register(Arc::new(OpenUrlHandler::new(
        Arc::new(SystemBrowser),
        notifier.clone(),
    )));
    router.register(Arc::new(NotifyHandler::new(notifier.clone())));

    let reconciler = Arc::new(BacklogReconciler::new(
        config_store.clone(),
        Arc::new(GotifyRestClient::new()?),
        ledger,
        router.clone(),
        notifier.clone(),
    ));
    let controller = ConnectionController::new(
        Arc::new(WsConnector),
        router.clone(),
        Some(reconciler),
        notifier,
    );

    let mut changes = config_store.subscribe();
    let mut current = changes.borrow_and_update().clone();
    apply_config(&controller, &router, &current, None).await;

    let mut poll = tokio::time::interval(Duration::from_secs(CONFIG_POLL_INTERVAL_SECS));
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    poll.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
            _ = poll.tick() => {
                if let Err(error) = config_store.reload() {
                    tracing::warn!(%error, "failed to reload settings");
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = changes.borrow_and_update().clone();
                apply_config(&controller, &router, &next, Some(&current)).await;
                current = next;
            }
        }
    }

    controller.disconnect().await;
    Ok(())
}

/// Pushes a new snapshot to the router and restarts the stream when the
/// endpoint or token changed.
async fn apply_config(
    controller: &ConnectionController,
    router: &MessageRouter,
    next: &Arc<Config>,
    previous: Option<&Arc<Config>>,
) {
    router.set_config(next.clone());
    let validation = next.validate();
    controller.set_config_validity(validation.is_ok());

    if let Err(error) = validation {
        tracing::warn!(%error, "configuration incomplete, stream stays down");
        if previous.is_some_and(|previous| previous.is_valid()) {
            controller.disconnect().await;
        }
        return;
    }

    let restart = match previous {
        None => true,
        Some(previous) => !previous.is_valid() || next.needs_reconnect(previous),
    };
    if !restart {
        tracing::debug!("settings changed without affecting the stream");
        return;
    }

    if previous.is_some() {
        controller.disconnect().await;
    }
    if let Err(error) = controller.connect(next.clone()).await {
        tracing::warn!(%error, "stream connect failed");
    }
}
