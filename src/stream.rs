//! The live Gotify stream: connect, keepalive, reconnect with backoff.

use chrono::Utc;
use futures_util::{
    future::{self, BoxFuture, Shared},
    FutureExt as _,
};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    consts::{
        RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS, STREAM_CONNECT_TIMEOUT_SECS,
        STREAM_KEEPALIVE_INTERVAL_SECS,
    },
    core::{redact_ws_url, truncate_message},
    diagnostics::{RuntimeDiagnostics, StatusInfo},
    error::{ConnectError, TransportError},
    messages::parse_stream_message,
    model::ConnectionState,
    notifications::{Notice, Notifier},
    reconciler::BacklogReconciler,
    router::MessageRouter,
    settings::{build_stream_ws_url, Config},
    transport::{Connector, Frame, Transport},
};

type SharedConnect = Shared<BoxFuture<'static, Result<(), ConnectError>>>;

/// `min(base * 2^attempt, max)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(
        RECONNECT_BASE_DELAY_MS
            .saturating_mul(factor)
            .min(RECONNECT_MAX_DELAY_MS),
    )
}

/// Owns the single live stream transport.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    reconciler: Option<Arc<BacklogReconciler>>,
    notifier: Arc<dyn Notifier>,
    state_tx: broadcast::Sender<ConnectionState>,
    state: Mutex<ControllerState>,
}

#[derive(Default)]
struct ControllerState {
    runtime: RuntimeDiagnostics,
    config: Option<Arc<Config>>,
    manual_disconnect: bool,
    /// Bumped by every connect and disconnect; stale sessions and flights
    /// compare against it before touching shared state.
    epoch: u64,
    next_flight_id: u64,
    in_flight: Option<(u64, SharedConnect)>,
    session: Option<Session>,
    next_timer_token: u64,
    reconnect: Option<ReconnectTimer>,
}

struct Session {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Session {
    async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(error) = self.task.await {
            if error.is_panic() {
                tracing::error!(%error, "stream session task panicked");
            }
        }
    }
}

struct ReconnectTimer {
    token: u64,
    task: JoinHandle<()>,
}

impl ConnectionController {
    pub fn new(
        connector: Arc<dyn Connector>,
        router: Arc<MessageRouter>,
        reconciler: Option<Arc<BacklogReconciler>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                connector,
                router,
                reconciler,
                notifier,
                state_tx,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    /// Opens the stream for `config`. Concurrent callers share one attempt.
    pub async fn connect(&self, config: Arc<Config>) -> Result<(), ConnectError> {
        self.inner.begin_connect(config).await
    }

    /// Stops the stream and any pending reconnect until the next `connect`.
    pub async fn disconnect(&self) {
        let session = {
            let mut state = self.inner.lock();
            state.manual_disconnect = true;
            state.epoch = state.epoch.wrapping_add(1);
            // The abandoned flight resolves `Cancelled`; the next `connect`
            // must start fresh rather than join it.
            state.in_flight = None;
            if let Some(timer) = state.reconnect.take() {
                timer.task.abort();
            }
            state.runtime.backoff_ms = 0;
            self.inner.set_state(&mut state, ConnectionState::Disconnected);
            state.session.take()
        };
        tracing::info!("stream disconnected by request");
        if let Some(session) = session {
            session.shutdown().await;
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.lock().runtime.connection_state
    }

    pub fn status(&self) -> StatusInfo {
        self.inner.lock().runtime.snapshot(Utc::now())
    }

    /// Receives every state transition; drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn set_config_validity(&self, valid: bool) {
        self.inner.lock().runtime.config_valid = valid;
    }

    /// The config of the most recent `connect`.
    pub fn config(&self) -> Option<Arc<Config>> {
        self.inner.lock().config.clone()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock().reconnect.is_some()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: &mut ControllerState, next: ConnectionState) {
        if state.runtime.connection_state == next {
            return;
        }
        tracing::debug!(from = %state.runtime.connection_state, to = %next, "connection state");
        state.runtime.connection_state = next;
        let _ = self.state_tx.send(next);
    }

    /// Joins the in-flight attempt or starts a new one. The check and the
    /// slot assignment happen in one critical section.
    fn begin_connect(self: &Arc<Self>, config: Arc<Config>) -> SharedConnect {
        let mut state = self.lock();
        if let Some((_, flight)) = &state.in_flight {
            tracing::debug!("joining in-flight connect");
            return flight.clone();
        }

        let ws_url = match config
            .validate()
            .and_then(|()| build_stream_ws_url(&config.base_url, &config.token))
        {
            Ok(url) => url,
            Err(error) => {
                let error = ConnectError::InvalidConfig(error.to_string());
                tracing::warn!(%error, "refusing to connect");
                state.runtime.record_error(&error);
                return future::ready(Err::<(), _>(error)).boxed().shared();
            }
        };

        state.manual_disconnect = false;
        if let Some(timer) = state.reconnect.take() {
            timer.task.abort();
        }
        state.epoch = state.epoch.wrapping_add(1);
        let epoch = state.epoch;
        let previous = state.session.take();
        state.config = Some(config);
        self.set_state(&mut state, ConnectionState::Connecting);

        state.next_flight_id = state.next_flight_id.wrapping_add(1);
        let flight_id = state.next_flight_id;
        let task = tokio::spawn(self.clone().run_connect(flight_id, epoch, ws_url, previous));
        let flight = async move {
            task.await.unwrap_or_else(|error| {
                Err(ConnectError::Transport(TransportError::Open(format!(
                    "connect task failed: {error}"
                ))))
            })
        }
        .boxed()
        .shared();
        state.in_flight = Some((flight_id, flight.clone()));
        flight
    }

    async fn run_connect(
        self: Arc<Self>,
        flight_id: u64,
        epoch: u64,
        ws_url: String,
        previous: Option<Session>,
    ) -> Result<(), ConnectError> {
        let result = self.open_session(epoch, &ws_url, previous).await;
        let mut state = self.lock();
        if state.in_flight.as_ref().map(|(id, _)| *id) == Some(flight_id) {
            state.in_flight = None;
        }
        result
    }

    async fn open_session(
        self: &Arc<Self>,
        epoch: u64,
        ws_url: &str,
        previous: Option<Session>,
    ) -> Result<(), ConnectError> {
        if let Some(session) = previous {
            tracing::debug!("closing previous stream before reconnecting");
            session.shutdown().await;
        }

        tracing::info!(url = %redact_ws_url(ws_url), "connecting to stream");
        let timeout = Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS);
        let mut transport = match tokio::time::timeout(timeout, self.connector.open(ws_url)).await
        {
            Ok(Ok(transport)) => transport,
            Ok(Err(error)) => return Err(self.open_failed(epoch, error.into())),
            Err(_) => return Err(self.open_failed(epoch, ConnectError::Timeout(timeout))),
        };

        {
            let mut state = self.lock();
            if state.epoch == epoch && !state.manual_disconnect {
                let (stop_tx, stop_rx) = watch::channel(false);
                let task = tokio::spawn(self.clone().run_session(epoch, transport, stop_rx));
                state.session = Some(Session { stop_tx, task });

                let now = Utc::now();
                state.runtime.reconnect_attempts = 0;
                state.runtime.backoff_ms = 0;
                state.runtime.last_error = None;
                state.runtime.last_connected_at = Some(now);
                state.runtime.last_stream_event_at = Some(now);
                self.set_state(&mut state, ConnectionState::Connected);
                drop(state);

                tracing::info!("stream connected");
                self.spawn_backlog_sync();
                return Ok(());
            }
        }

        tracing::debug!("stream opened after teardown, closing it");
        transport.close().await;
        Err(ConnectError::Cancelled)
    }

    fn open_failed(self: &Arc<Self>, epoch: u64, error: ConnectError) -> ConnectError {
        tracing::warn!(%error, "stream connection failed");
        let mut state = self.lock();
        if state.epoch == epoch && !state.manual_disconnect {
            state.runtime.record_error(&error);
            if error.is_retryable() {
                self.schedule_reconnect(&mut state);
            }
        }
        error
    }

    fn spawn_backlog_sync(&self) {
        let Some(reconciler) = self.reconciler.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(error) = reconciler.sync().await {
                tracing::debug!(%error, "backlog sync after connect failed");
            }
        });
    }

    async fn run_session(
        self: Arc<Self>,
        epoch: u64,
        mut transport: Box<dyn Transport>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut keepalive =
            tokio::time::interval(Duration::from_secs(STREAM_KEEPALIVE_INTERVAL_SECS));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);
        keepalive.tick().await;

        let failure = loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        transport.close().await;
                        tracing::debug!("stream session stopped");
                        return;
                    }
                }
                incoming = transport.recv() => {
                    match incoming {
                        Some(Ok(Frame::Text(text))) => self.dispatch(&text),
                        Some(Ok(Frame::Ping(payload))) => {
                            self.mark_activity(None);
                            if let Err(error) = transport.send(Frame::Pong(payload)).await {
                                break error;
                            }
                        }
                        Some(Ok(Frame::Pong(_))) | Some(Ok(Frame::Other)) => self.mark_activity(None),
                        Some(Ok(Frame::Close(reason))) => break TransportError::Closed(reason),
                        Some(Err(error)) => break error,
                        None => break TransportError::Ended,
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(error) = transport.send(Frame::Ping(Vec::new())).await {
                        break error;
                    }
                    tracing::trace!("keepalive ping sent");
                }
            }
        };

        transport.close().await;
        self.session_failed(epoch, failure);
    }

    fn mark_activity(&self, message_id: Option<i64>) {
        let mut state = self.lock();
        state.runtime.last_stream_event_at = Some(Utc::now());
        if message_id.is_some() {
            state.runtime.last_message_id = message_id;
        }
    }

    fn dispatch(&self, text: &str) {
        let message = match parse_stream_message(text) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "dropping malformed stream frame");
                self.mark_activity(None);
                return;
            }
        };
        tracing::debug!(
            id = message.id,
            title = %truncate_message(&message.title, 60),
            "message received"
        );
        self.mark_activity(Some(message.id));

        let router = self.router.clone();
        tokio::spawn(async move {
            router.route(&message).await;
        });
    }

    fn session_failed(self: &Arc<Self>, epoch: u64, error: TransportError) {
        let mut state = self.lock();
        if state.epoch != epoch || state.manual_disconnect {
            tracing::debug!(%error, "ignoring end of superseded stream session");
            return;
        }
        tracing::warn!(%error, "stream session ended");
        state.session = None;
        state.runtime.record_error(&error);
        self.schedule_reconnect(&mut state);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ControllerState) {
        self.set_state(state, ConnectionState::Error);
        self.set_state(state, ConnectionState::Disconnected);
        let Some(config) = state.config.clone() else {
            return;
        };

        let attempt = state.runtime.reconnect_attempts;
        let delay = backoff_delay(attempt);
        state.runtime.reconnect_attempts = attempt.saturating_add(1);
        state.runtime.backoff_ms = delay.as_millis() as u64;

        state.next_timer_token = state.next_timer_token.wrapping_add(1);
        let token = state.next_timer_token;
        let inner = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.claim_reconnect(token) {
                return;
            }
            tracing::info!("reconnecting to stream");
            if let Err(error) = inner.begin_connect(config).await {
                tracing::debug!(%error, "reconnect attempt failed");
            }
        });
        if let Some(previous) = state.reconnect.replace(ReconnectTimer { token, task }) {
            previous.task.abort();
        }
        self.set_state(state, ConnectionState::Reconnecting);

        tracing::warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "stream reconnect scheduled"
        );
        let notifier = self.notifier.clone();
        let body = format!("Reconnecting in {}s", delay.as_secs());
        tokio::spawn(async move {
            notifier.notify(Notice::warning("Connection lost", body)).await;
        });
    }

    /// The timer removes its own slot before connecting so the connect does
    /// not abort the task running it.
    fn claim_reconnect(&self, token: u64) -> bool {
        let mut state = self.lock();
        if state.manual_disconnect
            || state.reconnect.as_ref().map(|timer| timer.token) != Some(token)
        {
            return false;
        }
        state.reconnect = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let delays: Vec<u64> = (0..9)
            .map(|attempt| backoff_delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000, 60_000]
        );
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(60_000));
    }
}
