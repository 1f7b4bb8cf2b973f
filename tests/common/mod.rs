//! Fakes shared by the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use droplink::{
    error::{ConfigError, FetchError, HandlerError, OpenError, TransportError},
    messages::HistoryClient,
    model::PushMessage,
    notifications::{Notice, Notifier},
    router::{HandlerOutcome, MessageContext, MessageHandler},
    settings::{Config, ConfigStore},
    tabs::TabOpener,
    transport::{Connector, Frame, Transport},
};
use serde_json::json;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

pub const TOKEN: &str = "Abcdef12345";

pub fn valid_config() -> Config {
    Config {
        base_url: "http://push.test".into(),
        token: TOKEN.into(),
        ..Config::default()
    }
}

/// Lets every runnable task make progress; under paused time this also
/// nudges the clock forward by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn directive_message(id: i64, date: &str, url: &str) -> PushMessage {
    serde_json::from_value(json!({
        "id": id,
        "appid": 1,
        "title": format!("link {id}"),
        "message": "open me",
        "priority": 5,
        "date": date,
        "extras": {"directive": {
            "content": {"type": "url", "value": url},
            "actions": [{"type": "openTab"}]
        }}
    }))
    .expect("directive message")
}

pub fn directive_json(id: i64, url: &str) -> String {
    json!({
        "id": id,
        "appid": 1,
        "message": "open me",
        "title": "t",
        "priority": 5,
        "date": "2026-05-01T12:00:00Z",
        "extras": {"directive": {
            "content": {"type": "url", "value": url},
            "actions": [{"type": "openTab"}]
        }}
    })
    .to_string()
}

// ---- stream transport ----

#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    Refuse,
    /// Never completes; only a timeout ends the attempt.
    Hang,
    DelayAccept(Duration),
}

/// Server side of one accepted fake transport.
pub struct ServerLink {
    frames: Mutex<Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
}

impl ServerLink {
    pub fn push(&self, frame: Frame) {
        if let Some(frames) = self.frames.lock().unwrap().as_ref() {
            let _ = frames.send(Ok(frame));
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Frame::Text(text.into()));
    }

    pub fn fail(&self, error: TransportError) {
        if let Some(frames) = self.frames.lock().unwrap().as_ref() {
            let _ = frames.send(Err(error));
        }
    }

    /// The client's next read sees the stream end.
    pub fn hang_up(&self) {
        self.frames.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeConnector {
    plans: Mutex<VecDeque<Plan>>,
    opens: AtomicUsize,
    open_times: Mutex<Vec<Instant>>,
    urls: Mutex<Vec<String>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    links: Mutex<Vec<Arc<ServerLink>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Plans are consumed per `open`; once exhausted every open is accepted.
    pub fn with_plans(plans: impl IntoIterator<Item = Plan>) -> Arc<Self> {
        let connector = Self::default();
        connector.plans.lock().unwrap().extend(plans);
        Arc::new(connector)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn link(&self, index: usize) -> Arc<ServerLink> {
        self.links.lock().unwrap()[index].clone()
    }

    pub fn links(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    fn accept(&self) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.links.lock().unwrap().push(Arc::new(ServerLink {
            frames: Mutex::new(Some(tx)),
            sent: sent.clone(),
            closed: closed.clone(),
        }));
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        Box::new(FakeTransport {
            incoming: rx,
            sent,
            closed,
            active: self.active.clone(),
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_times.lock().unwrap().push(Instant::now());
        self.urls.lock().unwrap().push(url.to_string());
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Accept);
        match plan {
            Plan::Accept => Ok(self.accept()),
            Plan::Refuse => Err(TransportError::Open("connection refused".into())),
            Plan::Hang => {
                futures_util::future::pending::<()>().await;
                Err(TransportError::Ended)
            }
            Plan::DelayAccept(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept())
            }
        }
    }
}

pub struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl FakeTransport {
    fn release(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.incoming.recv().await
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Send("transport closed".into()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.release();
    }
}

// ---- ports ----

pub struct MemoryConfigStore {
    current: watch::Sender<Arc<Config>>,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Arc<Self> {
        let (current, _) = watch::channel(Arc::new(config));
        Arc::new(Self { current })
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Arc<Config>, ConfigError> {
        Ok(self.current.borrow().clone())
    }

    async fn save(&self, config: Config) -> Result<Arc<Config>, ConfigError> {
        let snapshot = Arc::new(config.normalized());
        self.current.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.current.subscribe()
    }
}

#[derive(Default)]
pub struct FakeHistoryClient {
    messages: Mutex<Vec<PushMessage>>,
    failure: Mutex<Option<FetchError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    limits: Mutex<Vec<u32>>,
}

impl FakeHistoryClient {
    pub fn new(messages: Vec<PushMessage>) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(messages),
            ..Self::default()
        })
    }

    pub fn slow(messages: Vec<PushMessage>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(messages),
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn failing(error: FetchError) -> Arc<Self> {
        Arc::new(Self {
            failure: Mutex::new(Some(error)),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn limits(&self) -> Vec<u32> {
        self.limits.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryClient for FakeHistoryClient {
    async fn fetch_recent(
        &self,
        _config: &Config,
        limit: u32,
    ) -> Result<Vec<PushMessage>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.limits.lock().unwrap().push(limit);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let messages = self.messages.lock().unwrap();
        Ok(messages.iter().take(limit as usize).cloned().collect())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[derive(Debug, Clone)]
pub struct OpenedTab {
    pub url: String,
    pub activate: bool,
    pub at: Instant,
}

#[derive(Default)]
pub struct FakeTabOpener {
    opened: Mutex<Vec<OpenedTab>>,
}

impl FakeTabOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<OpenedTab> {
        self.opened.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.opened().into_iter().map(|tab| tab.url).collect()
    }
}

#[async_trait]
impl TabOpener for FakeTabOpener {
    async fn open(&self, url: &str, activate: bool) -> Result<(), OpenError> {
        self.opened.lock().unwrap().push(OpenedTab {
            url: url.to_string(),
            activate,
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Records every message id it is handed.
pub struct RecordingHandler {
    action: &'static str,
    seen: Mutex<Vec<i64>>,
}

impl RecordingHandler {
    pub fn new(action: &'static str) -> Arc<Self> {
        Arc::new(Self {
            action,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<i64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    fn action(&self) -> &str {
        self.action
    }

    fn validate(&self, _message: &PushMessage) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &PushMessage,
        _context: &MessageContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.seen.lock().unwrap().push(message.id);
        Ok(HandlerOutcome::Handled)
    }
}
