use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;

use crate::{
    consts::{
        DEFAULT_BATCH_OPEN_INTERVAL_MS, DEFAULT_FETCH_HISTORY_LIMIT, DEFAULT_LOCAL_OWNER,
        DEFAULT_MAX_OPEN_TABS, MAX_BATCH_OPEN_INTERVAL_MS, MAX_FETCH_HISTORY_LIMIT,
        MAX_OPEN_TABS_LIMIT, MIN_BATCH_OPEN_INTERVAL_MS,
    },
    core::{back_up_corrupt_file, write_json_atomic},
    error::{ConfigError, StorageError},
};

/// Immutable configuration snapshot. Replaced wholesale on change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub token: String,
    pub history_sync_enabled: bool,
    pub notify_on_open: bool,
    pub show_batch_notification: bool,
    pub show_all_notifications: bool,
    pub fetch_history_limit: u32,
    pub max_open_tabs: u32,
    pub batch_open_interval_ms: u64,
    pub local_owner: String,
    pub min_priority: i64,
    pub quiet_hours_start: Option<u8>,
    pub quiet_hours_end: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            history_sync_enabled: true,
            notify_on_open: false,
            show_batch_notification: true,
            show_all_notifications: false,
            fetch_history_limit: DEFAULT_FETCH_HISTORY_LIMIT,
            max_open_tabs: DEFAULT_MAX_OPEN_TABS,
            batch_open_interval_ms: DEFAULT_BATCH_OPEN_INTERVAL_MS,
            local_owner: DEFAULT_LOCAL_OWNER.to_string(),
            min_priority: 0,
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }
}

impl Config {
    /// Clamps every tunable into its supported range.
    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.token = self.token.trim().to_string();
        self.fetch_history_limit = self.fetch_history_limit.clamp(1, MAX_FETCH_HISTORY_LIMIT);
        self.max_open_tabs = self.max_open_tabs.clamp(1, MAX_OPEN_TABS_LIMIT);
        self.batch_open_interval_ms = self
            .batch_open_interval_ms
            .clamp(MIN_BATCH_OPEN_INTERVAL_MS, MAX_BATCH_OPEN_INTERVAL_MS);
        if self.local_owner.trim().is_empty() {
            self.local_owner = DEFAULT_LOCAL_OWNER.to_string();
        }
        self.min_priority = self.min_priority.clamp(0, 10);
        self.quiet_hours_start = self.quiet_hours_start.map(|h| h % 24);
        self.quiet_hours_end = self.quiet_hours_end.map(|h| h % 24);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_base_url(&self.base_url)?;
        if !is_plausible_token(&self.token) {
            return Err(ConfigError::Invalid(
                "Client token must be at least 10 characters of [A-Za-z0-9._-]".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether moving from `previous` to `self` requires a new stream.
    pub fn needs_reconnect(&self, previous: &Config) -> bool {
        self.base_url != previous.base_url || self.token != previous.token
    }
}

pub fn normalize_base_url(input: &str) -> Result<String, ConfigError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid("Server URL is required".to_string()));
    }

    let url = reqwest::Url::parse(trimmed)
        .map_err(|error| ConfigError::Invalid(format!("Invalid server URL: {error}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::Invalid(
            "Server URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

pub fn is_plausible_token(token: &str) -> bool {
    let trimmed = token.trim();
    if trimmed.len() < 10 {
        return false;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return false;
    }
    let first = trimmed.chars().next();
    !trimmed.chars().all(|c| Some(c) == first)
}

/// `http`→`ws`, `https`→`wss`, `/stream` appended to the existing path, and
/// the client token carried as the `token` query parameter.
pub fn build_stream_ws_url(base_url: &str, token: &str) -> Result<String, ConfigError> {
    let mut ws_url = reqwest::Url::parse(base_url.trim())
        .map_err(|error| ConfigError::Invalid(format!("Invalid server URL: {error}")))?;

    match ws_url.scheme() {
        "http" => {
            ws_url
                .set_scheme("ws")
                .map_err(|_| ConfigError::Invalid("Unable to convert URL scheme to ws".into()))?;
        }
        "https" => {
            ws_url
                .set_scheme("wss")
                .map_err(|_| ConfigError::Invalid("Unable to convert URL scheme to wss".into()))?;
        }
        _ => {
            return Err(ConfigError::Invalid(
                "Server URL must start with http:// or https://".to_string(),
            ))
        }
    }

    let mut path = ws_url.path().trim_end_matches('/').to_string();
    path.push_str("/stream");
    ws_url.set_path(&path);
    ws_url.set_query(None);
    ws_url.query_pairs_mut().append_pair("token", token.trim());
    Ok(ws_url.to_string())
}

/// Persisted configuration with change notifications.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Arc<Config>, ConfigError>;

    async fn save(&self, config: Config) -> Result<Arc<Config>, ConfigError>;

    /// Every saved or reloaded snapshot is published to subscribers.
    fn subscribe(&self) -> watch::Receiver<Arc<Config>>;
}

/// JSON settings file, written atomically with owner-only permissions.
pub struct FileConfigStore {
    path: PathBuf,
    current: watch::Sender<Arc<Config>>,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let initial = read_settings(&path)?;
        let (current, _) = watch::channel(Arc::new(initial));
        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file and publishes it if it differs from the last
    /// snapshot. Returns whether anything changed.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let fresh = read_settings(&self.path)?;
        Ok(self.current.send_if_modified(|current| {
            if **current == fresh {
                return false;
            }
            *current = Arc::new(fresh);
            true
        }))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<Arc<Config>, ConfigError> {
        Ok(self.current.borrow().clone())
    }

    async fn save(&self, config: Config) -> Result<Arc<Config>, ConfigError> {
        let config = config.normalized();
        normalize_base_url(&config.base_url)?;
        write_json_atomic(&self.path, &config, "settings")?;
        let snapshot = Arc::new(config);
        self.current.send_replace(snapshot.clone());
        tracing::debug!(path = %self.path.display(), "settings written to disk");
        Ok(snapshot)
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.current.subscribe()
    }
}

pub fn read_settings(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|source| StorageError::Read {
        what: "settings",
        source,
    })?;
    match serde_json::from_str::<Config>(&content) {
        Ok(config) => Ok(config.normalized()),
        Err(source) => {
            back_up_corrupt_file(path);
            Err(StorageError::Parse {
                what: "settings",
                source,
            }
            .into())
        }
    }
}

/// `$DROPLINK_CONFIG`, else `$XDG_CONFIG_HOME/droplink/settings.json`, else
/// `$HOME/.config/droplink/settings.json`.
pub fn default_settings_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os("DROPLINK_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_dir.join("droplink").join("settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_swaps_scheme_and_appends_stream() {
        assert_eq!(
            build_stream_ws_url("http://push.test", "Abcdef12345").unwrap(),
            "ws://push.test/stream?token=Abcdef12345"
        );
        assert_eq!(
            build_stream_ws_url("https://push.test/gotify/", "Abcdef12345").unwrap(),
            "wss://push.test/gotify/stream?token=Abcdef12345"
        );
        assert_eq!(
            build_stream_ws_url("https://push.test:8443/gotify", "Abcdef12345").unwrap(),
            "wss://push.test:8443/gotify/stream?token=Abcdef12345"
        );
    }

    #[test]
    fn stream_url_rejects_other_schemes() {
        assert!(build_stream_ws_url("ftp://push.test", "Abcdef12345").is_err());
        assert!(build_stream_ws_url("", "Abcdef12345").is_err());
    }

    #[test]
    fn normalization_clamps_tunables() {
        let config = Config {
            base_url: " https://push.test/ ".into(),
            fetch_history_limit: 0,
            max_open_tabs: 500,
            batch_open_interval_ms: 5,
            local_owner: " ".into(),
            min_priority: 42,
            quiet_hours_start: Some(25),
            ..Config::default()
        }
        .normalized();

        assert_eq!(config.base_url, "https://push.test");
        assert_eq!(config.fetch_history_limit, 1);
        assert_eq!(config.max_open_tabs, MAX_OPEN_TABS_LIMIT);
        assert_eq!(config.batch_open_interval_ms, MIN_BATCH_OPEN_INTERVAL_MS);
        assert_eq!(config.local_owner, DEFAULT_LOCAL_OWNER);
        assert_eq!(config.min_priority, 10);
        assert_eq!(config.quiet_hours_start, Some(1));
    }

    #[test]
    fn token_plausibility() {
        assert!(is_plausible_token("AbC.def_12-3"));
        assert!(!is_plausible_token("short"));
        assert!(!is_plausible_token("0000000000"));
        assert!(!is_plausible_token("has spaces inside"));
    }

    #[test]
    fn validity_requires_url_and_token() {
        let mut config = Config {
            base_url: "https://push.test".into(),
            token: "Abcdef12345".into(),
            ..Config::default()
        };
        assert!(config.is_valid());
        config.base_url = "push.test".into();
        assert!(!config.is_valid());
    }

    #[test]
    fn reconnect_needed_only_for_endpoint_changes() {
        let base = Config {
            base_url: "https://push.test".into(),
            token: "Abcdef12345".into(),
            ..Config::default()
        };
        let tweaked = Config {
            max_open_tabs: 3,
            ..base.clone()
        };
        let moved = Config {
            token: "Zyxwvu98765".into(),
            ..base.clone()
        };
        assert!(!tweaked.needs_reconnect(&base));
        assert!(moved.needs_reconnect(&base));
    }

    #[tokio::test]
    async fn file_store_round_trips_and_publishes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let store = FileConfigStore::open(&path).expect("open");
        assert_eq!(*store.load().await.unwrap(), Config::default());

        let mut changes = store.subscribe();
        let saved = store
            .save(Config {
                base_url: "https://push.test/".into(),
                token: "Abcdef12345".into(),
                ..Config::default()
            })
            .await
            .expect("save");
        assert_eq!(saved.base_url, "https://push.test");
        assert!(changes.has_changed().unwrap());
        assert_eq!(changes.borrow_and_update().base_url, "https://push.test");

        let reopened = FileConfigStore::open(&path).expect("reopen");
        assert_eq!(*reopened.load().await.unwrap(), *saved);
    }

    #[tokio::test]
    async fn reload_publishes_external_edits_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let store = FileConfigStore::open(&path).expect("open");
        assert!(!store.reload().unwrap());

        fs::write(&path, r#"{"base_url": "http://edited.test", "max_open_tabs": 3}"#).unwrap();
        assert!(store.reload().unwrap());
        assert!(!store.reload().unwrap());
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.base_url, "http://edited.test");
        assert_eq!(loaded.max_open_tabs, 3);
        assert_eq!(loaded.fetch_history_limit, DEFAULT_FETCH_HISTORY_LIMIT);
    }

    #[test]
    fn corrupt_settings_are_moved_aside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(read_settings(&path).is_err());
        assert!(!path.exists());
        assert_eq!(read_settings(&path).unwrap(), Config::default());
    }
}
