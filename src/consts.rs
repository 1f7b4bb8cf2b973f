pub const DEFAULT_FETCH_HISTORY_LIMIT: u32 = 100;
pub const MAX_FETCH_HISTORY_LIMIT: u32 = 200;
pub const DEFAULT_MAX_OPEN_TABS: u32 = 10;
pub const MAX_OPEN_TABS_LIMIT: u32 = 50;
pub const DEFAULT_BATCH_OPEN_INTERVAL_MS: u64 = 300;
pub const MIN_BATCH_OPEN_INTERVAL_MS: u64 = 100;
pub const MAX_BATCH_OPEN_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_LOCAL_OWNER: &str = "desktop";

pub const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const STREAM_KEEPALIVE_INTERVAL_SECS: u64 = 20;
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 60_000;

pub const HISTORY_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const MAX_PROCESSED_IDS: usize = 1000;

pub const OPEN_URL_ACTION: &str = "openTab";
pub const NOTIFY_ACTION: &str = "notification";
pub const URL_CONTENT_KIND: &str = "url";

pub const CONFIG_POLL_INTERVAL_SECS: u64 = 5;
