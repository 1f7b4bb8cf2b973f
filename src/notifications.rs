use async_trait::async_trait;
use chrono::Timelike;
use serde::Serialize;
use std::time::Duration;

use crate::core::truncate_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeLevel {
    /// How long a renderer should keep the notice on screen.
    pub fn auto_dismiss(self) -> Duration {
        match self {
            Self::Info | Self::Success => Duration::from_secs(5),
            Self::Warning => Duration::from_secs(6),
            Self::Error => Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, body)
    }

    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title, body)
    }

    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, body)
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, body)
    }
}

/// User-visible notices. Rendering is up to the embedding application;
/// delivery is best-effort and never fails the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice);
}

/// Writes notices to the log instead of the desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: Notice) {
        let body = truncate_message(&notice.body, 220);
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                tracing::info!(title = %notice.title, %body, "notice")
            }
            NoticeLevel::Warning => tracing::warn!(title = %notice.title, %body, "notice"),
            NoticeLevel::Error => tracing::error!(title = %notice.title, %body, "notice"),
        }
    }
}

pub fn is_quiet_hours(start: Option<u8>, end: Option<u8>) -> bool {
    is_quiet_hour(start, end, chrono::Local::now().hour() as u8)
}

/// Quiet hours wrap around midnight when `start > end`; `start == end` means
/// the whole day.
pub fn is_quiet_hour(start: Option<u8>, end: Option<u8>, now: u8) -> bool {
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => return false,
    };

    if start == end {
        return true;
    }
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}
