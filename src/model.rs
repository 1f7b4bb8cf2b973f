use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::consts::{OPEN_URL_ACTION, URL_CONTENT_KIND};

/// One Gotify message, as delivered on the stream or by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub id: i64,
    #[serde(rename = "appid", default)]
    pub app_id: i64,
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<MessageExtras>,
}

impl PushMessage {
    pub fn directive(&self) -> Option<&Directive> {
        self.extras.as_ref()?.directive.as_ref()
    }

    /// `None` when the server sent no date or one that is not ISO-8601.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.date.trim())
            .ok()
            .map(|date| date.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageExtras {
    /// Older senders used the `droplink` key. A directive of the wrong shape
    /// is treated as absent rather than failing the whole message.
    #[serde(
        default,
        alias = "droplink",
        deserialize_with = "lenient_directive",
        skip_serializing_if = "Option::is_none"
    )]
    pub directive: Option<Directive>,
}

fn lenient_directive<'de, D>(deserializer: D) -> Result<Option<Directive>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match serde_json::from_value::<Directive>(value) {
        Ok(directive) => Some(directive),
        Err(error) => {
            tracing::debug!(%error, "ignoring directive with unexpected shape");
            None
        }
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub content: DirectiveContent,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Directive {
    /// The target URL when the content is a non-empty http(s) URL.
    pub fn url(&self) -> Option<&str> {
        if self.content.kind != URL_CONTENT_KIND {
            return None;
        }
        let value = self.content.value.trim();
        if value.is_empty() || !is_http_url(value) {
            return None;
        }
        Some(value)
    }

    pub fn local_actions<'a>(
        &'a self,
        kind: &'a str,
        local_owner: &'a str,
    ) -> impl Iterator<Item = &'a ActionSpec> + 'a {
        self.actions
            .iter()
            .filter(move |action| action.kind == kind && action.is_local(local_owner))
    }

    /// A valid URL plus at least one `openTab` action this client owns.
    pub fn is_openable_by(&self, local_owner: &str) -> bool {
        self.url().is_some()
            && self
                .local_actions(OPEN_URL_ACTION, local_owner)
                .next()
                .is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    /// Owner tag; absent or blank means "any consumer".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl ActionSpec {
    pub fn is_local(&self, local_owner: &str) -> bool {
        match self.handler.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(owner) => owner.eq_ignore_ascii_case(local_owner.trim()),
        }
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.as_ref()?.get(key)?.as_bool()
    }
}

pub fn is_http_url(value: &str) -> bool {
    match reqwest::Url::parse(value.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
