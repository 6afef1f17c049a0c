//! The canonical message exchanged between bridges and the gateway.

use std::collections::BTreeMap;

use {
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

/// Reserved text carried by deletion messages.
pub const EVENT_MSG_DELETE: &str = "msg_delete";

/// Reserved username for membership, topic and file-comment events.
pub const SYSTEM_USER: &str = "system";

/// Well-known keys of [`Extra`].
pub mod extra_keys {
    /// Downloaded files, one [`super::ExtraPayload::File`] per file.
    pub const FILE: &str = "file";
    /// Files that were not downloaded because they exceed the size limit.
    pub const FILE_FAILURE_SIZE: &str = "file_failure_size";
}

/// What kind of event a canonical message represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageEvent {
    /// An ordinary message.
    #[default]
    #[serde(rename = "")]
    None,
    /// A "/me" style action.
    UserAction,
    /// Someone joined or left the channel.
    JoinLeave,
    /// The channel topic or purpose changed.
    TopicChange,
    /// A previously relayed message was deleted.
    MsgDelete,
}

impl MessageEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::UserAction => "user_action",
            Self::JoinLeave => "join_leave",
            Self::TopicChange => "topic_change",
            Self::MsgDelete => EVENT_MSG_DELETE,
        }
    }
}

impl std::fmt::Display for MessageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file carried by a message, held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    /// Declared size in bytes, as reported by the source platform.
    pub size: u64,
    #[serde(skip)]
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A typed side-payload stored in [`Extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtraPayload {
    /// Opaque platform data passed through verbatim (e.g. attachment blobs).
    Json(serde_json::Value),
    File(FileInfo),
}

impl ExtraPayload {
    pub fn as_file(&self) -> Option<&FileInfo> {
        match self {
            Self::File(file) => Some(file),
            Self::Json(_) => None,
        }
    }
}

/// Side-payloads keyed by capability tag.
///
/// Keys are open-ended; payloads under one key keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extra(BTreeMap<String, Vec<ExtraPayload>>);

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, payload: ExtraPayload) {
        self.0.entry(key.into()).or_default().push(payload);
    }

    pub fn get(&self, key: &str) -> &[ExtraPayload] {
        self.0.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Files stored under [`extra_keys::FILE`], in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &FileInfo> {
        self.get(extra_keys::FILE)
            .iter()
            .filter_map(ExtraPayload::as_file)
    }
}

/// The normalized, platform-agnostic record handed to the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalMessage {
    /// `"<platform-tag> <source-timestamp>"`.
    pub id: String,
    pub text: String,
    pub username: String,
    pub user_id: String,
    pub channel: String,
    /// Bridge account the message arrived on, e.g. `slack.work`.
    pub account: String,
    pub avatar: String,
    pub event: MessageEvent,
    pub extra: Extra,
}

impl CanonicalMessage {
    pub fn has_files(&self) -> bool {
        self.extra.files().next().is_some()
    }
}
