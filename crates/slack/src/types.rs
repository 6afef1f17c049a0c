//! Slack wire types: RTM frames, message events and Web API objects.

use serde::{Deserialize, Serialize};

/// Discriminator narrowing what a `message` event means.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum MessageSubtype {
    /// A plain user message (no subtype).
    #[default]
    Plain,
    MeMessage,
    MessageChanged,
    MessageDeleted,
    MessageReplied,
    ChannelJoin,
    ChannelLeave,
    ChannelTopic,
    ChannelPurpose,
    FileComment,
    FileShare,
    PinnedItem,
    UnpinnedItem,
    BotMessage,
    Other(String),
}

impl From<String> for MessageSubtype {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => Self::Plain,
            "me_message" => Self::MeMessage,
            "message_changed" => Self::MessageChanged,
            "message_deleted" => Self::MessageDeleted,
            "message_replied" => Self::MessageReplied,
            "channel_join" => Self::ChannelJoin,
            "channel_leave" => Self::ChannelLeave,
            "channel_topic" => Self::ChannelTopic,
            "channel_purpose" => Self::ChannelPurpose,
            "file_comment" => Self::FileComment,
            "file_share" => Self::FileShare,
            "pinned_item" => Self::PinnedItem,
            "unpinned_item" => Self::UnpinnedItem,
            "bot_message" => Self::BotMessage,
            _ => Self::Other(value),
        }
    }
}

impl MessageSubtype {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain => "",
            Self::MeMessage => "me_message",
            Self::MessageChanged => "message_changed",
            Self::MessageDeleted => "message_deleted",
            Self::MessageReplied => "message_replied",
            Self::ChannelJoin => "channel_join",
            Self::ChannelLeave => "channel_leave",
            Self::ChannelTopic => "channel_topic",
            Self::ChannelPurpose => "channel_purpose",
            Self::FileComment => "file_comment",
            Self::FileShare => "file_share",
            Self::PinnedItem => "pinned_item",
            Self::UnpinnedItem => "unpinned_item",
            Self::BotMessage => "bot_message",
            Self::Other(s) => s,
        }
    }

    pub fn is_join_leave(&self) -> bool {
        matches!(self, Self::ChannelJoin | Self::ChannelLeave)
    }
}

/// A `message` event as delivered by the RTM session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlackMessageEvent {
    pub subtype: MessageSubtype,
    pub channel: String,
    pub user: String,
    /// Display name override set by bots and webhooks.
    pub username: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: String,
    pub deleted_ts: String,
    pub bot_id: String,
    pub attachments: Vec<Attachment>,
    pub files: Vec<SlackFile>,
    /// Embedded message carried by `message_changed`/`message_replied`.
    #[serde(rename = "message")]
    pub sub_message: Option<Box<SubMessage>>,
}

impl SlackMessageEvent {
    /// The embedded message when this event is shaped like an edit: Slack
    /// reports thread updates with `thread_ts == ts`, real edits differ.
    pub fn edit_submessage(&self) -> Option<&SubMessage> {
        self.sub_message
            .as_deref()
            .filter(|sub| sub.thread_ts != sub.ts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SubMessage {
    pub user: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: String,
    /// Present only when a human edited the message; unfurls leave it unset.
    pub edited: Option<Edited>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Edited {
    pub user: String,
    pub ts: String,
}

/// A legacy message attachment. Unknown fields are kept so the attachment
/// can be passed through to other Slack-compatible bridges unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub callback_id: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlackFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub url_private_download: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlackUser {
    pub id: String,
    pub name: String,
    pub deleted: bool,
    pub profile: UserProfile,
}

impl SlackUser {
    /// Profile display name when set, account name otherwise.
    pub fn display_name(&self) -> &str {
        if self.profile.display_name.is_empty() {
            &self.name
        } else {
            &self.profile.display_name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub display_name: String,
    pub real_name: String,
    pub image_48: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlackBot {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlackChannel {
    pub id: String,
    pub name: String,
    pub is_private: bool,
}

/// Session details returned by `rtm.connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    pub url: String,
    #[serde(rename = "self")]
    pub self_user: SlackBot,
    pub team: Team,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub domain: String,
}

/// Events produced by the live session reader.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session was (re-)established.
    Connected(ConnectionInfo),
    Message(Box<SlackMessageEvent>),
    /// We were added to a channel.
    ChannelJoined { channel: SlackChannel },
    /// Slack rejected something we sent over the socket.
    OutgoingError(String),
    /// The token was rejected; the session will not reconnect.
    InvalidAuth(String),
    /// The socket failed; the reader reconnects after a backoff.
    ConnectionError(String),
    /// Anything the bridge does not act on (typing, presence, ...).
    Other(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RtmFrame {
    Message(Box<SlackMessageEvent>),
    ChannelJoined {
        channel: SlackChannel,
    },
    Error {
        #[serde(default)]
        error: RtmError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RtmError {
    code: i64,
    msg: String,
}

impl SessionEvent {
    /// Decode one RTM text frame.
    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        if kind.is_empty() {
            // Acknowledgement of something we sent (`{"ok":true,"reply_to":1}`).
            return Ok(Self::Other("reply".into()));
        }

        Ok(match serde_json::from_value(value)? {
            RtmFrame::Message(ev) => Self::Message(ev),
            RtmFrame::ChannelJoined { channel } => Self::ChannelJoined { channel },
            RtmFrame::Error { error } => {
                Self::OutgoingError(format!("{} (code {})", error.msg, error.code))
            },
            RtmFrame::Unknown => Self::Other(kind),
        })
    }
}
