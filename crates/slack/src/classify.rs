//! Folds one Slack message event into a [`CanonicalMessage`].
//!
//! Identity and channel lookups run first, in order; the purely structural
//! rewrites (system attribution, actions, edit and delete IDs, topic
//! changes) are an ordered [`FIELD_RULES`] table applied afterwards, later
//! rules overriding earlier ones.

use std::sync::Arc;

use {
    ferry_channels::{CanonicalMessage, EVENT_MSG_DELETE, ExtraPayload, MessageEvent, SYSTEM_USER},
    tracing::{debug, warn},
};

use crate::{
    PLATFORM_TAG,
    api::SlackApi,
    config::SlackAccountConfig,
    directory::Directory,
    error::{Error, Result},
    files::FileRelay,
    types::{MessageSubtype, SlackMessageEvent, SlackUser},
};

/// `Extra` key for Slack attachments passed through to other bridges.
pub const EXTRA_SLACK_ATTACHMENT: &str = "slack_attachment";

/// A structural rewrite applied after lookups.
pub struct FieldRule {
    pub name: &'static str,
    pub matches: fn(&SlackMessageEvent) -> bool,
    pub apply: fn(&SlackMessageEvent, &mut CanonicalMessage),
}

/// Applied in order; each matching rule refines the message further.
pub static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        name: "file_comment_system",
        matches: |ev| ev.subtype == MessageSubtype::FileComment,
        apply: |_, msg| msg.username = SYSTEM_USER.into(),
    },
    FieldRule {
        name: "me_message_action",
        matches: |ev| ev.subtype == MessageSubtype::MeMessage,
        apply: |_, msg| msg.event = MessageEvent::UserAction,
    },
    FieldRule {
        name: "join_leave",
        matches: |ev| ev.subtype.is_join_leave(),
        apply: |_, msg| {
            msg.username = SYSTEM_USER.into();
            msg.event = MessageEvent::JoinLeave;
        },
    },
    FieldRule {
        name: "edit_timestamp",
        matches: |ev| ev.sub_message.is_some(),
        apply: |ev, msg| {
            if let Some(sub) = &ev.sub_message {
                msg.id = message_id(&sub.ts);
            }
        },
    },
    FieldRule {
        name: "deletion",
        matches: |ev| ev.subtype == MessageSubtype::MessageDeleted,
        apply: |ev, msg| {
            msg.text = EVENT_MSG_DELETE.into();
            msg.event = MessageEvent::MsgDelete;
            msg.id = message_id(&ev.deleted_ts);
        },
    },
    FieldRule {
        name: "topic_change",
        matches: |ev| {
            matches!(
                ev.subtype,
                MessageSubtype::ChannelTopic | MessageSubtype::ChannelPurpose
            )
        },
        apply: |_, msg| msg.event = MessageEvent::TopicChange,
    },
];

fn message_id(ts: &str) -> String {
    format!("{PLATFORM_TAG} {ts}")
}

fn apply_user(msg: &mut CanonicalMessage, user: &SlackUser) {
    msg.user_id = user.id.clone();
    msg.username = user.display_name().to_string();
}

/// Text from attachments, for messages that carry none of their own.
/// Every attachment overwrites the previous result.
fn attachment_text(ev: &SlackMessageEvent) -> String {
    let mut text = String::new();
    for attach in &ev.attachments {
        if attach.text.is_empty() {
            text = attach.fallback.clone();
        } else {
            if !attach.title.is_empty() {
                text = format!("{}\n", attach.title);
            }
            text.push_str(&attach.text);
        }
    }
    text
}

/// Reject messages that would be empty on the other side.
pub fn validate(ev: &SlackMessageEvent, msg: &CanonicalMessage) -> Result<()> {
    let incomplete = msg.text.is_empty() || msg.username.is_empty();
    if incomplete && ev.subtype != MessageSubtype::MessageDeleted && ev.files.is_empty() {
        if ev.bot_id.is_empty() {
            return Err(Error::EmptyMessage);
        }
        return Err(Error::UnresolvedRelayEcho);
    }
    Ok(())
}

pub struct Classifier {
    account: String,
    config: SlackAccountConfig,
    api: Arc<dyn SlackApi>,
    directory: Arc<Directory>,
    files: Arc<FileRelay>,
}

impl Classifier {
    pub fn new(
        account: impl Into<String>,
        config: SlackAccountConfig,
        api: Arc<dyn SlackApi>,
        directory: Arc<Directory>,
        files: Arc<FileRelay>,
    ) -> Self {
        Self {
            account: account.into(),
            config,
            api,
            directory,
            files,
        }
    }

    /// Normalize `ev`. The event itself is never modified, so classifying
    /// the same event twice yields the same message.
    pub async fn classify(&self, ev: &SlackMessageEvent) -> Result<CanonicalMessage> {
        // Edits carry the new author and text in the embedded message.
        let (user, text) = match ev.edit_submessage() {
            Some(sub) if !self.config.edit_disable => {
                debug!(account = %self.account, ts = %sub.ts, "folding edit");
                (
                    sub.user.as_str(),
                    format!("{}{}", sub.text, self.config.edit_suffix),
                )
            },
            _ => (ev.user.as_str(), ev.text.clone()),
        };

        let channel = self
            .directory
            .channel_by_id(self.api.as_ref(), &ev.channel)
            .await?;

        let mut msg = CanonicalMessage {
            id: message_id(&ev.ts),
            text,
            channel: if self.config.use_channel_id {
                format!("ID:{}", channel.id)
            } else {
                channel.name
            },
            account: self.account.clone(),
            ..Default::default()
        };

        if !user.is_empty()
            && !matches!(
                ev.subtype,
                MessageSubtype::MessageDeleted | MessageSubtype::FileComment
            )
        {
            let resolved = self.directory.resolve_user(self.api.as_ref(), user).await?;
            apply_user(&mut msg, &resolved);
        }

        if msg.text.is_empty() {
            msg.text = attachment_text(ev);
        }

        // Posts through our own webhook URL cannot be told apart from other
        // bot posts, so bots are only resolved without one.
        if msg.username.is_empty() && !ev.bot_id.is_empty() && self.config.webhook_url.is_none() {
            self.resolve_bot(ev, &mut msg).await?;
        }

        for rule in FIELD_RULES {
            if (rule.matches)(ev) {
                debug!(account = %self.account, rule = rule.name, "applying field rule");
                (rule.apply)(ev, &mut msg);
            }
        }

        validate(ev, &msg)?;

        if !ev.attachments.is_empty() {
            msg.extra.push(
                EXTRA_SLACK_ATTACHMENT,
                ExtraPayload::Json(serde_json::to_value(&ev.attachments)?),
            );
        }

        for file in &ev.files {
            if let Err(e) = self.files.download(&mut msg, file).await {
                warn!(account = %self.account, file = %file.name, error = %e, "file download failed");
            }
        }

        Ok(msg)
    }

    /// Name a bot post after the bot, or after the human behind it for
    /// bridges that post through a generic API bot.
    async fn resolve_bot(&self, ev: &SlackMessageEvent, msg: &mut CanonicalMessage) -> Result<()> {
        let bot = match self.api.bot_info(&ev.bot_id).await {
            Ok(bot) => bot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(account = %self.account, bot_id = %ev.bot_id, error = %e, "bot lookup failed");
                return Ok(());
            },
        };

        if !bot.name.is_empty() {
            msg.username = if ev.username.is_empty() {
                bot.name.clone()
            } else {
                ev.username.clone()
            };
            msg.user_id = bot.id.clone();
        }

        if !ev.user.is_empty() && self.config.relay_bot_names.contains(&bot.name) {
            let user = self.directory.resolve_user(self.api.as_ref(), &ev.user).await?;
            apply_user(msg, &user);
        }
        Ok(())
    }
}
