//! Silent-drop filter applied to live-session message events before
//! classification.

use std::{fmt, time::Instant};

use crate::{
    cache::{LoopCache, OwnUpload},
    config::SlackAccountConfig,
    types::{MessageSubtype, SlackMessageEvent},
};

/// What the filter needs to know about the running session.
pub struct SkipContext<'a> {
    pub config: &'a SlackAccountConfig,
    /// Our own user name on this workspace; empty until connected.
    pub self_name: &'a str,
    /// Callback ID stamped on attachments this instance relays.
    pub instance_tag: &'a str,
    pub cache: &'a LoopCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    JoinLeaveDisabled,
    Pinned,
    OwnMessage,
    OwnAttachment,
    Unfurl,
    OwnUpload { file: String, by: OwnUpload },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinLeaveDisabled => f.write_str("join/leave forwarding disabled"),
            Self::Pinned => f.write_str("pinned item"),
            Self::OwnMessage => f.write_str("posted by ourselves"),
            Self::OwnAttachment => f.write_str("attachment relayed by this instance"),
            Self::Unfurl => f.write_str("unedited message_changed (link unfurl)"),
            Self::OwnUpload { file, by } => match by {
                OwnUpload::ById => write!(f, "file id {file} uploaded by us"),
                OwnUpload::ByName => write!(f, "file name {file} uploaded by us"),
            },
        }
    }
}

/// Why `ev` should be dropped, or `None` to process it.
pub fn skip_reason(ev: &SlackMessageEvent, ctx: &SkipContext<'_>) -> Option<SkipReason> {
    skip_reason_at(ev, ctx, Instant::now())
}

pub fn skip_reason_at(
    ev: &SlackMessageEvent,
    ctx: &SkipContext<'_>,
    now: Instant,
) -> Option<SkipReason> {
    // Join/leave is decided by the setting alone.
    if ev.subtype.is_join_leave() {
        return ctx
            .config
            .no_send_join_part
            .then_some(SkipReason::JoinLeaveDisabled);
    }

    if matches!(
        ev.subtype,
        MessageSubtype::PinnedItem | MessageSubtype::UnpinnedItem
    ) {
        return Some(SkipReason::Pinned);
    }

    if !ctx.config.uses_webhooks() && !ctx.self_name.is_empty() && ev.username == ctx.self_name {
        return Some(SkipReason::OwnMessage);
    }

    if ev
        .attachments
        .first()
        .is_some_and(|a| !a.callback_id.is_empty() && a.callback_id == ctx.instance_tag)
    {
        return Some(SkipReason::OwnAttachment);
    }

    if !ctx.config.edit_disable
        && let Some(sub) = ev.edit_submessage()
        && sub.edited.is_none()
    {
        return Some(SkipReason::Unfurl);
    }

    ev.files.iter().find_map(|file| {
        ctx.cache.own_upload_at(file, now).map(|by| SkipReason::OwnUpload {
            file: match by {
                OwnUpload::ById => file.id.clone(),
                OwnUpload::ByName => file.name.clone(),
            },
            by,
        })
    })
}
