//! Bridge plugin system and the canonical message model.
//!
//! Every chat-service bridge (Slack today) folds its inbound events into a
//! [`CanonicalMessage`] and pushes it to the gateway through a
//! [`RemoteSender`]. Bridges implement [`ChannelPlugin`] for lifecycle and
//! optionally [`ChannelFileUpload`] for native outbound file transfer.

pub mod error;
pub mod message;
pub mod plugin;
pub mod registry;

pub use {
    error::{Error, Result},
    message::{
        CanonicalMessage, EVENT_MSG_DELETE, Extra, ExtraPayload, FileInfo, MessageEvent,
        SYSTEM_USER, extra_keys,
    },
    plugin::{
        ChannelFileUpload, ChannelHealthSnapshot, ChannelPlugin, ChannelStatus, RemoteReceiver,
        RemoteSender,
    },
    registry::ChannelRegistry,
};
