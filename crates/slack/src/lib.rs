//! Slack bridge for ferry.
//!
//! Folds Slack events arriving over a live RTM session or an outgoing
//! webhook into [`ferry_channels::CanonicalMessage`]s, suppressing echoes of
//! content this bridge posted or uploaded itself.

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod directory;
pub mod error;
pub mod files;
pub mod handlers;
pub mod plugin;
pub mod rtm;
pub mod sanitize;
pub mod skip;
pub mod state;
pub mod types;
pub mod webhook;

pub use {
    config::SlackAccountConfig,
    error::{Error, Result},
    plugin::{AccountExit, SlackPlugin},
};

/// Platform tag prefixed to every message ID.
pub const PLATFORM_TAG: &str = "slack";
