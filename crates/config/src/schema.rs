//! Config schema types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub general: GeneralConfig,
    /// Slack bridge accounts, keyed by account ID.
    pub slack: BTreeMap<String, serde_json::Value>,
}

/// Settings shared by every bridge account.
///
/// Any of these may be overridden per account; see
/// [`FerryConfig::account_config`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Largest attachment (bytes) a bridge downloads into memory.
    pub media_download_size: u64,
    /// Regexes matched against file names; matching files are never downloaded.
    pub media_download_blacklist: Vec<String>,
    /// Capacity of the bridge → gateway channel.
    pub remote_buffer: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            media_download_size: 1_000_000,
            media_download_blacklist: Vec::new(),
            remote_buffer: 100,
        }
    }
}

impl FerryConfig {
    /// Account table for `platform`/`account_id` with unset general keys
    /// filled in from `[general]`.
    pub fn account_config(&self, platform: &str, account_id: &str) -> Option<serde_json::Value> {
        let accounts = match platform {
            "slack" => &self.slack,
            _ => return None,
        };
        let mut value = accounts.get(account_id)?.clone();
        if let Some(obj) = value.as_object_mut() {
            obj.entry("media_download_size")
                .or_insert_with(|| self.general.media_download_size.into());
            obj.entry("media_download_blacklist")
                .or_insert_with(|| self.general.media_download_blacklist.clone().into());
        }
        Some(value)
    }
}
