use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{Result, message::CanonicalMessage};

/// Sending half of the bridge → gateway channel.
pub type RemoteSender = mpsc::Sender<CanonicalMessage>;

/// Receiving half of the bridge → gateway channel, owned by the gateway.
pub type RemoteReceiver = mpsc::Receiver<CanonicalMessage>;

/// Core bridge plugin trait. Each chat service implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Bridge identifier (e.g. "slack").
    fn id(&self) -> &str;

    /// Human-readable bridge name.
    fn name(&self) -> &str;

    /// Start ingesting for an account.
    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()>;

    /// Stop ingesting for an account.
    async fn stop_account(&mut self, account_id: &str) -> Result<()>;

    /// Get the native file upload adapter, if the platform has one.
    fn file_upload(&self) -> Option<&dyn ChannelFileUpload>;

    /// Get status adapter for health checks.
    fn status(&self) -> Option<&dyn ChannelStatus>;
}

/// Upload files carried by a canonical message to the platform.
///
/// Implementations must register each upload with their loop-suppression
/// state so the platform's own echo of the file is not ingested again.
#[async_trait]
pub trait ChannelFileUpload: Send + Sync {
    async fn upload_files(
        &self,
        account_id: &str,
        msg: &mut CanonicalMessage,
        channel_id: &str,
    ) -> Result<()>;
}

/// Probe bridge account health.
#[async_trait]
pub trait ChannelStatus: Send + Sync {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot>;
}

/// Bridge health snapshot.
#[derive(Debug, Clone)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: String,
    pub details: Option<String>,
}
