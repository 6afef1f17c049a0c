use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    async_trait::async_trait,
    ferry_channels::{
        CanonicalMessage, ChannelFileUpload, ChannelHealthSnapshot, ChannelPlugin, ChannelStatus,
        RemoteSender, Result,
    },
    tokio::sync::mpsc,
    tracing::{error, info, warn},
};

use crate::{
    api::{HttpSlackApi, SlackApi},
    config::SlackAccountConfig,
    error::Error,
    handlers,
    state::{AccountContext, AccountState, AccountStateMap},
};

/// Why an account's ingestion ended.
#[derive(Debug)]
pub struct AccountExit {
    pub account_id: String,
    /// `None` when the producer stopped cleanly.
    pub error: Option<Error>,
}

/// Slack bridge plugin.
pub struct SlackPlugin {
    accounts: AccountStateMap,
    remote: Option<RemoteSender>,
    exits: Option<mpsc::UnboundedSender<AccountExit>>,
}

impl SlackPlugin {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            remote: None,
            exits: None,
        }
    }

    /// Gateway channel every account forwards its messages to.
    pub fn with_remote(mut self, remote: RemoteSender) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Get notified when an account's ingestion task ends.
    pub fn with_exit_notifier(mut self, exits: mpsc::UnboundedSender<AccountExit>) -> Self {
        self.exits = Some(exits);
        self
    }

    /// List all active account IDs.
    pub fn account_ids(&self) -> Vec<String> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = accounts.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn context(&self, account_id: &str) -> Option<Arc<AccountContext>> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account_id).map(|s| Arc::clone(&s.ctx))
    }

    /// Start an account against a given API client.
    pub fn start_with_api(
        &self,
        account_id: &str,
        config: SlackAccountConfig,
        api: Arc<dyn SlackApi>,
    ) -> Result<()> {
        let remote = self
            .remote
            .clone()
            .ok_or_else(|| ferry_channels::Error::invalid_input("no gateway channel configured"))?;

        {
            let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
            if accounts
                .get(account_id)
                .is_some_and(|s| !s.task.is_finished())
            {
                return Err(ferry_channels::Error::already_running(account_id));
            }
        }

        let ctx = Arc::new(AccountContext::new(account_id, config, api));
        let task = tokio::spawn(run_account(
            Arc::clone(&ctx),
            remote,
            Arc::clone(&self.accounts),
            self.exits.clone(),
        ));

        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(account_id.to_string(), AccountState { ctx, task });
        Ok(())
    }
}

impl Default for SlackPlugin {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_account(
    ctx: Arc<AccountContext>,
    remote: RemoteSender,
    accounts: AccountStateMap,
    exits: Option<mpsc::UnboundedSender<AccountExit>>,
) {
    let account_id = ctx.account_id.clone();
    let result = handlers::handle_slack(ctx, remote).await;
    let error = match result {
        Ok(()) => {
            info!(account_id = %account_id, "slack ingestion stopped");
            None
        },
        Err(e) => {
            error!(account_id = %account_id, error = %e, fatal = e.is_fatal(), "slack ingestion failed");
            Some(e)
        },
    };

    accounts
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&account_id);

    if let Some(exits) = exits {
        let _ = exits.send(AccountExit { account_id, error });
    }
}

#[async_trait]
impl ChannelPlugin for SlackPlugin {
    fn id(&self) -> &str {
        "slack"
    }

    fn name(&self) -> &str {
        "Slack"
    }

    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let slack_config: SlackAccountConfig = serde_json::from_value(config)?;

        if slack_config.token().is_empty() && slack_config.incoming_webhook_bind.is_none() {
            return Err(ferry_channels::Error::invalid_input(
                "slack token is required unless incoming_webhook_bind is set",
            ));
        }

        info!(account_id, "starting slack account");
        let api = Arc::new(HttpSlackApi::new(
            slack_config.api_url.clone(),
            slack_config.token.clone(),
        ));
        self.start_with_api(account_id, slack_config, api)
    }

    async fn stop_account(&mut self, account_id: &str) -> Result<()> {
        let removed = self
            .accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(account_id);

        match removed {
            Some(state) => {
                info!(account_id, "stopping slack account");
                state.task.abort();
            },
            None => warn!(account_id, "slack account not found"),
        }
        Ok(())
    }

    fn file_upload(&self) -> Option<&dyn ChannelFileUpload> {
        Some(self)
    }

    fn status(&self) -> Option<&dyn ChannelStatus> {
        Some(self)
    }
}

#[async_trait]
impl ChannelFileUpload for SlackPlugin {
    async fn upload_files(
        &self,
        account_id: &str,
        msg: &mut CanonicalMessage,
        channel_id: &str,
    ) -> Result<()> {
        let ctx = self
            .context(account_id)
            .ok_or_else(|| ferry_channels::Error::unknown_account(account_id))?;
        ctx.files.upload_files(msg, channel_id).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelStatus for SlackPlugin {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        let snapshot = |connected: bool, details: String| ChannelHealthSnapshot {
            connected,
            account_id: account_id.to_string(),
            details: Some(details),
        };

        let Some(ctx) = self.context(account_id) else {
            return Ok(snapshot(false, "account not started".into()));
        };

        if let Some(bind) = &ctx.config.incoming_webhook_bind {
            return Ok(snapshot(true, format!("webhook receiver on {bind}")));
        }
        Ok(match ctx.session() {
            Some(info) => snapshot(
                true,
                format!("connected as @{} to {}", info.self_user.name, info.team.name),
            ),
            None => snapshot(false, "connecting".into()),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::directory::tests::MockApi,
        bytes::Bytes,
        ferry_channels::{ExtraPayload, FileInfo, extra_keys},
        serde_json::json,
    };

    fn plugin() -> (SlackPlugin, mpsc::Receiver<CanonicalMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (SlackPlugin::new().with_remote(tx), rx)
    }

    #[tokio::test]
    async fn start_requires_token_or_webhook() {
        let (mut plugin, _rx) = plugin();
        let err = plugin
            .start_account("work", json!({"edit_suffix": "*"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ferry_channels::Error::InvalidInput { .. }));
        assert!(plugin.account_ids().is_empty());
    }

    #[tokio::test]
    async fn start_requires_gateway_channel() {
        let mut plugin = SlackPlugin::new();
        let err = plugin
            .start_account("work", json!({"token": "xoxb-1"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no gateway channel"));
    }

    #[tokio::test]
    async fn invalid_auth_exits_and_cleans_up() {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        let (plugin, _rx) = plugin();
        let plugin = plugin.with_exit_notifier(exit_tx);

        plugin
            .start_with_api(
                "work",
                SlackAccountConfig::default(),
                Arc::new(MockApi::default()),
            )
            .unwrap();
        assert_eq!(plugin.account_ids(), vec!["work"]);
        let err = plugin
            .start_with_api(
                "work",
                SlackAccountConfig::default(),
                Arc::new(MockApi::default()),
            )
            .unwrap_err();
        assert!(matches!(err, ferry_channels::Error::AlreadyRunning { .. }));

        let exit = exit_rx.recv().await.unwrap();
        assert_eq!(exit.account_id, "work");
        assert!(exit.error.unwrap().is_fatal());
        assert!(plugin.account_ids().is_empty());
    }

    #[tokio::test]
    async fn upload_goes_through_account_relay() {
        let (mut plugin, _rx) = plugin();
        let api = Arc::new(MockApi {
            upload_id: Some("F9".into()),
            ..Default::default()
        });
        // Webhook mode keeps the account running without a session.
        let config = SlackAccountConfig {
            incoming_webhook_bind: Some("127.0.0.1:0".into()),
            ..Default::default()
        };
        plugin.start_with_api("work", config, api.clone()).unwrap();

        let mut msg = CanonicalMessage::default();
        msg.extra.push(
            extra_keys::FILE,
            ExtraPayload::File(FileInfo {
                name: "a.png".into(),
                data: Bytes::from_static(b"png"),
                ..Default::default()
            }),
        );
        plugin
            .file_upload()
            .unwrap()
            .upload_files("work", &mut msg, "C1")
            .await
            .unwrap();
        assert_eq!(api.uploaded.lock().unwrap().len(), 1);
        let ctx = plugin.context("work").unwrap();
        assert!(ctx.cache.get("fileF9").is_some());

        let err = plugin
            .file_upload()
            .unwrap()
            .upload_files("other", &mut msg, "C1")
            .await
            .unwrap_err();
        assert!(matches!(err, ferry_channels::Error::UnknownAccount { .. }));

        plugin.stop_account("work").await.unwrap();
        assert!(plugin.account_ids().is_empty());
    }

    #[tokio::test]
    async fn probe_reports_state() {
        let (plugin, _rx) = plugin();
        let snap = plugin.probe("work").await.unwrap();
        assert!(!snap.connected);
        assert_eq!(snap.details.as_deref(), Some("account not started"));

        let config = SlackAccountConfig {
            incoming_webhook_bind: Some("127.0.0.1:0".into()),
            ..Default::default()
        };
        plugin
            .start_with_api("hooks", config, Arc::new(MockApi::default()))
            .unwrap();
        let snap = plugin.probe("hooks").await.unwrap();
        assert!(snap.connected);
        assert_eq!(snap.details.as_deref(), Some("webhook receiver on 127.0.0.1:0"));
    }
}
