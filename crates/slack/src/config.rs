use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

/// Default Slack Web API endpoint.
pub const DEFAULT_API_URL: &str = "https://slack.com/api";

/// Configuration for a single Slack bridge account.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SlackAccountConfig {
    /// Bot or user token (`xoxb-…` / `xoxp-…`).
    pub token: Secret<String>,

    /// Address (`host:port`) to receive Slack outgoing webhooks on.
    /// When set, the account ingests via webhooks instead of a live session.
    pub incoming_webhook_bind: Option<String>,

    /// Shared token Slack puts in each outgoing-webhook post.
    pub incoming_webhook_token: Option<Secret<String>>,

    /// Incoming-webhook URL the gateway posts through. Posts made this way
    /// cannot be attributed to us, so bot lookups are skipped when it is set.
    pub webhook_url: Option<String>,

    /// Do not fold `message_changed` events into edits.
    pub edit_disable: bool,

    /// Appended to the text of edited messages.
    pub edit_suffix: String,

    /// Drop channel join/leave events.
    pub no_send_join_part: bool,

    /// Report channels as `ID:<channel id>` instead of by name.
    pub use_channel_id: bool,

    /// Largest file (bytes) downloaded into memory.
    pub media_download_size: u64,

    /// Regexes matched against file names; matches are never downloaded.
    pub media_download_blacklist: Vec<String>,

    /// Bot names whose posts are really relayed human messages (e.g. IRC
    /// gateways that post through a generic API bot). Their posts are
    /// re-attributed to the event's user.
    pub relay_bot_names: Vec<String>,

    /// Slack Web API base URL.
    pub api_url: String,
}

impl SlackAccountConfig {
    /// Whether any webhook path (inbound or outbound) is configured.
    pub fn uses_webhooks(&self) -> bool {
        self.webhook_url.is_some() || self.incoming_webhook_bind.is_some()
    }

    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl std::fmt::Debug for SlackAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackAccountConfig")
            .field("token", &"[REDACTED]")
            .field("incoming_webhook_bind", &self.incoming_webhook_bind)
            .field(
                "incoming_webhook_token",
                &self.incoming_webhook_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "[REDACTED]"))
            .field("edit_disable", &self.edit_disable)
            .field("no_send_join_part", &self.no_send_join_part)
            .field("use_channel_id", &self.use_channel_id)
            .field("media_download_size", &self.media_download_size)
            .finish_non_exhaustive()
    }
}

impl Default for SlackAccountConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            incoming_webhook_bind: None,
            incoming_webhook_token: None,
            webhook_url: None,
            edit_disable: false,
            edit_suffix: String::new(),
            no_send_join_part: false,
            use_channel_id: false,
            media_download_size: 1_000_000,
            media_download_blacklist: Vec::new(),
            relay_bot_names: vec!["Slack API Tester".into()],
            api_url: DEFAULT_API_URL.into(),
        }
    }
}
