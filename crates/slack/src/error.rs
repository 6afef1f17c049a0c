use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The token was rejected. Unrecoverable for the bridge instance.
    #[error("invalid slack token: {reason}")]
    InvalidAuth { reason: String },

    /// Slack answered `ok: false`.
    #[error("slack {method} failed: {error}")]
    Api { method: String, error: String },

    #[error("channel {channel_id} not found")]
    ChannelNotFound { channel_id: String },

    /// An unresolvable bot/webhook post, most likely our own relay.
    #[error("probably an incoming webhook we couldn't resolve (maybe ourselves)")]
    UnresolvedRelayEcho,

    #[error("empty message and not a deleted message")]
    EmptyMessage,

    #[error("file {name} too large to download ({size} bytes, limit {limit})")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("file {name} matches download blacklist entry {pattern}")]
    FileBlacklisted { name: String, pattern: String },

    #[error("download {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Channel(#[from] ferry_channels::Error),
}

impl Error {
    #[must_use]
    pub fn api(method: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Api {
            method: method.into(),
            error: error.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidAuth { .. })
    }
}

impl From<Error> for ferry_channels::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Channel(inner) => inner,
            other => Self::external("slack", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
