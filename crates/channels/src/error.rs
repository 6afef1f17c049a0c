use std::error::Error as StdError;

/// Crate-wide result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed bridge errors shared across the plugin traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Account configuration or a call parameter is invalid.
    #[error("invalid bridge input: {message}")]
    InvalidInput { message: String },

    /// A requested account ID is not registered.
    #[error("unknown bridge account: {account_id}")]
    UnknownAccount { account_id: String },

    /// An account with this ID is already running.
    #[error("bridge account already running: {account_id}")]
    AlreadyRunning { account_id: String },

    /// The gateway side of the remote channel has gone away.
    #[error("gateway channel closed")]
    GatewayClosed,

    /// Wrapped source error from the platform integration.
    #[error("bridge operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_account(account_id: impl std::fmt::Display) -> Self {
        Self::UnknownAccount {
            account_id: account_id.to_string(),
        }
    }

    #[must_use]
    pub fn already_running(account_id: impl std::fmt::Display) -> Self {
        Self::AlreadyRunning {
            account_id: account_id.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
