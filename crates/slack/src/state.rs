use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {tokio::task::JoinHandle, uuid::Uuid};

use crate::{
    PLATFORM_TAG,
    api::SlackApi,
    cache::LoopCache,
    classify::Classifier,
    config::SlackAccountConfig,
    directory::Directory,
    files::FileRelay,
    types::ConnectionInfo,
};

/// Shared account state map.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Per-account runtime state.
pub struct AccountState {
    pub ctx: Arc<AccountContext>,
    /// The account's ingestion task.
    pub task: JoinHandle<()>,
}

/// Everything the ingestion pipeline of one account shares between tasks.
pub struct AccountContext {
    pub account_id: String,
    /// Label stamped on every message, `slack.<account_id>`.
    pub account: String,
    pub config: SlackAccountConfig,
    pub api: Arc<dyn SlackApi>,
    pub cache: Arc<LoopCache>,
    pub directory: Arc<Directory>,
    pub files: Arc<FileRelay>,
    pub classifier: Classifier,
    /// Callback ID this instance stamps on relayed attachments.
    pub instance_tag: String,
    /// Identity reported by the last live session handshake.
    session: RwLock<Option<ConnectionInfo>>,
}

impl AccountContext {
    pub fn new(account_id: &str, config: SlackAccountConfig, api: Arc<dyn SlackApi>) -> Self {
        let account = format!("{PLATFORM_TAG}.{account_id}");
        let cache = Arc::new(LoopCache::new());
        let directory = Arc::new(Directory::new());
        let files = Arc::new(
            FileRelay::new(
                account_id,
                Arc::clone(&api),
                Arc::clone(&cache),
                config.media_download_size,
            )
            .with_blacklist(&config.media_download_blacklist),
        );
        let classifier = Classifier::new(
            account.clone(),
            config.clone(),
            Arc::clone(&api),
            Arc::clone(&directory),
            Arc::clone(&files),
        );
        Self {
            account_id: account_id.to_string(),
            account,
            config,
            api,
            cache,
            directory,
            files,
            classifier,
            instance_tag: format!("ferry_{}", Uuid::new_v4()),
            session: RwLock::new(None),
        }
    }

    pub fn set_session(&self, info: ConnectionInfo) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(info);
    }

    pub fn session(&self) -> Option<ConnectionInfo> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Our own user name; empty until a session is established.
    pub fn self_name(&self) -> String {
        self.session().map(|s| s.self_user.name).unwrap_or_default()
    }
}
