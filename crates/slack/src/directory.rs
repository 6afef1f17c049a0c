//! Cached user and channel directory for one account.

use std::{collections::HashMap, sync::RwLock};

use tracing::debug;

use crate::{
    api::SlackApi,
    error::{Error, Result},
    types::{SlackChannel, SlackUser},
};

#[derive(Debug, Default)]
pub struct Directory {
    users: RwLock<HashMap<String, SlackUser>>,
    channels: RwLock<HashMap<String, SlackChannel>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the user cache with a fresh listing.
    pub async fn refresh_users(&self, api: &dyn SlackApi) -> Result<usize> {
        let listed = api.list_users().await?;
        let count = listed.len();
        let fresh: HashMap<_, _> = listed.into_iter().map(|u| (u.id.clone(), u)).collect();
        *self.users.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        debug!(count, "user directory refreshed");
        Ok(count)
    }

    /// Replace the channel cache with a fresh listing.
    pub async fn refresh_channels(&self, api: &dyn SlackApi) -> Result<usize> {
        let listed = api.list_channels().await?;
        let count = listed.len();
        let fresh: HashMap<_, _> = listed.into_iter().map(|c| (c.id.clone(), c)).collect();
        *self.channels.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        debug!(count, "channel directory refreshed");
        Ok(count)
    }

    /// Look a channel up by ID, asking Slack directly on a cache miss so
    /// private channels joined after the last listing still resolve.
    pub async fn channel_by_id(&self, api: &dyn SlackApi, channel_id: &str) -> Result<SlackChannel> {
        if let Some(channel) = self.cached_channel(channel_id) {
            return Ok(channel);
        }

        let channel = api.channel_info(channel_id).await.map_err(|e| match e {
            Error::Api { .. } => Error::ChannelNotFound {
                channel_id: channel_id.to_string(),
            },
            other => other,
        })?;
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    pub fn cached_channel(&self, channel_id: &str) -> Option<SlackChannel> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .cloned()
    }

    /// Resolve a user by ID, cache first.
    pub async fn resolve_user(&self, api: &dyn SlackApi, user_id: &str) -> Result<SlackUser> {
        if let Some(user) = self.cached_user(user_id) {
            return Ok(user);
        }
        let user = api.user_info(user_id).await?;
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub fn cached_user(&self, user_id: &str) -> Option<SlackUser> {
        self.users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    /// Display name of a cached user, if known.
    pub fn user_name(&self, user_id: &str) -> Option<String> {
        self.cached_user(user_id)
            .map(|u| u.display_name().to_string())
    }

    /// Avatar URL of a cached user; empty when unknown.
    pub fn avatar(&self, user_id: &str) -> String {
        self.cached_user(user_id)
            .map(|u| u.profile.image_48)
            .unwrap_or_default()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{
            api::FileUpload,
            types::{ConnectionInfo, SlackBot, UserProfile},
        },
        async_trait::async_trait,
        bytes::Bytes,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// In-memory [`SlackApi`] shared by the crate's tests.
    #[derive(Default)]
    pub(crate) struct MockApi {
        pub users: HashMap<String, SlackUser>,
        pub bots: HashMap<String, SlackBot>,
        pub channels: HashMap<String, SlackChannel>,
        pub files: HashMap<String, Bytes>,
        pub uploaded: Mutex<Vec<(String, String, Option<String>)>>,
        pub upload_id: Option<String>,
        pub user_calls: AtomicUsize,
    }

    impl MockApi {
        pub(crate) fn with_user(mut self, id: &str, name: &str) -> Self {
            self.users.insert(id.into(), SlackUser {
                id: id.into(),
                name: name.into(),
                profile: UserProfile {
                    image_48: format!("https://avatars.example/{id}.png"),
                    ..Default::default()
                },
                ..Default::default()
            });
            self
        }

        pub(crate) fn with_bot(mut self, id: &str, name: &str) -> Self {
            self.bots.insert(id.into(), SlackBot {
                id: id.into(),
                name: name.into(),
            });
            self
        }

        pub(crate) fn with_channel(mut self, id: &str, name: &str) -> Self {
            self.channels.insert(id.into(), SlackChannel {
                id: id.into(),
                name: name.into(),
                is_private: false,
            });
            self
        }
    }

    #[async_trait]
    impl SlackApi for MockApi {
        async fn user_info(&self, user_id: &str) -> Result<SlackUser> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            self.users
                .get(user_id)
                .cloned()
                .ok_or_else(|| Error::api("users.info", "user_not_found"))
        }

        async fn bot_info(&self, bot_id: &str) -> Result<SlackBot> {
            self.bots
                .get(bot_id)
                .cloned()
                .ok_or_else(|| Error::api("bots.info", "bot_not_found"))
        }

        async fn channel_info(&self, channel_id: &str) -> Result<SlackChannel> {
            self.channels
                .get(channel_id)
                .cloned()
                .ok_or_else(|| Error::api("conversations.info", "channel_not_found"))
        }

        async fn list_users(&self) -> Result<Vec<SlackUser>> {
            Ok(self.users.values().cloned().collect())
        }

        async fn list_channels(&self) -> Result<Vec<SlackChannel>> {
            Ok(self.channels.values().cloned().collect())
        }

        async fn rtm_connect(&self) -> Result<ConnectionInfo> {
            Err(Error::InvalidAuth {
                reason: "invalid_auth".into(),
            })
        }

        async fn download(&self, url: &str) -> Result<Bytes> {
            self.files.get(url).cloned().ok_or_else(|| Error::Download {
                url: url.into(),
                reason: "http 404 Not Found".into(),
            })
        }

        async fn upload_file(&self, upload: FileUpload<'_>) -> Result<String> {
            self.uploaded.lock().unwrap().push((
                upload.filename.to_string(),
                upload.channel_id.to_string(),
                upload.comment.map(str::to_string),
            ));
            self.upload_id
                .clone()
                .ok_or_else(|| Error::api("files.upload", "upload_failed"))
        }
    }

    #[tokio::test]
    async fn resolves_user_once_then_caches() {
        let api = MockApi::default().with_user("U1", "alice");
        let dir = Directory::new();
        assert_eq!(dir.resolve_user(&api, "U1").await.unwrap().name, "alice");
        assert_eq!(dir.resolve_user(&api, "U1").await.unwrap().name, "alice");
        assert_eq!(api.user_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dir.avatar("U1"), "https://avatars.example/U1.png");
        assert_eq!(dir.avatar("U404"), "");
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let api = MockApi::default().with_channel("C1", "general");
        let dir = Directory::new();
        assert_eq!(dir.channel_by_id(&api, "C1").await.unwrap().name, "general");
        let err = dir.channel_by_id(&api, "C2").await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound { channel_id } if channel_id == "C2"));
    }

    #[tokio::test]
    async fn refresh_replaces_cache() {
        let api = MockApi::default()
            .with_user("U1", "alice")
            .with_user("U2", "bob");
        let dir = Directory::new();
        assert_eq!(dir.refresh_users(&api).await.unwrap(), 2);
        assert_eq!(dir.user_name("U2").as_deref(), Some("bob"));
        assert_eq!(api.user_calls.load(Ordering::SeqCst), 0);
    }
}
