//! Slack Web API boundary.
//!
//! [`SlackApi`] is the seam between the pipeline and the network: the
//! classifier, directory and file relay only ever talk to it, so tests swap
//! in an in-memory implementation.

use {
    async_trait::async_trait,
    bytes::Bytes,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    types::{ConnectionInfo, SlackBot, SlackChannel, SlackUser},
};

/// `ok: false` error codes that mean the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Page size for `users.list` / `conversations.list`.
const PAGE_LIMIT: &str = "200";

/// Parameters of a native file upload.
#[derive(Debug, Clone)]
pub struct FileUpload<'a> {
    pub data: Bytes,
    pub filename: &'a str,
    pub channel_id: &'a str,
    pub comment: Option<&'a str>,
}

#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn user_info(&self, user_id: &str) -> Result<SlackUser>;
    async fn bot_info(&self, bot_id: &str) -> Result<SlackBot>;
    /// Unlike the channel listing this also resolves private channels the
    /// token is a member of.
    async fn channel_info(&self, channel_id: &str) -> Result<SlackChannel>;
    async fn list_users(&self) -> Result<Vec<SlackUser>>;
    async fn list_channels(&self) -> Result<Vec<SlackChannel>>;
    async fn rtm_connect(&self) -> Result<ConnectionInfo>;
    /// Fetch an authenticated file URL into memory.
    async fn download(&self, url: &str) -> Result<Bytes>;
    /// Upload a file and return its Slack file ID.
    async fn upload_file(&self, upload: FileUpload<'_>) -> Result<String>;
}

/// [`SlackApi`] over HTTPS with a bearer token.
pub struct HttpSlackApi {
    http: reqwest::Client,
    base_url: String,
    token: Secret<String>,
}

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct UserInfoResponse {
    user: SlackUser,
}

#[derive(Deserialize)]
struct BotInfoResponse {
    bot: SlackBot,
}

#[derive(Deserialize)]
struct ChannelInfoResponse {
    channel: SlackChannel,
}

#[derive(Deserialize)]
struct UsersListResponse {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Deserialize)]
struct ChannelsListResponse {
    #[serde(default)]
    channels: Vec<SlackChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

impl HttpSlackApi {
    pub fn new(base_url: impl Into<String>, token: Secret<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!(method, "slack api call");
        let resp = self
            .http
            .get(self.url(method))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;
        decode(method, resp).await
    }

    async fn paginate<R, T>(
        &self,
        method: &str,
        extra: &[(&str, &str)],
        split: impl Fn(R) -> (Vec<T>, String),
    ) -> Result<Vec<T>>
    where
        R: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![("limit", PAGE_LIMIT)];
            query.extend_from_slice(extra);
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let page: R = self.get(method, &query).await?;
            let (mut batch, next) = split(page);
            items.append(&mut batch);
            if next.is_empty() {
                return Ok(items);
            }
            cursor = next;
        }
    }
}

/// Check HTTP status and the `ok` envelope, then decode the body as `T`.
async fn decode<T: DeserializeOwned>(method: &str, resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::api(method, format!("http {status}: {body}")));
    }
    let body: serde_json::Value = resp.json().await?;
    let envelope: Envelope = serde_json::from_value(body.clone())?;
    if !envelope.ok {
        let error = envelope.error.unwrap_or_else(|| "unknown_error".into());
        if AUTH_ERRORS.contains(&error.as_str()) {
            return Err(Error::InvalidAuth { reason: error });
        }
        return Err(Error::api(method, error));
    }
    Ok(serde_json::from_value(body)?)
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn user_info(&self, user_id: &str) -> Result<SlackUser> {
        let resp: UserInfoResponse = self.get("users.info", &[("user", user_id)]).await?;
        Ok(resp.user)
    }

    async fn bot_info(&self, bot_id: &str) -> Result<SlackBot> {
        let resp: BotInfoResponse = self.get("bots.info", &[("bot", bot_id)]).await?;
        Ok(resp.bot)
    }

    async fn channel_info(&self, channel_id: &str) -> Result<SlackChannel> {
        let resp: ChannelInfoResponse = self
            .get("conversations.info", &[("channel", channel_id)])
            .await?;
        Ok(resp.channel)
    }

    async fn list_users(&self) -> Result<Vec<SlackUser>> {
        self.paginate("users.list", &[], |page: UsersListResponse| {
            (page.members, page.response_metadata.next_cursor)
        })
        .await
    }

    async fn list_channels(&self) -> Result<Vec<SlackChannel>> {
        self.paginate(
            "conversations.list",
            &[("types", "public_channel,private_channel")],
            |page: ChannelsListResponse| (page.channels, page.response_metadata.next_cursor),
        )
        .await
    }

    async fn rtm_connect(&self) -> Result<ConnectionInfo> {
        self.get("rtm.connect", &[]).await
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Download {
                url: url.to_string(),
                reason: format!("http {status}"),
            });
        }
        Ok(resp.bytes().await?)
    }

    async fn upload_file(&self, upload: FileUpload<'_>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(upload.data.to_vec())
            .file_name(upload.filename.to_string());
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("filename", upload.filename.to_string())
            .text("channels", upload.channel_id.to_string());
        if let Some(comment) = upload.comment.filter(|c| !c.is_empty()) {
            form = form.text("initial_comment", comment.to_string());
        }

        let resp = self
            .http
            .post(self.url("files.upload"))
            .bearer_auth(self.token.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadResponse = decode("files.upload", resp).await?;
        Ok(uploaded.file.id)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn api(server: &mockito::Server) -> HttpSlackApi {
        HttpSlackApi::new(server.url(), Secret::new("xoxb-test".into()))
    }

    #[tokio::test]
    async fn user_info_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users.info")
            .match_query(mockito::Matcher::UrlEncoded("user".into(), "U1".into()))
            .match_header("authorization", "Bearer xoxb-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": true,
                    "user": {"id": "U1", "name": "alice", "profile": {"display_name": "Alice"}}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let user = api(&server).user_info("U1").await.unwrap();
        assert_eq!(user.id, "U1");
        assert_eq!(user.display_name(), "Alice");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_ok_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/bots.info")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(json!({"ok": false, "error": "bot_not_found"}).to_string())
            .create_async()
            .await;

        let err = api(&server).bot_info("B1").await.unwrap_err();
        assert!(matches!(err, Error::Api { ref error, .. } if error == "bot_not_found"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn invalid_auth_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rtm.connect")
            .with_status(200)
            .with_body(json!({"ok": false, "error": "invalid_auth"}).to_string())
            .create_async()
            .await;

        let err = api(&server).rtm_connect().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn list_channels_follows_cursor() {
        let mut server = mockito::Server::new_async().await;
        let page_two = server
            .mock("GET", "/conversations.list")
            .match_query(mockito::Matcher::Regex("cursor=next-page".into()))
            .with_status(200)
            .with_body(
                json!({"ok": true, "channels": [{"id": "C2", "name": "random"}],
                       "response_metadata": {"next_cursor": ""}})
                .to_string(),
            )
            .create_async()
            .await;
        let page_one = server
            .mock("GET", "/conversations.list")
            .match_query(mockito::Matcher::Regex(
                "^limit=200&types=public_channel%2Cprivate_channel$".into(),
            ))
            .with_status(200)
            .with_body(
                json!({"ok": true, "channels": [{"id": "C1", "name": "general", "is_private": true}],
                       "response_metadata": {"next_cursor": "next-page"}})
                .to_string(),
            )
            .create_async()
            .await;

        let channels = api(&server).list_channels().await.unwrap();
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["general", "random"]);
        assert!(channels[0].is_private);
        page_one.assert_async().await;
        page_two.assert_async().await;
    }

    #[tokio::test]
    async fn download_rejects_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/files/F1/report.pdf")
            .with_status(403)
            .create_async()
            .await;

        let url = format!("{}/files/F1/report.pdf", server.url());
        let err = api(&server).download(&url).await.unwrap_err();
        assert!(matches!(err, Error::Download { .. }));
    }

    #[tokio::test]
    async fn upload_returns_file_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/files.upload")
            .match_header("authorization", "Bearer xoxb-test")
            .with_status(200)
            .with_body(json!({"ok": true, "file": {"id": "F123"}}).to_string())
            .create_async()
            .await;

        let id = api(&server)
            .upload_file(FileUpload {
                data: Bytes::from_static(b"%PDF"),
                filename: "report.pdf",
                channel_id: "C1",
                comment: Some("quarterly"),
            })
            .await
            .unwrap();
        assert_eq!(id, "F123");
        mock.assert_async().await;
    }
}
