//! File relay: bounded inbound downloads and cache-registered uploads.

use std::sync::{Arc, LazyLock};

use {
    ferry_channels::{CanonicalMessage, ExtraPayload, FileInfo, extra_keys},
    regex::Regex,
    tracing::{debug, info, warn},
};

use crate::{
    api::{FileUpload, SlackApi},
    cache::LoopCache,
    error::{Error, Result},
    types::SlackFile,
};

/// Slack annotates shared files with `<user> commented: <text>`.
#[allow(clippy::expect_used)]
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*?commented: (.*)").expect("valid comment regex"));

/// The comment part of a `… commented: …` annotation, if present.
pub fn extract_comment(text: &str) -> Option<String> {
    COMMENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct FileRelay {
    account_id: String,
    api: Arc<dyn SlackApi>,
    cache: Arc<LoopCache>,
    max_size: u64,
    blacklist: Vec<Regex>,
}

impl FileRelay {
    pub fn new(
        account_id: impl Into<String>,
        api: Arc<dyn SlackApi>,
        cache: Arc<LoopCache>,
        max_size: u64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            api,
            cache,
            max_size,
            blacklist: Vec::new(),
        }
    }

    /// Never download files whose name matches one of `patterns`.
    /// Invalid patterns are logged and ignored.
    pub fn with_blacklist(mut self, patterns: &[String]) -> Self {
        self.blacklist = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(account_id = %self.account_id, pattern = %p, error = %e, "ignoring invalid download blacklist entry");
                    None
                },
            })
            .collect();
        self
    }

    /// Download `file` into `msg.extra["file"]`.
    ///
    /// Oversized files are recorded under `file_failure_size` so the gateway
    /// can tell the other side something was left behind.
    pub async fn download(&self, msg: &mut CanonicalMessage, file: &SlackFile) -> Result<()> {
        if let Some(re) = self.blacklist.iter().find(|re| re.is_match(&file.name)) {
            return Err(Error::FileBlacklisted {
                name: file.name.clone(),
                pattern: re.as_str().to_string(),
            });
        }

        if file.size > self.max_size {
            msg.extra.push(
                extra_keys::FILE_FAILURE_SIZE,
                ExtraPayload::File(FileInfo {
                    name: file.name.clone(),
                    size: file.size,
                    comment: Some(msg.text.clone()),
                    ..Default::default()
                }),
            );
            return Err(Error::FileTooLarge {
                name: file.name.clone(),
                size: file.size,
                limit: self.max_size,
            });
        }

        let comment = extract_comment(&msg.text);
        let data = self.api.download(&file.url_private_download).await?;
        debug!(
            account_id = %self.account_id,
            file = %file.name,
            bytes = data.len(),
            "downloaded slack file"
        );
        msg.extra.push(
            extra_keys::FILE,
            ExtraPayload::File(FileInfo {
                name: file.name.clone(),
                size: file.size,
                data,
                comment,
                url: Some(file.url_private_download.clone()),
            }),
        );
        Ok(())
    }

    /// Upload every file carried by `msg` to `channel_id`.
    ///
    /// Each name is registered in the loop cache before the call and each
    /// returned ID after it, so Slack's echo of the upload is dropped even
    /// when it arrives before the call returns. Failures are logged; the
    /// registrations stay in place.
    pub async fn upload_files(&self, msg: &mut CanonicalMessage, channel_id: &str) -> Result<()> {
        let files: Vec<FileInfo> = msg.extra.files().cloned().collect();
        for file in files {
            let comment = file.comment.as_deref().unwrap_or_default();
            // The comment travels with the upload; do not post it twice.
            if msg.text == comment {
                msg.text.clear();
            }

            self.cache.register_upload_name(&file.name);
            let upload = FileUpload {
                data: file.data.clone(),
                filename: &file.name,
                channel_id,
                comment: file.comment.as_deref(),
            };
            match self.api.upload_file(upload).await {
                Ok(id) if !id.is_empty() => {
                    self.cache.register_upload_id(&id);
                    info!(account_id = %self.account_id, file = %file.name, file_id = %id, "uploaded file");
                },
                Ok(_) => {
                    warn!(account_id = %self.account_id, file = %file.name, "upload returned no file id");
                },
                Err(e) => {
                    warn!(account_id = %self.account_id, file = %file.name, error = %e, "file upload failed");
                },
            }
        }
        Ok(())
    }
}
