//! Loop-suppression cache.
//!
//! Files this bridge uploads come back to it as ordinary inbound file events.
//! The upload path records what it sent here and the skip filter checks
//! inbound files against it.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::types::SlackFile;

/// How long an uploaded file ID suppresses its echo.
pub const FILE_ID_TTL: Duration = Duration::from_secs(60);

/// How long an uploaded file name suppresses its echo.
pub const FILE_NAME_TTL: Duration = Duration::from_secs(10);

/// Entry count past which inserts first drop everything older than
/// [`FILE_ID_TTL`].
pub const SWEEP_THRESHOLD: usize = 128;

const FILE_ID_PREFIX: &str = "file";
const FILE_NAME_PREFIX: &str = "filename";

/// Which cache entry matched an inbound file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnUpload {
    ById,
    ByName,
}

/// Key → insertion time store with TTL checked on read.
#[derive(Debug, Default)]
pub struct LoopCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl LoopCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>) {
        self.insert_at(key, Instant::now());
    }

    pub fn insert_at(&self, key: impl Into<String>, at: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, seen| at.saturating_duration_since(*seen) < FILE_ID_TTL);
        }
        entries.insert(key.into(), at);
    }

    /// Insertion time of `key`, regardless of age.
    pub fn get(&self, key: &str) -> Option<Instant> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).copied()
    }

    /// Whether `key` was inserted less than `ttl` before `now`.
    pub fn hit_at(&self, key: &str, ttl: Duration, now: Instant) -> bool {
        self.get(key)
            .is_some_and(|at| now.saturating_duration_since(at) < ttl)
    }

    /// Drop entries older than `max_age`. Returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(max_age, Instant::now())
    }

    pub fn sweep_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, at| now.saturating_duration_since(*at) < max_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a file name just before uploading it.
    pub fn register_upload_name(&self, name: &str) {
        self.insert(format!("{FILE_NAME_PREFIX}{name}"));
    }

    /// Record the ID Slack assigned to a file we uploaded.
    pub fn register_upload_id(&self, id: &str) {
        self.insert(format!("{FILE_ID_PREFIX}{id}"));
    }

    /// Whether an inbound file is the echo of one of our uploads.
    pub fn own_upload(&self, file: &SlackFile) -> Option<OwnUpload> {
        self.own_upload_at(file, Instant::now())
    }

    pub fn own_upload_at(&self, file: &SlackFile, now: Instant) -> Option<OwnUpload> {
        if !file.id.is_empty() && self.hit_at(&format!("{FILE_ID_PREFIX}{}", file.id), FILE_ID_TTL, now)
        {
            return Some(OwnUpload::ById);
        }
        if !file.name.is_empty()
            && self.hit_at(
                &format!("{FILE_NAME_PREFIX}{}", file.name),
                FILE_NAME_TTL,
                now,
            )
        {
            return Some(OwnUpload::ByName);
        }
        None
    }
}
