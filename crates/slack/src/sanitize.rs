//! Rewrites Slack's message markup into plain text.
//!
//! The dispatcher applies [`sanitize`], which runs the passes in a fixed
//! order: mentions, variables, channel links, URLs, then HTML entities.

use std::{borrow::Cow, sync::LazyLock};

use regex::{Captures, Regex};

#[allow(clippy::expect_used)]
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([a-zA-Z0-9]+)>").expect("valid mention regex"));

#[allow(clippy::expect_used)]
static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!((?:subteam\^)?[a-zA-Z0-9]+)(?:\|@?(.+?))?>").expect("valid variable regex")
});

#[allow(clippy::expect_used)]
static CHANNEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#[a-zA-Z0-9]+\|(.+?)>").expect("valid channel regex"));

#[allow(clippy::expect_used)]
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(.*?)(\|.*?)?>").expect("valid url regex"));

#[allow(clippy::expect_used)]
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6});")
        .expect("valid entity regex")
});

/// `<@U123>` → `@name` for users `lookup` knows; unknown IDs are kept.
pub fn replace_mention(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    MENTION_RE
        .replace_all(text, |caps: &Captures<'_>| match lookup(&caps[1]) {
            Some(name) => format!("@{name}"),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// `<!here>` → `@here`, `<!subteam^S1|@devs>` → `@devs`.
pub fn replace_variable(text: &str) -> String {
    VARIABLE_RE
        .replace_all(text, |caps: &Captures<'_>| match caps.get(2) {
            Some(label) => format!("@{}", label.as_str()),
            None => format!("@{}", &caps[1]),
        })
        .into_owned()
}

/// `<#C123|general>` → `#general`.
pub fn replace_channel(text: &str) -> String {
    CHANNEL_RE.replace_all(text, "#$1").into_owned()
}

/// `<https://x|label>` → `https://x`. A link whose label is blank is dropped.
pub fn replace_url(text: &str) -> String {
    URL_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let label = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            if label == "|" {
                String::new()
            } else {
                caps[1].to_string()
            }
        })
        .into_owned()
}

/// Decode HTML entities in one pass, so `&amp;lt;` becomes `&lt;`.
///
/// Only `&amp;`, `&lt;`, `&gt;`, `&quot;`, `&apos;` and numeric references
/// are decoded. Slack escapes nothing else; other named entities such as
/// `&nbsp;` are left as typed.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    ENTITY_RE.replace_all(text, |caps: &Captures<'_>| {
        let entity = &caps[1];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .map(|hex| u32::from_str_radix(hex, 16))
                .unwrap_or_else(|| entity.trim_start_matches('#').parse())
                .ok()
                .and_then(char::from_u32),
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
}

/// All passes, in dispatch order.
pub fn sanitize(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let text = replace_mention(text, lookup);
    let text = replace_variable(&text);
    let text = replace_channel(&text);
    let text = replace_url(&text);
    unescape_html(&text).into_owned()
}
