use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// HTML body.
    #[serde(default)]
    pub content: String,
    pub account: Account,
    #[serde(default)]
    pub media_attachments: Vec<MediaAttachment>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Status {
    /// Public link to the post, falling back to its ActivityPub URI.
    pub fn link(&self) -> &str {
        self.url.as_deref().unwrap_or(&self.uri)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// `user` for local accounts, `user@domain` for remote ones.
    pub acct: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
}

impl MediaAttachment {
    pub fn is_image(&self) -> bool {
        self.kind == "image"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// Outcome of looking a status up by id.
#[derive(Debug, Clone)]
pub enum StatusLookup {
    Found(Box<Status>),
    /// Authenticated 404/410: the post is definitely gone.
    Gone,
    /// Anything that does not prove deletion (unauthenticated 404, 401/403, 5xx).
    Ambiguous { status: u16 },
}

#[derive(Debug, Serialize)]
pub(crate) struct NewStatus<'a> {
    pub status: &'a str,
    pub in_reply_to_id: &'a str,
    pub visibility: &'a str,
}
