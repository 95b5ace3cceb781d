use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Cookie header plus user agent harvested from a logged-in browser.
///
/// The JSON keys match the header names so the credential file can be
/// inspected and edited by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "Cookie")]
    pub cookie_string: String,
    #[serde(rename = "User-Agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    TopLevel,
    Reply,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::TopLevel => "top-level",
            Tier::Reply => "reply",
        }
    }
}

/// One row of the exported table. Field order is the column order.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub id: u64,
    pub tier: Tier,
    pub author: String,
    pub body: String,
    /// Empty for top-level comments.
    pub replied_to_author: String,
    pub gender: String,
    pub user_level: i64,
    pub like_count: i64,
    pub posted_at: DateTime<Local>,
    pub ip_region: String,
    /// Empty for top-level comments.
    pub parent_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
}

// Wire shapes of the two endpoints. Only the fields the export needs are
// declared; serde ignores the rest.

/// Envelope shared by both endpoints.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: i64,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct ViewData {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyPage {
    /// `null` marks the end of the thread.
    #[serde(default)]
    pub replies: Option<Vec<RawComment>>,
}

#[derive(Debug, Deserialize)]
pub struct RawComment {
    pub rpid: u64,
    pub member: RawMember,
    pub content: RawContent,
    pub like: i64,
    pub ctime: i64,
    pub reply_control: RawReplyControl,
    #[serde(default)]
    pub replies: Option<Vec<RawComment>>,
}

#[derive(Debug, Deserialize)]
pub struct RawMember {
    pub uname: String,
    pub sex: String,
    pub level_info: RawLevelInfo,
}

#[derive(Debug, Deserialize)]
pub struct RawLevelInfo {
    pub current_level: i64,
}

#[derive(Debug, Deserialize)]
pub struct RawContent {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RawReplyControl {
    #[serde(default)]
    pub location: String,
}
