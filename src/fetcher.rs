//! Paginated comment retrieval.
//!
//! The listing endpoint never says "last page" reliably, so pagination ends on
//! whichever comes first:
//! - the server answers `replies: null`,
//! - a page adds no record that was not seen before,
//! - a request fails (after retries, if the policy allows them),
//! - the page ceiling is reached.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use log::{debug, warn};
use reqwest::StatusCode;

use crate::client::{is_auth_rejection, is_transient, ApiClient, NOT_LOGGED_IN};
use crate::config::{FailurePolicy, Settings};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::model::{ApiEnvelope, CommentRecord, RawComment, ReplyPage, SessionDescriptor, Tier};

pub const IP_REGION_PREFIX: &str = "IP属地：";

/// Why pagination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    PageLimit,
    EndOfThread { page: u32 },
    NoNewRecords { page: u32 },
    HttpStatus { page: u32, status: u16 },
    Transport { page: u32, detail: String },
    ApiError { page: u32, code: i64 },
    AuthRejected { page: u32 },
}

impl StopReason {
    /// Stops that leave comments behind on the server.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::HttpStatus { .. }
                | StopReason::Transport { .. }
                | StopReason::ApiError { .. }
                | StopReason::AuthRejected { .. }
        )
    }

    /// Failures worth asking the same page again for.
    fn is_retryable(&self) -> bool {
        match self {
            StopReason::HttpStatus { status, .. } => {
                StatusCode::from_u16(*status).is_ok_and(is_transient)
            }
            StopReason::Transport { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::PageLimit => write!(f, "page limit reached"),
            StopReason::EndOfThread { page } => write!(f, "end of thread at page {page}"),
            StopReason::NoNewRecords { page } => write!(f, "no new comments on page {page}"),
            StopReason::HttpStatus { page, status } => {
                write!(f, "page {page} failed with status {status}")
            }
            StopReason::Transport { page, detail } => write!(f, "page {page} failed: {detail}"),
            StopReason::ApiError { page, code } => {
                write!(f, "page {page} refused by the api with code {code}")
            }
            StopReason::AuthRejected { page } => write!(f, "session rejected at page {page}"),
        }
    }
}

/// Page cursor plus the record count seen after the previous page.
#[derive(Debug, Clone)]
pub struct Pagination {
    page: u32,
    max_pages: u32,
    last_count: usize,
}

impl Pagination {
    pub fn new(max_pages: u32) -> Self {
        Self {
            page: 0,
            max_pages,
            last_count: 0,
        }
    }

    /// Moves to the next page, or `None` once the ceiling is reached.
    pub fn advance(&mut self) -> Option<u32> {
        if self.page >= self.max_pages {
            return None;
        }
        self.page += 1;
        Some(self.page)
    }

    pub fn is_last(&self) -> bool {
        self.page >= self.max_pages
    }

    pub fn progress(&self) -> u8 {
        if self.max_pages == 0 {
            return 100;
        }
        (u64::from(self.page) * 100 / u64::from(self.max_pages)) as u8
    }

    /// Records the total after the current page. Returns the stop reason when
    /// the page contributed nothing.
    pub fn settle(&mut self, total: usize) -> Option<StopReason> {
        if total == self.last_count {
            return Some(StopReason::NoNewRecords { page: self.page });
        }
        self.last_count = total;
        None
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<CommentRecord>,
    pub stop: StopReason,
}

/// Records in encounter order, deduplicated by comment id.
#[derive(Debug, Default)]
struct Collected {
    records: Vec<CommentRecord>,
    seen: HashSet<u64>,
}

impl Collected {
    fn absorb(&mut self, comments: &[RawComment]) -> usize {
        let before = self.records.len();
        for comment in comments {
            for record in flatten(comment) {
                if self.seen.insert(record.id) {
                    self.records.push(record);
                }
            }
        }
        self.records.len() - before
    }
}

pub struct CommentFetcher<'a> {
    client: &'a ApiClient,
    max_pages: u32,
    page_delay: Duration,
    policy: FailurePolicy,
}

impl<'a> CommentFetcher<'a> {
    pub fn new(client: &'a ApiClient, settings: &Settings) -> Self {
        Self {
            client,
            max_pages: settings.max_pages,
            page_delay: settings.page_delay,
            policy: settings.failure_policy,
        }
    }

    /// Walks the listing until a stop condition and returns everything seen.
    ///
    /// Request failures end the walk with a partial result. Only a body that
    /// does not match the documented shape is an error.
    pub async fn fetch<S: EventSink>(
        &self,
        video_id: &str,
        session: &SessionDescriptor,
        sink: &S,
    ) -> Result<FetchOutcome> {
        let mut pagination = Pagination::new(self.max_pages);
        let mut collected = Collected::default();

        let stop = loop {
            let Some(page) = pagination.advance() else {
                break StopReason::PageLimit;
            };
            sink.progress(pagination.progress());

            let body = match self.request_page(video_id, page, session, sink).await? {
                ControlFlow::Continue(body) => body,
                ControlFlow::Break(reason) => break reason,
            };

            let envelope: ApiEnvelope<ReplyPage> =
                serde_json::from_str(&body).map_err(|source| Error::Parse {
                    endpoint: "reply listing",
                    source,
                })?;

            if envelope.code == NOT_LOGGED_IN {
                sink.log(format!("page {page}: the api says the session is not logged in"));
                break StopReason::AuthRejected { page };
            }
            let Some(data) = envelope.data else {
                sink.log(format!(
                    "page {page}: the api refused the request with code {}",
                    envelope.code
                ));
                break StopReason::ApiError {
                    page,
                    code: envelope.code,
                };
            };
            let Some(comments) = data.replies else {
                debug!("page {page} has no replies field, thread finished");
                break StopReason::EndOfThread { page };
            };

            let added = collected.absorb(&comments);
            debug!(
                "page {page}: {} comments, {added} new records, {} total",
                comments.len(),
                collected.records.len()
            );

            if let Some(reason) = pagination.settle(collected.records.len()) {
                break reason;
            }
            if !pagination.is_last() {
                tokio::time::sleep(self.page_delay).await;
            }
        };

        debug!("pagination of {video_id} ended: {stop}");
        // A rejected session is followed by a login and a new walk.
        if !matches!(stop, StopReason::AuthRejected { .. }) {
            sink.progress(100);
        }
        Ok(FetchOutcome {
            records: collected.records,
            stop,
        })
    }

    async fn request_page<S: EventSink>(
        &self,
        video_id: &str,
        page: u32,
        session: &SessionDescriptor,
        sink: &S,
    ) -> Result<ControlFlow<StopReason, String>> {
        let mut retries = 0;
        loop {
            let stop = match self.client.reply_page(video_id, page, session).await {
                Ok(response) if response.status == StatusCode::OK => {
                    return Ok(ControlFlow::Continue(response.body));
                }
                Ok(response) if is_auth_rejection(response.status) => {
                    sink.log(format!(
                        "page {page}: session rejected with status {}",
                        response.status.as_u16()
                    ));
                    return Ok(ControlFlow::Break(StopReason::AuthRejected { page }));
                }
                Ok(response) => StopReason::HttpStatus {
                    page,
                    status: response.status.as_u16(),
                },
                Err(Error::Http(e)) => StopReason::Transport {
                    page,
                    detail: error_chain(&e),
                },
                Err(e) => return Err(e),
            };

            if let FailurePolicy::Retry { attempts, backoff } = self.policy {
                if stop.is_retryable() && retries < attempts {
                    retries += 1;
                    sink.log(format!("{stop}, retrying ({retries}/{attempts})"));
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            warn!("giving up on {video_id}: {stop}");
            sink.log(stop.to_string());
            return Ok(ControlFlow::Break(stop));
        }
    }
}

/// `error` followed by each of its sources, joined with `": "`.
fn error_chain(error: &dyn StdError) -> String {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

/// A top-level comment followed by its direct replies.
pub fn flatten(comment: &RawComment) -> Vec<CommentRecord> {
    let replies = comment.replies.as_deref().unwrap_or_default();
    let mut records = Vec::with_capacity(1 + replies.len());
    records.push(to_record(comment, None));
    records.extend(replies.iter().map(|reply| to_record(reply, Some(comment))));
    records
}

fn to_record(raw: &RawComment, parent: Option<&RawComment>) -> CommentRecord {
    let (tier, replied_to_author, parent_body) = match parent {
        Some(parent) => (
            Tier::Reply,
            parent.member.uname.clone(),
            parent.content.message.clone(),
        ),
        None => (Tier::TopLevel, String::new(), String::new()),
    };

    CommentRecord {
        id: raw.rpid,
        tier,
        author: raw.member.uname.clone(),
        body: raw.content.message.clone(),
        replied_to_author,
        gender: raw.member.sex.clone(),
        user_level: raw.member.level_info.current_level,
        like_count: raw.like,
        posted_at: local_time(raw.ctime),
        ip_region: strip_region_prefix(&raw.reply_control.location).to_string(),
        parent_body,
    }
}

fn local_time(epoch_secs: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
}

pub fn strip_region_prefix(location: &str) -> &str {
    location.strip_prefix(IP_REGION_PREFIX).unwrap_or(location)
}
