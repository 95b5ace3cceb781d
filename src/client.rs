//! HTTP access to the metadata and comment-listing endpoints.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::StatusCode;

use crate::config::Settings;
use crate::error::Result;
use crate::model::SessionDescriptor;

/// Envelope `code` the API answers with when the cookies are not logged in.
pub const NOT_LOGGED_IN: i64 = -101;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

/// Raw answer of a single request.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: settings.api_base.trim_end_matches('/').to_string(),
            timeout: settings.request_timeout,
        })
    }

    /// Video details, used for the title.
    pub async fn video_view(
        &self,
        video_id: &str,
        session: &SessionDescriptor,
    ) -> Result<ApiResponse> {
        let response = self
            .http
            .get(format!("{}/x/web-interface/view", self.base_url))
            .query(&[("bvid", video_id)])
            .headers(session_headers(session)?)
            .timeout(self.timeout)
            .send()
            .await?;
        read(response).await
    }

    /// One page of top-level comments in chronological mode.
    pub async fn reply_page(
        &self,
        video_id: &str,
        page: u32,
        session: &SessionDescriptor,
    ) -> Result<ApiResponse> {
        let page = page.to_string();
        let response = self
            .http
            .get(format!("{}/x/v2/reply/main", self.base_url))
            .query(&[
                ("type", "1"),
                ("oid", video_id),
                ("mode", "3"),
                ("next", page.as_str()),
            ])
            .headers(session_headers(session)?)
            .timeout(self.timeout)
            .send()
            .await?;
        read(response).await
    }
}

async fn read(response: reqwest::Response) -> Result<ApiResponse> {
    let status = response.status();
    let body = response.text().await?;
    Ok(ApiResponse { status, body })
}

fn session_headers(session: &SessionDescriptor) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&session.cookie_string)?);
    headers.insert(USER_AGENT, HeaderValue::from_str(&session.user_agent)?);
    Ok(headers)
}

/// Statuses that mean the session itself was refused.
pub fn is_auth_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

/// Statuses worth asking again for.
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_carry_cookie_and_user_agent() {
        let session = SessionDescriptor {
            cookie_string: "SESSDATA=abc; DedeUserID=1".into(),
            user_agent: "Mozilla/5.0".into(),
        };
        let headers = session_headers(&session).unwrap();
        assert_eq!(headers[COOKIE], "SESSDATA=abc; DedeUserID=1");
        assert_eq!(headers[USER_AGENT], "Mozilla/5.0");
    }

    #[test]
    fn control_characters_in_cookie_are_rejected() {
        let session = SessionDescriptor {
            cookie_string: "bad\nvalue".into(),
            user_agent: "ua".into(),
        };
        assert!(session_headers(&session).is_err());
    }

    #[test]
    fn status_classes() {
        assert!(is_auth_rejection(StatusCode::FORBIDDEN));
        assert!(!is_auth_rejection(StatusCode::NOT_FOUND));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }
}
