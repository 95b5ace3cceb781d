use log::{debug, warn};
use reqwest::StatusCode;

use crate::client::ApiClient;
use crate::model::{ApiEnvelope, SessionDescriptor, VideoMetadata, ViewData};

/// Looks up the video's title. Any failure falls back to the id itself.
pub async fn resolve(
    client: &ApiClient,
    video_id: &str,
    session: &SessionDescriptor,
) -> VideoMetadata {
    let title = fetch_title(client, video_id, session)
        .await
        .unwrap_or_else(|| video_id.to_string());
    VideoMetadata {
        id: video_id.to_string(),
        title,
    }
}

async fn fetch_title(
    client: &ApiClient,
    video_id: &str,
    session: &SessionDescriptor,
) -> Option<String> {
    let response = match client.video_view(video_id, session).await {
        Ok(response) => response,
        Err(e) => {
            warn!("title lookup for {video_id} failed: {e}");
            return None;
        }
    };

    if response.status != StatusCode::OK {
        warn!(
            "title lookup for {video_id} returned status {}",
            response.status.as_u16()
        );
        return None;
    }

    match serde_json::from_str::<ApiEnvelope<ViewData>>(&response.body) {
        Ok(envelope) => {
            let title = envelope.data.and_then(|data| data.title);
            if title.is_none() {
                debug!(
                    "view response for {video_id} has no title (code {})",
                    envelope.code
                );
            }
            title
        }
        Err(e) => {
            warn!("title lookup for {video_id} returned unreadable body: {e}");
            None
        }
    }
}
