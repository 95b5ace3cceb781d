use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a harvesting task.
///
/// Failures inside the pagination loop are not represented here: they are
/// logged and end the loop with a partial result instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("browser automation failed: {0}")]
    Browser(#[from] thirtyfour::error::WebDriverError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid session header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("malformed response from {endpoint}: {source}")]
    Parse {
        endpoint: &'static str,
        source: serde_json::Error,
    },

    #[error("credential file {}: {message}", path.display())]
    Credentials { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not write csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("a task for video {0} is already running")]
    AlreadyRunning(String),
}

pub type Result<T> = std::result::Result<T, Error>;
