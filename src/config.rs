use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;

pub static API_BASE: &str = "https://api.bilibili.com";
pub static LOGIN_URL: &str = "https://www.bilibili.com";
pub static WEBDRIVER_URL: &str = "http://localhost:9515";

/// Directory holding the running executable. Credential and result files live
/// next to the program rather than the shell's working directory.
pub static INSTALL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
});

/// What the fetcher does when a page request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// End pagination on the first failed page and keep what was collected.
    Abort,
    /// Re-request the same page up to `attempts` more times, sleeping
    /// `backoff` in between, for transport errors, 429 and 5xx responses.
    Retry { attempts: u32, backoff: Duration },
}

impl FailurePolicy {
    pub fn from_retries(attempts: u32, backoff: Duration) -> Self {
        if attempts == 0 {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Retry { attempts, backoff }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base: String,
    pub login_url: String,
    pub webdriver_url: String,
    pub credentials_path: PathBuf,
    pub output_dir: PathBuf,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
    /// How many times an expired session may be replaced within one task.
    pub max_reauth: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            login_url: LOGIN_URL.to_string(),
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| WEBDRIVER_URL.to_string()),
            credentials_path: INSTALL_DIR.join("headers.json"),
            output_dir: INSTALL_DIR.join("results"),
            max_pages: 500,
            page_delay: Duration::from_millis(300),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            failure_policy: FailurePolicy::Abort,
            max_reauth: 1,
        }
    }
}
