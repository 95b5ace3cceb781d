//! Session acquisition through an interactive browser login.
//!
//! A visible Chrome window is opened on the login page and the cookie jar is
//! polled until the identity cookies show up. There is no timeout: the wait
//! lasts as long as the person at the keyboard takes to log in.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, info, warn};
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;

use crate::config::Settings;
use crate::error::Result;
use crate::model::SessionDescriptor;

/// Cookies that only exist once the login went through.
pub const IDENTITY_COOKIES: [&str; 2] = ["DedeUserID", "SESSDATA"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The few browser operations the login flow needs.
pub trait LoginBrowser: Send + Sync {
    fn open(&self, url: &str) -> impl Future<Output = Result<()>> + Send;
    fn cookies(&self) -> impl Future<Output = Result<Vec<BrowserCookie>>> + Send;
    fn user_agent(&self) -> impl Future<Output = Result<String>> + Send;
    /// Ends the browser session. Consumes the browser so it cannot be reused.
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Anything that can hand out a fresh session.
pub trait SessionSource: Send + Sync {
    fn acquire(&self) -> impl Future<Output = Result<SessionDescriptor>> + Send;
}

/// Chrome driven over WebDriver.
///
/// Call [`LoginBrowser::close`] to shut it down. A handle dropped without that
/// (task cancellation) is quit by `WebDriver`'s own drop.
pub struct ChromeBrowser {
    driver: WebDriver,
}

impl ChromeBrowser {
    pub async fn launch(webdriver_url: &str) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--disable-gpu")?;

        debug!("connecting to webdriver at {webdriver_url}");
        let driver = WebDriver::new(webdriver_url, caps).await?;
        Ok(Self { driver })
    }
}

impl LoginBrowser for ChromeBrowser {
    async fn open(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self.driver.get_all_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|cookie| BrowserCookie::new(cookie.name, cookie.value))
            .collect())
    }

    async fn user_agent(&self) -> Result<String> {
        let ret = self
            .driver
            .execute("return navigator.userAgent;", Vec::new())
            .await?;
        Ok(ret.json().as_str().unwrap_or_default().to_string())
    }

    async fn close(self) -> Result<()> {
        self.driver.quit().await?;
        debug!("browser session closed");
        Ok(())
    }
}

/// Session acquirer backed by a real Chrome window.
#[derive(Debug, Clone)]
pub struct Spider {
    webdriver_url: String,
    login_url: String,
    poll_interval: Duration,
}

impl Spider {
    pub fn new(settings: &Settings) -> Self {
        Self {
            webdriver_url: settings.webdriver_url.clone(),
            login_url: settings.login_url.clone(),
            poll_interval: settings.poll_interval,
        }
    }
}

impl SessionSource for Spider {
    async fn acquire(&self) -> Result<SessionDescriptor> {
        info!("opening a browser for login at {}", self.login_url);
        let browser = ChromeBrowser::launch(&self.webdriver_url).await?;
        harvest_session(browser, &self.login_url, self.poll_interval).await
    }
}

/// Drives `browser` through the login and always shuts it down afterwards,
/// including when the login flow fails or panics.
pub async fn harvest_session<B: LoginBrowser>(
    browser: B,
    login_url: &str,
    poll_interval: Duration,
) -> Result<SessionDescriptor> {
    let outcome = AssertUnwindSafe(wait_for_login(&browser, login_url, poll_interval))
        .catch_unwind()
        .await;

    if let Err(e) = browser.close().await {
        warn!("browser did not shut down cleanly: {e}");
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn wait_for_login<B: LoginBrowser>(
    browser: &B,
    login_url: &str,
    poll_interval: Duration,
) -> Result<SessionDescriptor> {
    browser.open(login_url).await?;
    info!("waiting for login to complete in the browser window");

    let mut polls = 0u64;
    while !has_identity_cookies(&browser.cookies().await?) {
        polls += 1;
        if polls % 30 == 0 {
            debug!("still waiting for login after {polls} polls");
        }
        tokio::time::sleep(poll_interval).await;
    }

    let cookies = browser.cookies().await?;
    let user_agent = browser.user_agent().await?;
    info!("login detected, captured {} cookies", cookies.len());

    Ok(SessionDescriptor {
        cookie_string: cookie_header(&cookies),
        user_agent,
    })
}

pub fn has_identity_cookies(cookies: &[BrowserCookie]) -> bool {
    IDENTITY_COOKIES
        .iter()
        .all(|required| cookies.iter().any(|cookie| cookie.name == *required))
}

pub fn cookie_header(cookies: &[BrowserCookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}
