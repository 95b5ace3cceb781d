//! One harvesting task: session, title, comments, CSV.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::client::ApiClient;
use crate::config::Settings;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::events::{EventSink, MonotonicProgress};
use crate::export;
use crate::fetcher::{CommentFetcher, StopReason};
use crate::metadata;
use crate::model::{SessionDescriptor, VideoMetadata};
use crate::spider::SessionSource;

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub video: VideoMetadata,
    pub records: usize,
    pub stop: StopReason,
    pub output: PathBuf,
}

/// Runs tasks against a shared credential store and session source.
///
/// Cheap to clone; clones share the store, the login lock and the set of
/// videos currently being harvested.
pub struct Harvester<S, A> {
    inner: Arc<Inner<S, A>>,
}

struct Inner<S, A> {
    settings: Settings,
    client: ApiClient,
    store: S,
    acquirer: A,
    login_lock: tokio::sync::Mutex<()>,
    in_flight: Mutex<HashSet<String>>,
}

impl<S, A> Clone for Harvester<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Marks a video as being harvested until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    video_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.video_id);
    }
}

impl<S, A> Harvester<S, A>
where
    S: CredentialStore + 'static,
    A: SessionSource + 'static,
{
    pub fn new(settings: Settings, store: S, acquirer: A) -> Result<Self> {
        let client = ApiClient::new(&settings)?;
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                client,
                store,
                acquirer,
                login_lock: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Forgets the saved session so the next task logs in again.
    pub fn invalidate_session(&self) -> Result<()> {
        self.inner.store.invalidate()
    }

    /// Runs [`Harvester::run`] on the runtime in the background.
    pub fn spawn<E>(&self, video_id: impl Into<String>, sink: E) -> JoinHandle<Result<TaskReport>>
    where
        E: EventSink + 'static,
    {
        let harvester = self.clone();
        let video_id = video_id.into();
        tokio::spawn(async move { harvester.run(&video_id, &sink).await })
    }

    pub async fn run<E: EventSink>(&self, video_id: &str, sink: &E) -> Result<TaskReport> {
        let _in_flight = self.claim(video_id)?;
        let sink = &MonotonicProgress::new(sink);
        let inner = &*self.inner;

        sink.log(format!("starting harvest of {video_id}"));
        let mut session = self.session(sink).await?;

        let mut video = metadata::resolve(&inner.client, video_id, &session).await;
        sink.log(format!("video title: {}", video.title));

        let fetcher = CommentFetcher::new(&inner.client, &inner.settings);
        let mut renewals = 0;
        let outcome = loop {
            let outcome = fetcher.fetch(video_id, &session, sink).await?;
            if !matches!(outcome.stop, StopReason::AuthRejected { .. }) {
                break outcome;
            }
            if renewals >= inner.settings.max_reauth {
                warn!("session for {video_id} rejected after {renewals} renewal(s)");
                sink.log(format!(
                    "the session was rejected again after {renewals} new login(s)"
                ));
                break outcome;
            }
            renewals += 1;

            sink.log("the saved session was rejected, a new login is needed");
            session = self.renew_session(&session, sink).await?;
            if video.title == video.id {
                video = metadata::resolve(&inner.client, video_id, &session).await;
            }
        };

        if outcome.stop.is_failure() {
            sink.log(format!(
                "stopped early ({}), keeping {} comments",
                outcome.stop,
                outcome.records.len()
            ));
        }
        sink.log(format!("collected {} comments", outcome.records.len()));

        let output = export::export(&outcome.records, &video.title, &inner.settings.output_dir)?;
        sink.log(format!("comments saved to {}", output.display()));
        sink.progress(100);

        info!("{video_id}: {} records, {}", outcome.records.len(), outcome.stop);
        Ok(TaskReport {
            video,
            records: outcome.records.len(),
            stop: outcome.stop,
            output,
        })
    }

    fn claim(&self, video_id: &str) -> Result<InFlight<'_>> {
        let set = &self.inner.in_flight;
        let mut running = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(video_id.to_string()) {
            return Err(Error::AlreadyRunning(video_id.to_string()));
        }
        Ok(InFlight {
            set,
            video_id: video_id.to_string(),
        })
    }

    async fn session<E: EventSink>(&self, sink: &E) -> Result<SessionDescriptor> {
        if let Some(session) = self.inner.store.load()? {
            sink.log("using saved session");
            return Ok(session);
        }

        let _login = self.inner.login_lock.lock().await;
        // Another task may have finished a login while this one waited.
        if let Some(session) = self.inner.store.load()? {
            sink.log("using session from a concurrent login");
            return Ok(session);
        }
        self.login(sink).await
    }

    async fn renew_session<E: EventSink>(
        &self,
        rejected: &SessionDescriptor,
        sink: &E,
    ) -> Result<SessionDescriptor> {
        let _login = self.inner.login_lock.lock().await;
        if let Some(current) = self.inner.store.load()? {
            if &current != rejected {
                sink.log("using session renewed by a concurrent task");
                return Ok(current);
            }
        }
        self.inner.store.invalidate()?;
        self.login(sink).await
    }

    /// Caller holds `login_lock`.
    async fn login<E: EventSink>(&self, sink: &E) -> Result<SessionDescriptor> {
        sink.log("no usable session, please log in in the browser window");
        let session = self.inner.acquirer.acquire().await?;
        self.inner.store.save(&session)?;
        sink.log("login captured and saved");
        Ok(session)
    }
}
