// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use comment_spider_rs::config::{FailurePolicy, Settings};
use comment_spider_rs::credentials::FileCredentialStore;
use comment_spider_rs::events::{EventSink, TaskEvent};
use comment_spider_rs::fetcher::StopReason;
use comment_spider_rs::spider::Spider;
use comment_spider_rs::task::Harvester;
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Harvest the full comment tree of videos into CSV files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Video ids (BV numbers) to harvest
    #[arg(required = true)]
    video_ids: Vec<String>,

    /// Hard ceiling on listing pages per video
    #[arg(long, default_value_t = 500)]
    max_pages: u32,

    /// Pause between pages in milliseconds
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,

    /// Extra attempts for a failed page; 0 stops at the first failure
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Pause before each retry in milliseconds
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,

    /// Where CSV files are written (default: `results` next to the program)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Saved session file (default: `headers.json` next to the program)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// WebDriver server used for the login browser
    #[arg(long)]
    webdriver: Option<String>,

    /// Discard the saved session and log in again
    #[arg(long)]
    relogin: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.max_pages = self.max_pages;
        settings.page_delay = Duration::from_millis(self.delay_ms);
        settings.failure_policy =
            FailurePolicy::from_retries(self.retries, Duration::from_millis(self.backoff_ms));
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(path) = &self.credentials {
            settings.credentials_path = path.clone();
        }
        if let Some(url) = &self.webdriver {
            settings.webdriver_url = url.clone();
        }
        settings
    }
}

/// Tags every event with the video it belongs to.
struct Tagged {
    video_id: String,
    tx: UnboundedSender<(String, TaskEvent)>,
}

impl EventSink for Tagged {
    fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send((self.video_id.clone(), event));
    }
}

/// Prints log lines and keeps one status line with every task's progress.
async fn render(mut rx: UnboundedReceiver<(String, TaskEvent)>) -> io::Result<()> {
    let mut progress: BTreeMap<String, u8> = BTreeMap::new();
    let mut stdout = io::stdout();

    while let Some((video_id, event)) = rx.recv().await {
        queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        match event {
            TaskEvent::Progress(value) => {
                progress.insert(video_id, value);
            }
            TaskEvent::Log(line) => {
                queue!(stdout, Print(format!("[{video_id}] {line}\n")))?;
            }
        }
        let status = progress
            .iter()
            .map(|(id, value)| format!("{id} {value:>3}%"))
            .collect::<Vec<_>>()
            .join(" | ");
        queue!(stdout, Print(status))?;
        stdout.flush()?;
    }

    queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    stdout.flush()
}

/// Drops repeated ids, keeping the first occurrence of each.
fn unique_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = args.settings();
    let store = FileCredentialStore::new(&settings.credentials_path);
    let spider = Spider::new(&settings);
    let harvester =
        Harvester::new(settings, store, spider).context("Could not set up the HTTP client")?;

    if args.relogin {
        println!("Discarding saved session at {}", harvester.store().path().display());
        harvester
            .invalidate_session()
            .context("Could not discard the saved session")?;
    }

    println!(
        "Results will be written to {}",
        harvester.settings().output_dir.display()
    );

    let video_ids = unique_ids(&args.video_ids);

    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render(rx));

    let handles: Vec<_> = video_ids
        .iter()
        .map(|video_id| {
            let sink = Tagged {
                video_id: video_id.clone(),
                tx: tx.clone(),
            };
            (video_id.clone(), harvester.spawn(video_id.clone(), sink))
        })
        .collect();
    drop(tx);

    let aborts: Vec<_> = handles.iter().map(|(_, handle)| handle.abort_handle()).collect();
    let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();

    let results = tokio::select! {
        results = futures::future::join_all(handles) => results,
        _ = tokio::signal::ctrl_c() => {
            // Aborting drops the tasks, which closes any open login browser.
            for abort in &aborts {
                abort.abort();
            }
            let _ = renderer.await;
            anyhow::bail!("Interrupted, no files were written for unfinished videos");
        }
    };

    renderer
        .await
        .context("Progress renderer panicked")?
        .context("Could not write to the terminal")?;

    let mut failed = 0;
    for (video_id, result) in ids.iter().zip(results) {
        match result {
            Ok(Ok(report)) => {
                println!(
                    "{video_id}: {} comments -> {} ({})",
                    report.records,
                    report.output.display(),
                    report.stop
                );
                if matches!(report.stop, StopReason::AuthRejected { .. }) {
                    failed += 1;
                }
            }
            Ok(Err(e)) => {
                eprintln!("{video_id}: failed: {e}");
                failed += 1;
            }
            Err(e) => {
                eprintln!("{video_id}: task crashed: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} videos failed", ids.len());
    }
    Ok(())
}
