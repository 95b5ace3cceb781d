//! Outbound notifications from a running task.
//!
//! The fetcher and orchestrator only know [`EventSink`]; whoever renders
//! progress (the CLI, a test) decides what a sink is.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Percentage in `0..=100`, non-decreasing within one task.
    Progress(u8),
    /// One human-readable line.
    Log(String),
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);

    fn progress(&self, percent: u8) {
        self.emit(TaskEvent::Progress(percent.min(100)));
    }

    fn log(&self, line: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(TaskEvent::Log(line.into()));
    }
}

/// Sink that keeps every event, in order.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<TaskEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Log(line) => Some(line),
                TaskEvent::Progress(_) => None,
            })
            .collect()
    }

    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Progress(value) => Some(value),
                TaskEvent::Log(_) => None,
            })
            .collect()
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl<S: EventSink> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: TaskEvent) {
        (**self).emit(event);
    }
}

/// Forwards events but drops progress values below the highest one already
/// sent, so a restarted fetch never moves the bar backwards.
pub struct MonotonicProgress<'a, S> {
    inner: &'a S,
    high: AtomicU8,
}

impl<'a, S: EventSink> MonotonicProgress<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self {
            inner,
            high: AtomicU8::new(0),
        }
    }
}

impl<S: EventSink> EventSink for MonotonicProgress<'_, S> {
    fn emit(&self, event: TaskEvent) {
        if let TaskEvent::Progress(value) = event {
            if self.high.fetch_max(value, Ordering::SeqCst) > value {
                return;
            }
        }
        self.inner.emit(event);
    }
}
