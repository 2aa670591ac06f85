//! Discrete progress events emitted by long-running pipeline stages.
//!
//! Stages only see the [`ProgressSink`] trait; whether events end up in the
//! tracing log, on stdout for a streaming consumer, or in memory is decided
//! by the caller.

use std::io::Write;
use std::sync::Mutex;

use tracing::{error, info};

/// Lifecycle marker for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Start,
    Done,
    Error,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Start => "START",
            EventStatus::Done => "DONE",
            EventStatus::Error => "ERROR",
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Status { status: EventStatus, message: String },
    Progress { percent: u8, context: String },
    Log(String),
}

/// Receiver for pipeline events.
pub trait ProgressSink {
    fn status(&self, status: EventStatus, message: &str);
    fn progress(&self, percent: u8, context: &str);
    fn log(&self, line: &str);
}

/// Integer percentage of `done` out of `total`, clamped to 100.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn status(&self, status: EventStatus, message: &str) {
        match status {
            EventStatus::Error => error!(status = status.as_str(), "{message}"),
            _ => info!(status = status.as_str(), "{message}"),
        }
    }

    fn progress(&self, percent: u8, context: &str) {
        info!(percent, "{context}");
    }

    fn log(&self, line: &str) {
        info!("{line}");
    }
}

/// Prints the line protocol read by the live-progress dashboard:
///
/// ```text
/// EVENT_STATUS: START, Training detector models
/// PROGRESS_UPDATE: 40% (Finished gaussian_nb_detector - 2/5)
/// EVENT_LOG: Training Gaussian Nb (detector)
/// ```
pub struct LineSink<W: Write + Send> {
    out: Mutex<W>,
}

impl LineSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.out.into_inner().ok()
    }

    fn emit(&self, line: String) {
        if let Ok(mut out) = self.out.lock() {
            // A closed pipe must not take the run down with it.
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    }
}

impl<W: Write + Send> ProgressSink for LineSink<W> {
    fn status(&self, status: EventStatus, message: &str) {
        self.emit(format!("EVENT_STATUS: {}, {message}", status.as_str()));
    }

    fn progress(&self, percent: u8, context: &str) {
        self.emit(format!("PROGRESS_UPDATE: {percent}% ({context})"));
    }

    fn log(&self, line: &str) {
        self.emit(format!("EVENT_LOG: {line}"));
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Statuses in emission order.
    pub fn statuses(&self) -> Vec<EventStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressSink for RecordingSink {
    fn status(&self, status: EventStatus, message: &str) {
        self.push(PipelineEvent::Status {
            status,
            message: message.to_string(),
        });
    }

    fn progress(&self, percent: u8, context: &str) {
        self.push(PipelineEvent::Progress {
            percent,
            context: context.to_string(),
        });
    }

    fn log(&self, line: &str) {
        self.push(PipelineEvent::Log(line.to_string()));
    }
}

/// Sends every event to two sinks.
pub struct TeeSink<A, B> {
    pub first: A,
    pub second: B,
}

impl<A: ProgressSink, B: ProgressSink> ProgressSink for TeeSink<A, B> {
    fn status(&self, status: EventStatus, message: &str) {
        self.first.status(status, message);
        self.second.status(status, message);
    }

    fn progress(&self, percent: u8, context: &str) {
        self.first.progress(percent, context);
        self.second.progress(percent, context);
    }

    fn log(&self, line: &str) {
        self.first.log(line);
        self.second.log(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_sink_uses_dashboard_protocol() {
        let sink = LineSink::new(Vec::new());
        sink.status(EventStatus::Start, "Training detector models");
        sink.progress(40, "Finished gaussian_nb_detector - 2/5");
        sink.log("hello");
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "EVENT_STATUS: START, Training detector models\n\
             PROGRESS_UPDATE: 40% (Finished gaussian_nb_detector - 2/5)\n\
             EVENT_LOG: hello\n"
        );
    }

    #[test]
    fn percent_rounds_and_handles_zero_total() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(5, 5), 100);
    }

    #[test]
    fn recording_sink_filters_statuses() {
        let sink = RecordingSink::new();
        sink.status(EventStatus::Start, "a");
        sink.log("b");
        sink.status(EventStatus::Done, "c");
        assert_eq!(sink.statuses(), vec![EventStatus::Start, EventStatus::Done]);
        assert_eq!(sink.events().len(), 3);
    }
}
