//! Analysis job progress reporting.
//!
//! Reports observable progress during `bka analyze` so users see the job's
//! status, percentage and backend message while it runs. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::jobs::TrackerState;
use crate::models::JobStatus;

/// A single progress event for an analysis job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobProgressEvent {
    /// The create-job request is being sent.
    Submitted { filename: String },
    /// A poll response for a running job.
    Progress {
        job_id: String,
        status: JobStatus,
        progress: u8,
        message: Option<String>,
    },
    Completed { job_id: String, book_id: String },
    Failed { job_id: String, error: String },
}

impl JobProgressEvent {
    /// Project a tracker state into an event. `Idle` has nothing to report.
    pub fn from_state(state: &TrackerState) -> Option<Self> {
        match state {
            TrackerState::Idle { .. } => None,
            TrackerState::Submitted { filename } => Some(Self::Submitted {
                filename: filename.clone(),
            }),
            TrackerState::Polling {
                job_id,
                status,
                progress,
                message,
            } => Some(Self::Progress {
                job_id: job_id.clone(),
                status: *status,
                progress: *progress,
                message: message.clone(),
            }),
            TrackerState::Completed { job_id, book_id } => Some(Self::Completed {
                job_id: job_id.clone(),
                book_id: book_id.clone(),
            }),
            TrackerState::Failed { job_id, error } => Some(Self::Failed {
                job_id: job_id.clone(),
                error: error.clone(),
            }),
        }
    }
}

/// Reports job progress. Implementations write to stderr (human or JSON).
pub trait JobProgressReporter: Send + Sync {
    fn report(&self, event: JobProgressEvent);
}

/// Human-friendly progress on stderr:
/// `analyze 3f2a…  processing  [########------------]  40%  Analyzing chunk batch 2/5`.
pub struct StderrProgress;

impl JobProgressReporter for StderrProgress {
    fn report(&self, event: JobProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &JobProgressEvent) -> String {
    match event {
        JobProgressEvent::Submitted { filename } => {
            format!("analyze {}  submitting...\n", filename)
        }
        JobProgressEvent::Progress {
            job_id,
            status,
            progress,
            message,
        } => {
            let mut line = format!(
                "analyze {}  {:<10}  {}  {:>3}%",
                short_id(job_id),
                status,
                progress_bar(*progress, 20),
                progress
            );
            if let Some(msg) = message {
                line.push_str("  ");
                line.push_str(msg);
            }
            line.push('\n');
            line
        }
        JobProgressEvent::Completed { job_id, book_id } => {
            format!("analyze {}  completed  book {}\n", short_id(job_id), book_id)
        }
        JobProgressEvent::Failed { job_id, error } => {
            format!("analyze {}  failed  {}\n", short_id(job_id), error)
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JobProgressReporter for JsonProgress {
    fn report(&self, event: JobProgressEvent) {
        let obj = json_event(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn json_event(event: &JobProgressEvent) -> serde_json::Value {
    match event {
        JobProgressEvent::Submitted { filename } => serde_json::json!({
            "event": "submitted",
            "filename": filename
        }),
        JobProgressEvent::Progress {
            job_id,
            status,
            progress,
            message,
        } => serde_json::json!({
            "event": "progress",
            "job_id": job_id,
            "status": status,
            "progress": progress,
            "message": message
        }),
        JobProgressEvent::Completed { job_id, book_id } => serde_json::json!({
            "event": "completed",
            "job_id": job_id,
            "book_id": book_id
        }),
        JobProgressEvent::Failed { job_id, error } => serde_json::json!({
            "event": "failed",
            "job_id": job_id,
            "error": error
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl JobProgressReporter for NoProgress {
    fn report(&self, _event: JobProgressEvent) {}
}

fn progress_bar(progress: u8, width: usize) -> String {
    let filled = (progress.min(100) as usize * width) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn JobProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
