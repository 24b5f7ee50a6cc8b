//! Indexing progress reporting.
//!
//! Reports observable progress during `svidx index` so users see how many
//! respondents have been written and how many are left. CLI progress is
//! emitted on **stderr** so stdout remains parseable for scripts; the server
//! and background jobs report through `tracing` instead.

use std::io::Write;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexProgressEvent {
    /// Inputs are parsed and the index is about to be rebuilt.
    Preparing { index: String, users: u64 },
    /// One window has been flushed: `n` of `total` rows processed.
    Indexing {
        n: u64,
        total: u64,
        success: u64,
        failed: u64,
    },
    /// All windows are written; the index is being refreshed.
    Refreshing { index: String },
}

/// Reports indexing progress. Called from the pipeline task.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index survey_responses  1,200 / 3,000 rows  (1,180 ok, 2 failed)".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Preparing { index, users } => {
                format!("index {}  preparing  {} rows\n", index, format_number(*users))
            }
            IndexProgressEvent::Indexing {
                n,
                total,
                success,
                failed,
            } => format!(
                "index  {} / {} rows  ({} ok, {} failed)\n",
                format_number(*n),
                format_number(*total),
                format_number(*success),
                format_number(*failed)
            ),
            IndexProgressEvent::Refreshing { index } => format!("index {}  refreshing\n", index),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Preparing { index, users } => serde_json::json!({
                "event": "progress",
                "phase": "preparing",
                "index": index,
                "total": users
            }),
            IndexProgressEvent::Indexing {
                n,
                total,
                success,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "n": n,
                "total": total,
                "success": success,
                "failed": failed
            }),
            IndexProgressEvent::Refreshing { index } => serde_json::json!({
                "event": "progress",
                "phase": "refreshing",
                "index": index
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Progress as `tracing` events, for runs without a terminal.
pub struct TracingProgress;

impl IndexProgressReporter for TracingProgress {
    fn report(&self, event: IndexProgressEvent) {
        match event {
            IndexProgressEvent::Preparing { index, users } => {
                tracing::info!(%index, users, "indexing run started")
            }
            IndexProgressEvent::Indexing {
                n,
                total,
                success,
                failed,
            } => tracing::info!(n, total, success, failed, "window flushed"),
            IndexProgressEvent::Refreshing { index } => tracing::debug!(%index, "refreshing index"),
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
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

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
