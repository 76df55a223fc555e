//! Ingestion progress reporting.
//!
//! The ingestion pipeline reports each stage start, each completed work unit
//! and each stage end through a [`ProgressReporter`]. The CLI prints to
//! **stderr** so stdout stays parseable for scripts; the job manager keeps
//! a per-job log instead (see `jobs`).

use std::io::{IsTerminal, Write};

use crate::ingest::IngestStage;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A stage began with `total` work units (0 when unknown).
    StageStarted {
        asset_id: String,
        stage: IngestStage,
        total: usize,
    },
    /// `done` of `total` units of the current stage are complete.
    UnitCompleted {
        asset_id: String,
        stage: IngestStage,
        done: usize,
        total: usize,
    },
    /// A stage ended having produced `count` items.
    StageFinished {
        asset_id: String,
        stage: IngestStage,
        count: usize,
    },
    /// The job failed while in `stage`.
    Failed {
        asset_id: String,
        stage: IngestStage,
        error: String,
    },
}

impl ProgressEvent {
    /// One human-readable line (no trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            ProgressEvent::StageStarted { asset_id, stage, total } if *total > 0 => {
                format!("ingest {}  {}  {} units", asset_id, stage, format_number(*total))
            }
            ProgressEvent::StageStarted { asset_id, stage, .. } => {
                format!("ingest {}  {}...", asset_id, stage)
            }
            ProgressEvent::UnitCompleted { asset_id, stage, done, total } => format!(
                "ingest {}  {}  {} / {}",
                asset_id,
                stage,
                format_number(*done),
                format_number(*total)
            ),
            ProgressEvent::StageFinished { asset_id, stage, count } => {
                format!("ingest {}  {} done  {} items", asset_id, stage, format_number(*count))
            }
            ProgressEvent::Failed { asset_id, stage, error } => {
                format!("ingest {}  failed during {}: {}", asset_id, stage, error)
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ProgressEvent::StageStarted { asset_id, stage, total } => serde_json::json!({
                "event": "stage_started",
                "asset_id": asset_id,
                "stage": stage,
                "total": total
            }),
            ProgressEvent::UnitCompleted { asset_id, stage, done, total } => serde_json::json!({
                "event": "progress",
                "asset_id": asset_id,
                "stage": stage,
                "n": done,
                "total": total
            }),
            ProgressEvent::StageFinished { asset_id, stage, count } => serde_json::json!({
                "event": "stage_finished",
                "asset_id": asset_id,
                "stage": stage,
                "count": count
            }),
            ProgressEvent::Failed { asset_id, stage, error } => serde_json::json!({
                "event": "failed",
                "asset_id": asset_id,
                "stage": stage,
                "error": error
            }),
        }
    }
}

/// Receives progress events from the ingestion pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest repo-42  embedding  12 / 40".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", event.to_line());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event.to_json()) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Emits progress as `tracing` events.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::StageStarted { asset_id, stage, total } => {
                tracing::info!(asset_id = %asset_id, stage = %stage, total, "stage started");
            }
            ProgressEvent::UnitCompleted { asset_id, stage, done, total } => {
                tracing::debug!(asset_id = %asset_id, stage = %stage, done, total, "unit completed");
            }
            ProgressEvent::StageFinished { asset_id, stage, count } => {
                tracing::info!(asset_id = %asset_id, stage = %stage, count, "stage finished");
            }
            ProgressEvent::Failed { asset_id, stage, error } => {
                tracing::error!(asset_id = %asset_id, stage = %stage, error = %error, "ingestion failed");
            }
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
