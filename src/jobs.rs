//! In-process job lifecycle for ingestion.
//!
//! [`JobManager`] provides submit / list / stop / info over tokio tasks.
//! Payloads are validated at submission, so an unknown asset type or
//! mismatched reader arguments never produce a job. Accepted jobs wait on a
//! semaphore of `parallel_jobs` permits, then run the ingestion pipeline.
//!
//! ```text
//! Pending ──► Running ──► Succeeded
//!    │           ├──────► Failed
//!    └───────────┴──────► Stopped
//! ```
//!
//! Stopping aborts the task; worker pools it owned are torn down on drop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use context_pipeline_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ingest::{IngestReport, IngestStage, IngestionPipeline};
use crate::payload::IngestionPayload;
use crate::progress::{ProgressEvent, ProgressReporter, TracingProgress};

/// Log lines kept per job; older lines are dropped first.
const MAX_LOG_LINES: usize = 500;
/// Finished jobs kept in the table; the oldest are evicted on submit.
const MAX_FINISHED_JOBS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Stopped)
    }
}

/// Everything known about one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub asset_id: String,
    pub asset_type: String,
    pub status: JobStatus,
    pub stage: Option<IngestStage>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub report: Option<IngestReport>,
    /// Stage transitions and failures. Omitted from [`JobManager::list`].
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub logs: VecDeque<String>,
}

impl JobInfo {
    /// Copy of everything but the log buffer.
    fn summary(&self) -> JobInfo {
        JobInfo {
            job_id: self.job_id.clone(),
            asset_id: self.asset_id.clone(),
            asset_type: self.asset_type.clone(),
            status: self.status,
            stage: self.stage,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
            report: self.report.clone(),
            logs: VecDeque::new(),
        }
    }

    fn push_log(&mut self, line: String) {
        if self.logs.len() == MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs
            .push_back(format!("{} {}", Utc::now().format("%H:%M:%S%.3f"), line));
    }
}

type SharedInfo = Arc<Mutex<JobInfo>>;

struct JobSlot {
    info: SharedInfo,
    abort: Option<AbortHandle>,
}

/// Progress reporter that records the stage and appends to the job log.
struct JobProgress {
    info: SharedInfo,
}

impl ProgressReporter for JobProgress {
    fn report(&self, event: ProgressEvent) {
        TracingProgress.report(event.clone());
        let Ok(mut info) = self.info.lock() else {
            return;
        };
        match &event {
            ProgressEvent::StageStarted { stage, .. } => info.stage = Some(*stage),
            ProgressEvent::Failed { .. } => info.stage = Some(IngestStage::Failed),
            // Per-unit progress goes to tracing only.
            ProgressEvent::UnitCompleted { .. } => return,
            ProgressEvent::StageFinished { .. } => {}
        }
        info.push_log(event.to_line());
    }
}

pub struct JobManager {
    pipeline: Arc<IngestionPipeline>,
    permits: Arc<Semaphore>,
    jobs: RwLock<HashMap<String, JobSlot>>,
}

impl JobManager {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        let parallel = pipeline.config().ingestion.parallel_jobs.max(1);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(parallel)),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `payload` and start an ingestion job for it.
    pub fn submit(&self, payload: IngestionPayload) -> Result<String> {
        let spec = payload.validate()?;

        let job_id = Uuid::new_v4().to_string();
        let info: SharedInfo = Arc::new(Mutex::new(JobInfo {
            job_id: job_id.clone(),
            asset_id: payload.asset_id.clone(),
            asset_type: spec.asset_type().to_string(),
            status: JobStatus::Pending,
            stage: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            report: None,
            logs: VecDeque::new(),
        }));

        // Registered before spawning so the task always finds its slot.
        let mut jobs = self.jobs_write()?;
        evict_finished(&mut jobs);
        jobs.insert(
            job_id.clone(),
            JobSlot {
                info: info.clone(),
                abort: None,
            },
        );
        drop(jobs);

        let asset_id = payload.asset_id.clone();
        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();
        let task_info = info;
        let task = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    finish(&task_info, Err(PipelineError::WorkerFailed {
                        stage: "scheduling".into(),
                        message: e.to_string(),
                    }));
                    return;
                }
            };
            update(&task_info, |info| {
                if info.status == JobStatus::Pending {
                    info.status = JobStatus::Running;
                    info.started_at = Some(Utc::now());
                }
            });

            let progress = JobProgress {
                info: task_info.clone(),
            };
            let result = pipeline.ingest_asset(&payload, &progress).await;
            finish(&task_info, result);
        });

        if let Some(slot) = self.jobs_write()?.get_mut(&job_id) {
            slot.abort = Some(task.abort_handle());
        }

        info!(job_id = %job_id, asset_id = %asset_id, "ingestion job submitted");
        Ok(job_id)
    }

    /// Summary of every job, oldest first. Logs are left out; use
    /// [`JobManager::info`] for them.
    pub fn list(&self) -> Vec<JobInfo> {
        let Ok(jobs) = self.jobs.read() else {
            return Vec::new();
        };
        let mut all: Vec<JobInfo> = jobs
            .values()
            .filter_map(|slot| {
                let info = slot.info.lock().ok()?;
                Some(info.summary())
            })
            .collect();
        all.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        all
    }

    pub fn info(&self, job_id: &str) -> Option<JobInfo> {
        let jobs = self.jobs.read().ok()?;
        jobs.get(job_id).and_then(|slot| snapshot(&slot.info))
    }

    /// Stop a job. Returns its info, or `None` for an unknown id. Stopping a
    /// finished job leaves its status untouched.
    pub fn stop(&self, job_id: &str) -> Option<JobInfo> {
        let jobs = self.jobs.read().ok()?;
        let slot = jobs.get(job_id)?;

        let stopped = {
            let mut info = slot.info.lock().ok()?;
            if info.status.is_finished() {
                false
            } else {
                info.status = JobStatus::Stopped;
                info.finished_at = Some(Utc::now());
                info.push_log("stopped".to_string());
                true
            }
        };
        if stopped {
            if let Some(abort) = &slot.abort {
                abort.abort();
            }
            warn!(job_id, "ingestion job stopped");
        }
        snapshot(&slot.info)
    }

    fn jobs_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, JobSlot>>> {
        self.jobs.write().map_err(|_| PipelineError::WorkerFailed {
            stage: "scheduling".into(),
            message: "job table lock poisoned".into(),
        })
    }
}

/// Drop the oldest finished jobs once more than [`MAX_FINISHED_JOBS`] are
/// kept. Pending and running jobs are never evicted.
fn evict_finished(jobs: &mut HashMap<String, JobSlot>) {
    let mut finished: Vec<(DateTime<Utc>, String)> = jobs
        .iter()
        .filter_map(|(id, slot)| {
            let info = slot.info.lock().ok()?;
            if info.status.is_finished() {
                Some((info.finished_at.unwrap_or(info.submitted_at), id.clone()))
            } else {
                None
            }
        })
        .collect();
    if finished.len() < MAX_FINISHED_JOBS {
        return;
    }
    finished.sort();
    let excess = finished.len() + 1 - MAX_FINISHED_JOBS;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}

fn snapshot(info: &SharedInfo) -> Option<JobInfo> {
    info.lock().ok().map(|info| info.clone())
}

fn update(info: &SharedInfo, f: impl FnOnce(&mut JobInfo)) {
    if let Ok(mut info) = info.lock() {
        f(&mut info);
    }
}

fn finish(info: &SharedInfo, result: Result<IngestReport>) {
    update(info, |info| {
        // A stop request wins over a result that arrives afterwards.
        if info.status == JobStatus::Stopped {
            return;
        }
        info.finished_at = Some(Utc::now());
        match result {
            Ok(report) => {
                info.status = JobStatus::Succeeded;
                info.report = Some(report);
            }
            Err(e) => {
                warn!(job_id = %info.job_id, code = e.code(), error = %e, "ingestion job failed");
                info.status = JobStatus::Failed;
                info.stage = Some(IngestStage::Failed);
                info.error = Some(e.to_string());
            }
        }
    });
}
