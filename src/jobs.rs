//! In-memory job registry.
//!
//! Jobs move `pending -> running -> {completed | failed}`, or straight from
//! `pending` to `failed` when cancelled before they start. No transition
//! leads back to `pending`. The table has its own lock, separate from the
//! process table.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MediavisorError, Result};
use crate::media::{ConvertOptions, ExtractOptions};
use crate::process::ProcessId;

/// Failure reason recorded by [`JobRegistry::cancel`].
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Convert,
    Extract,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Convert => write!(f, "convert"),
            JobKind::Extract => write!(f, "extract"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Option payload of a job, discriminated by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOptions {
    Convert(ConvertOptions),
    Extract(ExtractOptions),
}

impl JobOptions {
    pub fn kind(&self) -> JobKind {
        match self {
            JobOptions::Convert(_) => JobKind::Convert,
            JobOptions::Extract(_) => JobKind::Extract,
        }
    }
}

/// A declared unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Assigned by the registry when left empty.
    #[serde(default)]
    pub id: String,
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JobOptions>,
    #[serde(default)]
    pub status: JobStatus,
    /// Failure reason when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Subprocess backing the job while it runs.
    #[serde(skip)]
    pub process_id: Option<ProcessId>,
    /// Unix timestamp (milliseconds).
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(skip)]
    seq: u64,
}

impl BatchJob {
    /// A job with no options attached.
    pub fn empty(kind: JobKind) -> Self {
        Self {
            id: String::new(),
            kind,
            options: None,
            status: JobStatus::Pending,
            error: None,
            process_id: None,
            created_at: 0,
            updated_at: 0,
            seq: 0,
        }
    }

    pub fn convert(options: ConvertOptions) -> Self {
        Self {
            options: Some(JobOptions::Convert(options)),
            ..Self::empty(JobKind::Convert)
        }
    }

    pub fn extract(options: ExtractOptions) -> Self {
        Self {
            options: Some(JobOptions::Extract(options)),
            ..Self::empty(JobKind::Extract)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn touch(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    fn fail(&mut self, reason: &str) {
        self.status = JobStatus::Failed;
        self.error = Some(reason.to_string());
        self.process_id = None;
        self.touch();
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, BatchJob>>,
    last_stamp: AtomicU64,
    next_seq: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a job as `pending`, minting an id when it has none.
    ///
    /// Ids are never reused: a caller-supplied id that is already present is
    /// rejected.
    pub fn add(&self, mut job: BatchJob) -> Result<String> {
        if let Some(options) = &job.options {
            if options.kind() != job.kind {
                return Err(MediavisorError::invalid(format!(
                    "job kind {} does not match {} options",
                    job.kind,
                    options.kind()
                )));
            }
        }

        let now = current_timestamp_ms();
        job.status = JobStatus::Pending;
        job.error = None;
        job.process_id = None;
        job.created_at = now;
        job.updated_at = now;

        let mut jobs = self.jobs.write();
        if job.id.is_empty() {
            job.id = self.mint_id();
            while jobs.contains_key(&job.id) {
                job.id = self.mint_id();
            }
        } else if jobs.contains_key(&job.id) {
            return Err(MediavisorError::invalid(format!(
                "job id already registered: {}",
                job.id
            )));
        }

        job.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = job.id.clone();
        debug!("Registered {} job {}", job.kind, id);
        jobs.insert(id.clone(), job);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<BatchJob> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MediavisorError::NotFound(format!("job {id}")))
    }

    /// Snapshot of every job, oldest first.
    pub fn list(&self) -> Vec<BatchJob> {
        let mut jobs: Vec<BatchJob> = self.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    /// Ids of pending jobs, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.id)
            .collect()
    }

    /// Mark a job `failed` with reason `cancelled`.
    ///
    /// Returns the backing process when the job was running; the caller is
    /// responsible for terminating it once this lock is released. Already
    /// finished jobs are left untouched.
    pub fn cancel(&self, id: &str) -> Result<Option<ProcessId>> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| MediavisorError::NotFound(format!("job {id}")))?;

        if job.status.is_terminal() {
            return Ok(None);
        }

        let process = job.process_id.take();
        info!("Cancelling job {} ({})", id, job.status);
        job.fail(CANCELLED_REASON);
        Ok(process)
    }

    /// `pending -> running`. Returns the job's options.
    pub fn start(&self, id: &str) -> Result<JobOptions> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| MediavisorError::NotFound(format!("job {id}")))?;

        if job.status != JobStatus::Pending {
            return Err(MediavisorError::invalid(format!(
                "job {id} is {}, not pending",
                job.status
            )));
        }
        let Some(options) = job.options.clone() else {
            job.fail("job has no options");
            return Err(MediavisorError::invalid(format!("job {id} has no options")));
        };

        job.status = JobStatus::Running;
        job.touch();
        Ok(options)
    }

    /// Record the subprocess backing a running job.
    ///
    /// Returns false when the job is no longer running, in which case the
    /// caller should terminate the process.
    pub fn attach_process(&self, id: &str, process: ProcessId) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Running => {
                job.process_id = Some(process);
                true
            }
            _ => false,
        }
    }

    /// `running -> completed`. No-op if the job was cancelled meanwhile.
    pub fn complete(&self, id: &str) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Completed;
                job.process_id = None;
                job.touch();
            }
        }
    }

    /// `running -> failed`. No-op if the job already reached a final state.
    pub fn fail(&self, id: &str, reason: &str) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            if job.status == JobStatus::Running {
                job.fail(reason);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// `job_<nanos>`, strictly increasing even within one clock tick.
    fn mint_id(&self) -> String {
        let now = current_timestamp_ns();
        let mut prev = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self.last_stamp.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format!("job_{next}"),
                Err(actual) => prev = actual,
            }
        }
    }
}

fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
