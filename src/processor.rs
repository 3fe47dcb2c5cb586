use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::args::{self, ArgBuilder};
use crate::config::Config;
use crate::error::{MediavisorError, Result};
use crate::jobs::{BatchJob, JobOptions, JobRegistry, JobStatus};
use crate::media::{ProgressSink, SystemInfo};
use crate::platform::Platform;
use crate::process::{ProcessOutput, ProcessSnapshot, Supervisor};

/// Entry point for every media operation.
///
/// One instance owns its configuration, its process table and its job table.
/// It is `Send + Sync`; share it behind an `Arc` to call it from several tasks.
pub struct MediaProcessor {
    platform: Platform,
    config: Arc<Config>,
    pub(crate) args: ArgBuilder,
    supervisor: Supervisor,
    jobs: JobRegistry,
}

impl MediaProcessor {
    /// Build a processor for the host platform.
    ///
    /// Fails with `unsupported-platform` on an OS with no variant.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_platform(config, Platform::detect()?)
    }

    /// Build a processor for an explicit platform variant.
    pub fn with_platform(config: Config, platform: Platform) -> Result<Self> {
        let config = config.with_defaults(platform);
        config.validate()?;
        std::fs::create_dir_all(&config.work_dir)?;

        info!(
            "Media processor ready on {} (encoder: {}, max {} processes, {} threads)",
            platform,
            config.encoder_path.display(),
            config.max_processes,
            config.max_threads
        );

        let config = Arc::new(config);
        Ok(Self {
            platform,
            args: ArgBuilder::new(&config, platform),
            supervisor: Supervisor::new(Arc::clone(&config)),
            jobs: JobRegistry::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// OS tag, encoder and prober versions, and the accelerators the encoder lists.
    pub async fn system_info(&self, cancel: &CancellationToken) -> Result<SystemInfo> {
        self.platform.ensure_supported()?;

        let encoder = self.run_encoder(&args::version_args(), cancel, None, None).await?;
        let prober = self.run_prober(&args::version_args(), cancel).await?;

        let gpus = match self.run_encoder(&args::hwaccels_args(), cancel, None, None).await {
            Ok(output) => parse_hwaccels(&output.stdout),
            Err(e) => {
                warn!("Could not list hardware accelerators: {}", e);
                Vec::new()
            }
        };

        Ok(SystemInfo {
            os: self.platform.os_tag().to_string(),
            encoder_version: first_line(&encoder.stdout),
            prober_version: first_line(&prober.stdout),
            gpus,
        })
    }

    // ===== Jobs =====

    pub fn add_job(&self, job: BatchJob) -> Result<String> {
        self.platform.ensure_supported()?;
        self.jobs.add(job)
    }

    pub fn get_job(&self, id: &str) -> Result<BatchJob> {
        self.platform.ensure_supported()?;
        self.jobs.get(id)
    }

    pub fn list_jobs(&self) -> Result<Vec<BatchJob>> {
        self.platform.ensure_supported()?;
        Ok(self.jobs.list())
    }

    /// Mark a job `failed` with reason `cancelled`, terminating its subprocess
    /// if it is running. Cancelling a finished job is a no-op.
    pub fn cancel_job(&self, id: &str) -> Result<()> {
        self.platform.ensure_supported()?;

        // The registry lock is released before the process table is touched.
        let process = self.jobs.cancel(id)?;
        if let Some(process) = process {
            self.supervisor.kill(process);
        }
        Ok(())
    }

    /// Execute one pending job and record its outcome.
    pub async fn run_job(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.platform.ensure_supported()?;

        let options = self.jobs.start(id)?;
        info!("Running {} job {}", options.kind(), id);

        let result = match &options {
            JobOptions::Convert(opts) => self.convert_inner(opts, cancel, Some(id)).await,
            JobOptions::Extract(opts) => self.extract_inner(opts, cancel, Some(id)).await,
        };

        match &result {
            Ok(()) => self.jobs.complete(id),
            Err(e) => {
                warn!("Job {} failed: {}", id, e);
                self.jobs.fail(id, &e.to_string());
            }
        }
        result
    }

    /// Run every pending job in creation order.
    ///
    /// A failing job is recorded and the next one starts; only cancellation of
    /// `cancel` stops the loop early. Returns the processed jobs.
    pub async fn run_pending_jobs(&self, cancel: &CancellationToken) -> Result<Vec<BatchJob>> {
        self.platform.ensure_supported()?;

        let mut processed = Vec::new();
        for id in self.jobs.pending() {
            if cancel.is_cancelled() {
                return Err(MediavisorError::Cancelled);
            }
            // Cancelled while queued.
            if self.jobs.get(&id)?.status != JobStatus::Pending {
                continue;
            }
            if let Err(e) = self.run_job(&id, cancel).await {
                if cancel.is_cancelled() {
                    return Err(e);
                }
            }
            processed.push(self.jobs.get(&id)?);
        }
        Ok(processed)
    }

    // ===== Processes =====

    pub fn active_processes(&self) -> usize {
        self.supervisor.active_processes()
    }

    pub fn processes(&self) -> Vec<ProcessSnapshot> {
        self.supervisor.snapshot()
    }

    /// Forcefully terminate every tracked subprocess. Idempotent.
    pub fn kill_all(&self) -> Result<()> {
        self.platform.ensure_supported()?;
        self.supervisor.kill_all();
        Ok(())
    }

    /// Terminate every subprocess and refuse further work.
    pub fn close(&self) -> Result<()> {
        self.platform.ensure_supported()?;
        info!("Closing media processor");
        self.supervisor.close();
        Ok(())
    }

    // ===== Execution helpers =====

    /// Run the encoder, optionally streaming progress and binding the
    /// subprocess to a running job.
    pub(crate) async fn run_encoder(
        &self,
        args: &[String],
        cancel: &CancellationToken,
        progress: Option<(&ProgressSink, f64)>,
        job: Option<&str>,
    ) -> Result<ProcessOutput> {
        let mut process = self
            .supervisor
            .spawn(&self.config.encoder_path, args, cancel)?;

        if let Some(job) = job {
            // Dropping the process kills it and frees its slot.
            if !self.jobs.attach_process(job, process.id()) {
                return Err(MediavisorError::Cancelled);
            }
            debug!("Job {} bound to {} (pid {:?})", job, process.id(), process.pid());
        }
        if let Some((sink, total)) = progress {
            process = process.with_progress(sink.clone(), total);
        }

        process.wait().await
    }

    pub(crate) async fn run_prober(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        self.supervisor
            .run(&self.config.prober_path, args, cancel)
            .await
    }

    /// Resolve a caller path the way the subprocess will see it.
    pub(crate) fn resolve(&self, path: &Path) -> std::path::PathBuf {
        crate::process::resolve_in(&self.config.work_dir, path)
    }
}

fn first_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Accelerator names from `-hwaccels` output, skipping the heading.
fn parse_hwaccels(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(String::from)
        .collect()
}
