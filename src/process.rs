//! Subprocess supervision under a concurrency ceiling.
//!
//! Every live encoder or prober invocation is registered in a process table
//! guarded by a read/write lock. Admission and registration happen under the
//! same write acquisition, so the table never holds more than
//! `Config::max_processes` entries. The entry is removed when the
//! [`RunningProcess`] finishes or is dropped, whichever comes first.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MediavisorError, Result};
use crate::media::ProgressSink;
use crate::probe::ProgressParser;

/// Lines of stderr kept for a failure report.
const DIAGNOSTIC_LINES: usize = 10;
/// Byte cap on the failure report.
const DIAGNOSTIC_BYTES: usize = 2048;

/// Identifier minted for each tracked subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(u64);

impl ProcessId {
    #[cfg(test)]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Read-only view of a tracked subprocess.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    /// OS process id, when the OS reported one.
    pub pid: Option<u32>,
    pub program: String,
    #[serde(skip)]
    pub started_at: Instant,
}

struct ProcessEntry {
    snapshot: ProcessSnapshot,
    kill: CancellationToken,
}

type ProcessTable = RwLock<HashMap<ProcessId, ProcessEntry>>;

/// Owns the process table for one processor instance.
pub struct Supervisor {
    config: Arc<Config>,
    table: Arc<ProcessTable>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Supervisor {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            table: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Admit, spawn and register one subprocess.
    ///
    /// Fails with `capacity-reached` without spawning when the table is full,
    /// and with `cancelled` when `cancel` already fired or the supervisor is
    /// closed.
    pub fn spawn(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunningProcess> {
        if cancel.is_cancelled() {
            return Err(MediavisorError::Cancelled);
        }

        let program_name = program_label(program);
        debug!("Spawning {} {}", program_name, args.join(" "));

        let mut table = self.table.write();

        // Checked under the table lock so close() and spawn() cannot interleave.
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediavisorError::Closed);
        }
        if table.len() >= self.config.max_processes {
            warn!(
                "Refusing to spawn {}: {} processes already running",
                program_name,
                table.len()
            );
            return Err(MediavisorError::CapacityReached {
                max: self.config.max_processes,
            });
        }

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediavisorError::Spawn {
                program: program_name.clone(),
                source: e,
            })?;

        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kill = CancellationToken::new();
        let snapshot = ProcessSnapshot {
            id,
            pid: child.id(),
            program: program_name.clone(),
            started_at: Instant::now(),
        };
        table.insert(
            id,
            ProcessEntry {
                snapshot,
                kill: kill.clone(),
            },
        );
        drop(table);

        // The deadline token is a child of the caller's, so caller
        // cancellation also fires it; wait() checks the caller first.
        let limit = self.config.max_process_time;
        let (deadline, timer) = if limit.is_zero() {
            (None, None)
        } else {
            let token = cancel.child_token();
            let fire = token.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                fire.cancel();
            });
            (Some(token), Some(timer))
        };

        Ok(RunningProcess {
            id,
            program: program_name,
            child,
            cancel: cancel.clone(),
            kill,
            deadline,
            limit,
            progress: None,
            _registration: Registration {
                id,
                table: Arc::clone(&self.table),
                timer,
            },
        })
    }

    /// Spawn and wait in one step.
    pub async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        self.spawn(program, args, cancel)?.wait().await
    }

    /// Number of live tracked subprocesses.
    pub fn active_processes(&self) -> usize {
        self.table.read().len()
    }

    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        let table = self.table.read();
        let mut list: Vec<ProcessSnapshot> =
            table.values().map(|entry| entry.snapshot.clone()).collect();
        list.sort_by_key(|s| s.id);
        list
    }

    /// Forcefully terminate one tracked subprocess.
    ///
    /// Returns false when the id is not (or no longer) tracked.
    pub fn kill(&self, id: ProcessId) -> bool {
        let entry = self.table.write().remove(&id);
        match entry {
            Some(entry) => {
                info!("Killing {} ({})", id, entry.snapshot.program);
                entry.kill.cancel();
                true
            }
            None => false,
        }
    }

    /// Terminate every tracked subprocess and empty the table.
    ///
    /// Safe to call repeatedly. Returns the number of processes signalled.
    pub fn kill_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.table.write());
        if !drained.is_empty() {
            info!("Killing {} tracked processes", drained.len());
        }
        for entry in drained.values() {
            entry.kill.cancel();
        }
        drained.len()
    }

    /// Kill everything and refuse further spawns.
    pub fn close(&self) {
        {
            let _table = self.table.write();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.kill_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Removes the process-table entry on every exit path.
struct Registration {
    id: ProcessId,
    table: Arc<ProcessTable>,
    timer: Option<JoinHandle<()>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.table.write().remove(&self.id);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Captured output of a successful subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// A registered subprocess that has not been reaped yet.
///
/// Dropping it without calling [`RunningProcess::wait`] kills the child and
/// releases its table slot.
pub struct RunningProcess {
    id: ProcessId,
    program: String,
    child: Child,
    cancel: CancellationToken,
    kill: CancellationToken,
    deadline: Option<CancellationToken>,
    limit: Duration,
    progress: Option<(ProgressSink, ProgressParser)>,
    _registration: Registration,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    Killed,
    TimedOut,
}

impl RunningProcess {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Parse stdout as a `-progress pipe:1` stream and forward records to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink, total_duration: f64) -> Self {
        self.progress = Some((sink, ProgressParser::new(total_duration)));
        self
    }

    /// Wait for exit, cancellation, a kill request or the deadline.
    pub async fn wait(mut self) -> Result<ProcessOutput> {
        let stdout_task = tokio::spawn(read_stdout(self.child.stdout.take(), self.progress.take()));
        let stderr_task = tokio::spawn(read_lines(self.child.stderr.take()));

        let deadline = self.deadline.clone().unwrap_or_default();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            _ = self.kill.cancelled() => Outcome::Killed,
            _ = deadline.cancelled(), if self.deadline.is_some() => Outcome::TimedOut,
            status = self.child.wait() => Outcome::Exited(status),
        };

        let status = match outcome {
            Outcome::Exited(status) => status?,
            interrupted => {
                self.terminate().await;
                // A grandchild may still hold the pipes open.
                stdout_task.abort();
                stderr_task.abort();
                return Err(match interrupted {
                    Outcome::TimedOut => {
                        warn!("{} ({}) exceeded {:?}", self.program, self.id, self.limit);
                        MediavisorError::DeadlineExceeded(self.limit)
                    }
                    _ => {
                        info!("{} ({}) cancelled", self.program, self.id);
                        MediavisorError::Cancelled
                    }
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(MediavisorError::ExecFailure {
                program: self.program.clone(),
                status: status.to_string(),
                diagnostics: diagnostic_tail(&stderr),
            });
        }

        debug!("{} ({}) finished", self.program, self.id);
        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {} ({}): {}", self.program, self.id, e);
        }
    }
}

async fn read_lines<R>(stream: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(stream) = stream else {
        return collected;
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

async fn read_stdout<R>(stream: Option<R>, progress: Option<(ProgressSink, ProgressParser)>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some((sink, mut parser)) = progress else {
        return read_lines(stream).await;
    };

    let mut collected = String::new();
    let Some(stream) = stream else {
        return collected;
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(record) = parser.push_line(&line) {
            sink.report(record);
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    if !parser.is_finished() {
        debug!("Progress stream closed without an end marker");
    }
    collected
}

/// Last few lines of diagnostic output, capped in size.
pub(crate) fn diagnostic_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    let tail = lines[start..].join("\n");

    if tail.len() <= DIAGNOSTIC_BYTES {
        return tail;
    }
    let mut cut = tail.len() - DIAGNOSTIC_BYTES;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail[cut..].to_string()
}

fn program_label(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Resolve a path relative to the working directory the subprocess runs in.
pub(crate) fn resolve_in(work_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        work_dir.join(path)
    }
}
