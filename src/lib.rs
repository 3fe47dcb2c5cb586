pub mod args;
pub mod config;
pub mod error;
pub mod jobs;
pub mod media;
pub mod platform;
pub mod probe;
pub mod process;
pub mod processor;

pub use config::Config;
pub use error::{ErrorKind, MediavisorError, Result};
pub use jobs::{BatchJob, JobKind, JobOptions, JobRegistry, JobStatus};
pub use media::{
    ChunkInfo, ChunkOptions, ChunkResult, ConvertOptions, ExtractKind, ExtractOptions, MediaInfo,
    MediaKind, ProgressInfo, ProgressSink, SilencePeriod, SystemInfo,
};
pub use platform::Platform;
pub use process::{ProcessId, Supervisor};
pub use processor::MediaProcessor;
pub use tokio_util::sync::CancellationToken;
