pub mod chunk;
pub mod extract;

pub use chunk::{plan_fixed_chunks, plan_silence_chunks, PlannedChunk, MIN_SILENCE_CHUNK};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{MediavisorError, Result};

/// Kind of media a chunking request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// What [`ExtractOptions`] pulls out of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractKind {
    /// Audio stream only (`-vn`).
    #[default]
    Audio,
    /// Intra-coded frames only, audio dropped.
    Keyframe,
}

impl fmt::Display for ExtractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractKind::Audio => write!(f, "audio"),
            ExtractKind::Keyframe => write!(f, "keyframe"),
        }
    }
}

impl FromStr for ExtractKind {
    type Err = MediavisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "audio" => Ok(ExtractKind::Audio),
            "keyframe" => Ok(ExtractKind::Keyframe),
            _ => Err(MediavisorError::invalid(format!(
                "unknown extraction kind: {s}. Use 'audio' or 'keyframe'"
            ))),
        }
    }
}

/// Progress observed while an encoder runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressInfo {
    /// Seconds of media the encoder is expected to produce (zero if unknown).
    pub total_duration: f64,
    /// Seconds of media produced so far.
    pub current_time: f64,
    /// `current_time / total_duration` clamped to [0, 1].
    pub progress: f64,
    /// Speed multiplier relative to realtime.
    pub speed: f64,
    pub bitrate: String,
    pub fps: f64,
}

/// Caller-supplied destination for [`ProgressInfo`] records.
///
/// Delivery is best-effort: when the channel is full or closed the record is dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressInfo>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressInfo>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver that observes it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressInfo>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn report(&self, info: ProgressInfo) {
        let _ = self.tx.try_send(info);
    }
}

/// Extra `-key value` pairs passed to the encoder in the given order.
///
/// Keys without a leading dash get one; an empty value emits the key alone.
pub type ExtraArgs = Vec<(String, String)>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Container passed to `-f`; empty lets the encoder infer it from the output name.
    pub format: String,
    /// Value passed to `-q:v`; empty omits it.
    pub quality: String,
    pub extra_args: ExtraArgs,
    /// Produce a fragmented, streamable output.
    pub streaming: bool,
    #[serde(skip)]
    pub progress: Option<ProgressSink>,
}

impl ConvertOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_paths(&self.input, &self.output)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: ExtractKind,
    pub format: String,
    pub quality: String,
    pub extra_args: ExtraArgs,
    pub streaming: bool,
    #[serde(skip)]
    pub progress: Option<ProgressSink>,
}

impl ExtractOptions {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        kind: ExtractKind,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_paths(&self.input, &self.output)
    }
}

fn validate_paths(input: &std::path::Path, output: &std::path::Path) -> Result<()> {
    if input.as_os_str().is_empty() {
        return Err(MediavisorError::invalid("input path is empty"));
    }
    if output.as_os_str().is_empty() {
        return Err(MediavisorError::invalid("output path is empty"));
    }
    Ok(())
}

/// Request to split an asset into ordered time ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// File name prefix: `<prefix>_NNNN.<format>`.
    pub output_prefix: String,
    /// Target chunk length in seconds.
    pub chunk_duration: f64,
    /// Extra seconds appended to every non-terminal chunk's file.
    pub overlap_duration: f64,
    /// Silence threshold in dB (negative).
    pub silence_threshold: f64,
    /// Minimum silence length in seconds.
    pub silence_min_length: f64,
    /// Output extension and container, e.g. `wav`, `mp3`, `mp4`.
    pub format: String,
    /// Upper bound for a produced file in bytes; zero means unbounded.
    pub max_chunk_size: u64,
    pub enable_silence_detection: bool,
    pub extra_args: ExtraArgs,
    #[serde(skip)]
    pub progress: Option<ProgressSink>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output_dir: PathBuf::new(),
            output_prefix: "chunk".to_string(),
            chunk_duration: 30.0,
            overlap_duration: 0.0,
            silence_threshold: -30.0,
            silence_min_length: 0.5,
            format: "wav".to_string(),
            max_chunk_size: 0,
            enable_silence_detection: false,
            extra_args: Vec::new(),
            progress: None,
        }
    }
}

impl ChunkOptions {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(MediavisorError::invalid("input path is empty"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(MediavisorError::invalid("output directory is empty"));
        }
        if self.format.is_empty() {
            return Err(MediavisorError::invalid("chunk format is required"));
        }
        if self.chunk_duration.is_nan() || self.chunk_duration <= 0.0 {
            return Err(MediavisorError::invalid(format!(
                "chunk duration must be positive, got {}",
                self.chunk_duration
            )));
        }
        if self.overlap_duration < 0.0 {
            return Err(MediavisorError::invalid("overlap duration must not be negative"));
        }
        if self.enable_silence_detection
            && (self.silence_min_length.is_nan() || self.silence_min_length <= 0.0)
        {
            return Err(MediavisorError::invalid(
                "silence minimum length must be positive",
            ));
        }
        Ok(())
    }

    /// Output path for the chunk with the given index.
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{:04}.{}", self.output_prefix, index, self.format))
    }
}

/// One produced chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkInfo {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub output_path: PathBuf,
    pub file_size: u64,
    pub is_silence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkResult {
    pub chunks: Vec<ChunkInfo>,
    pub total_chunks: usize,
    pub total_size: u64,
    pub output_dir: PathBuf,
}

/// Metadata reported by the prober. Missing fields keep their zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub bit_rate: String,
    pub frame_rate: f64,
    pub audio_codec: String,
    pub video_codec: String,
    pub file_size: u64,
}

/// A region the encoder's silence detector reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SilencePeriod {
    pub start: f64,
    pub end: f64,
}

impl SilencePeriod {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub encoder_version: String,
    pub prober_version: String,
    /// Hardware accelerators the encoder reports.
    pub gpus: Vec<String>,
}
