use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mediavisor::{
    BatchJob, CancellationToken, ChunkOptions, Config, ConvertOptions, ExtractKind,
    ExtractOptions, MediaKind, MediaProcessor, ProgressInfo, ProgressSink,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mediavisor")]
#[command(version, about = "Supervised ffmpeg probing, conversion, extraction and chunking")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Flags that take precedence over the config file.
#[derive(Args)]
struct ConfigOverrides {
    /// Encoder binary
    #[arg(long, global = true)]
    encoder: Option<PathBuf>,

    /// Prober binary
    #[arg(long, global = true)]
    prober: Option<PathBuf>,

    /// Working directory for subprocesses
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Maximum concurrent subprocesses
    #[arg(long, global = true)]
    max_processes: Option<usize>,

    /// Threads per encoder invocation
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Per-subprocess time limit in seconds (0 disables)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Request hardware-accelerated decoding
    #[arg(long, global = true)]
    hw_accel: bool,

    /// GPU index passed to the hardware decoder
    #[arg(long, global = true)]
    gpu: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Print media metadata as JSON
    Info { input: PathBuf },

    /// Convert a file to another container or codec
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// Output container (-f)
        #[arg(short, long)]
        format: Option<String>,
        /// Video quality (-q:v)
        #[arg(short, long)]
        quality: Option<String>,
        /// Fragmented, streamable output
        #[arg(long)]
        streaming: bool,
        /// Extra encoder flag as key=value (repeatable)
        #[arg(long = "arg", value_parser = parse_key_value)]
        extra: Vec<(String, String)>,
    },

    /// Extract the audio track or keyframes
    Extract {
        input: PathBuf,
        output: PathBuf,
        /// audio or keyframe
        #[arg(short, long, default_value = "audio")]
        kind: String,
        #[arg(short, long)]
        format: Option<String>,
        #[arg(long = "arg", value_parser = parse_key_value)]
        extra: Vec<(String, String)>,
    },

    /// Split a file into time-bounded chunks
    Chunk {
        input: PathBuf,
        output_dir: PathBuf,
        /// Treat the input as video (fixed chunks only)
        #[arg(long)]
        video: bool,
        /// Chunk length in seconds
        #[arg(short, long, default_value = "30")]
        duration: f64,
        /// Overlap appended to each chunk in seconds
        #[arg(long, default_value = "0")]
        overlap: f64,
        /// Split on detected silence (audio only)
        #[arg(long)]
        silence: bool,
        /// Silence threshold in dB
        #[arg(long, default_value = "-30", allow_hyphen_values = true)]
        threshold: f64,
        /// Minimum silence length in seconds
        #[arg(long, default_value = "0.5")]
        min_silence: f64,
        /// Output extension
        #[arg(short, long, default_value = "wav")]
        format: String,
        #[arg(long, default_value = "chunk")]
        prefix: String,
        /// Maximum chunk size in bytes (0 = unbounded)
        #[arg(long, default_value = "0")]
        max_size: u64,
    },

    /// Queue jobs from a JSON file and run them in order
    Jobs { file: PathBuf },

    /// Print tool versions and hardware accelerators
    System,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        None if !raw.is_empty() => Ok((raw.to_string(), String::new())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn apply_overrides(mut config: Config, overrides: &ConfigOverrides) -> Config {
    if let Some(path) = &overrides.encoder {
        config.encoder_path = path.clone();
    }
    if let Some(path) = &overrides.prober {
        config.prober_path = path.clone();
    }
    if let Some(dir) = &overrides.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(n) = overrides.max_processes {
        config.max_processes = n;
    }
    if let Some(n) = overrides.threads {
        config.max_threads = n;
    }
    if let Some(secs) = overrides.timeout {
        config.max_process_time = Duration::from_secs(secs);
    }
    if overrides.hw_accel {
        config.hw_accel = true;
    }
    if overrides.gpu.is_some() {
        config.gpu_index = overrides.gpu;
    }
    config
}

/// Progress bar fed from a sink's receiver; one bar per run.
fn spawn_progress_bar(label: String) -> (ProgressSink, JoinHandle<()>) {
    let (sink, mut rx) = ProgressSink::channel(64);

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(label);
    pb.enable_steady_tick(Duration::from_millis(100));

    let handle = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            render(&pb, &update);
        }
        pb.finish_and_clear();
    });

    (sink, handle)
}

fn render(pb: &ProgressBar, update: &ProgressInfo) {
    pb.set_position((update.progress * 1000.0).round() as u64);
    if update.speed > 0.0 {
        pb.set_message(format!("{:.1}s @ {:.2}x", update.current_time, update.speed));
    }
}

/// Wait for the bar task; it ends once every sink clone is dropped.
async fn finish_progress(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!("Progress display task failed: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Config::load().context("Failed to load configuration")?;
    let config = apply_overrides(config, &cli.overrides);
    let processor = MediaProcessor::new(config).context("Failed to initialise media processor")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, stopping subprocesses...");
            cancel.cancel();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    match cli.command {
        Command::Info { input } => {
            let info = processor
                .get_media_info(&input, &cancel)
                .await
                .with_context(|| format!("Failed to probe {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::Convert {
            input,
            output,
            format,
            quality,
            streaming,
            extra,
        } => {
            let (sink, bar) = spawn_progress_bar(format!("converting {}", input.display()));
            let mut opts = ConvertOptions::new(&input, &output).with_progress(sink);
            opts.format = format.unwrap_or_default();
            opts.quality = quality.unwrap_or_default();
            opts.streaming = streaming;
            opts.extra_args = extra;

            let result = processor.convert(&opts, &cancel).await;
            drop(opts);
            finish_progress(bar).await;
            result.context("Conversion failed")?;
            info!("Wrote {}", output.display());
        }

        Command::Extract {
            input,
            output,
            kind,
            format,
            extra,
        } => {
            let kind: ExtractKind = kind.parse()?;
            let (sink, bar) = spawn_progress_bar(format!("extracting {kind}"));
            let mut opts = ExtractOptions::new(&input, &output, kind).with_progress(sink);
            opts.format = format.unwrap_or_default();
            opts.extra_args = extra;

            let result = processor.extract(&opts, &cancel).await;
            drop(opts);
            finish_progress(bar).await;
            result.context("Extraction failed")?;
            info!("Wrote {}", output.display());
        }

        Command::Chunk {
            input,
            output_dir,
            video,
            duration,
            overlap,
            silence,
            threshold,
            min_silence,
            format,
            prefix,
            max_size,
        } => {
            let opts = ChunkOptions {
                output_prefix: prefix,
                chunk_duration: duration,
                overlap_duration: overlap,
                silence_threshold: threshold,
                silence_min_length: min_silence,
                format,
                max_chunk_size: max_size,
                enable_silence_detection: silence,
                ..ChunkOptions::new(&input, &output_dir)
            };
            let kind = if video { MediaKind::Video } else { MediaKind::Audio };

            let result = processor
                .chunk(&opts, kind, &cancel)
                .await
                .context("Chunking failed")?;

            for chunk in &result.chunks {
                println!(
                    "{:>4}  {:>9.3} - {:>9.3}  {:>10} B  {}",
                    chunk.index,
                    chunk.start_time,
                    chunk.end_time,
                    chunk.file_size,
                    chunk.output_path.display()
                );
            }
            info!(
                "{} chunks, {} bytes in {}",
                result.total_chunks,
                result.total_size,
                result.output_dir.display()
            );
        }

        Command::Jobs { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let jobs: Vec<BatchJob> =
                serde_json::from_str(&contents).context("Invalid job file")?;

            for job in jobs {
                let id = processor.add_job(job)?;
                info!("Queued {}", id);
            }

            let processed = processor.run_pending_jobs(&cancel).await?;
            for job in &processed {
                match &job.error {
                    Some(reason) => println!("{}  {}  {}", job.id, job.status, reason),
                    None => println!("{}  {}", job.id, job.status),
                }
            }
        }

        Command::System => {
            let system = processor.system_info(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&system)?);
        }
    }

    processor.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("c:v=libx264").unwrap(),
            ("c:v".to_string(), "libx264".to_string())
        );
        assert_eq!(
            parse_key_value("shortest").unwrap(),
            ("shortest".to_string(), String::new())
        );
        assert!(parse_key_value("=x").is_err());
        assert!(parse_key_value("").is_err());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigOverrides {
            encoder: Some(PathBuf::from("/opt/ffmpeg")),
            prober: None,
            work_dir: None,
            max_processes: Some(3),
            threads: None,
            timeout: Some(120),
            hw_accel: true,
            gpu: Some(0),
        };
        let config = apply_overrides(
            Config {
                max_processes: 8,
                ..Default::default()
            },
            &overrides,
        );

        assert_eq!(config.encoder_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.max_processes, 3);
        assert_eq!(config.max_process_time, Duration::from_secs(120));
        assert!(config.hw_accel);
        assert_eq!(config.gpu_index, Some(0));
    }

    #[test]
    fn test_cli_parses_chunk() {
        let cli = Cli::try_parse_from([
            "mediavisor",
            "chunk",
            "talk.mp3",
            "out",
            "--silence",
            "--threshold",
            "-35",
        ])
        .unwrap();

        match cli.command {
            Command::Chunk {
                silence, threshold, ..
            } => {
                assert!(silence);
                assert_eq!(threshold, -35.0);
            }
            _ => panic!("expected chunk"),
        }
    }
}
