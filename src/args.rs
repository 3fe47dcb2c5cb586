//! Encoder and prober argument vectors.
//!
//! Every builder here is pure: the same options and runtime settings always
//! produce the same vector, and nothing touches the filesystem.

use std::path::Path;

use crate::config::Config;
use crate::media::{ChunkOptions, ConvertOptions, ExtractKind, ExtractOptions, MediaKind};
use crate::platform::Platform;

/// Filter keeping only intra-coded frames.
pub const KEYFRAME_FILTER: &str = "select='eq(pict_type,I)'";

/// Settings shared by every encoder invocation of one processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgBuilder {
    threads: usize,
    hwaccel: Option<&'static str>,
    gpu_index: Option<u32>,
}

impl ArgBuilder {
    pub fn new(config: &Config, platform: Platform) -> Self {
        Self {
            threads: config.max_threads.max(1),
            hwaccel: config.hw_accel.then(|| platform.hwaccel_tag()),
            gpu_index: config.gpu_index,
        }
    }

    /// `-i <input> -threads <n>` plus the acceleration pair when requested.
    ///
    /// `pre_input` lands before `-i` so that seeks apply to the input.
    fn prologue(&self, input: &Path, pre_input: &[String]) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];
        args.extend(pre_input.iter().cloned());
        args.extend([
            "-i".into(),
            path_arg(input),
            "-threads".into(),
            self.threads.to_string(),
        ]);

        if let Some(tag) = self.hwaccel {
            args.extend(["-hwaccel".into(), tag.into()]);
            if let Some(index) = self.gpu_index {
                args.extend(["-hwaccel_device".into(), index.to_string()]);
            }
        }

        args
    }

    pub fn convert(&self, opts: &ConvertOptions) -> Vec<String> {
        let mut args = self.prologue(&opts.input, &[]);

        if !opts.format.is_empty() {
            args.extend(["-f".into(), opts.format.clone()]);
        }
        if !opts.quality.is_empty() {
            args.extend(["-q:v".into(), opts.quality.clone()]);
        }
        push_extra(&mut args, &opts.extra_args);

        finish(&mut args, opts.streaming, &opts.output);
        args
    }

    pub fn extract(&self, opts: &ExtractOptions) -> Vec<String> {
        let mut args = self.prologue(&opts.input, &[]);

        match opts.kind {
            ExtractKind::Audio => {
                args.push("-vn".into());
                if !opts.format.is_empty() {
                    args.extend(["-f".into(), opts.format.clone()]);
                }
                if !opts.quality.is_empty() {
                    args.extend(["-q:a".into(), opts.quality.clone()]);
                }
            }
            ExtractKind::Keyframe => {
                args.extend(["-an".into(), "-vf".into(), KEYFRAME_FILTER.into()]);
                if !opts.quality.is_empty() {
                    args.extend(["-q:v".into(), opts.quality.clone()]);
                }
            }
        }
        push_extra(&mut args, &opts.extra_args);

        finish(&mut args, opts.streaming, &opts.output);
        args
    }

    /// Cut `[start, start + length)` out of the chunk request's input.
    pub fn chunk(
        &self,
        opts: &ChunkOptions,
        kind: MediaKind,
        start: f64,
        length: f64,
        output: &Path,
    ) -> Vec<String> {
        let mut args = self.prologue(&opts.input, &["-ss".into(), seconds(start)]);
        args.extend(["-t".into(), seconds(length)]);

        if kind == MediaKind::Audio && opts.format.eq_ignore_ascii_case("wav") {
            args.extend(["-acodec".into(), "pcm_s16le".into()]);
        }
        push_extra(&mut args, &opts.extra_args);

        finish(&mut args, false, output);
        args
    }

    /// Run the silence detector over the whole input, discarding the output.
    pub fn silence(&self, opts: &ChunkOptions) -> Vec<String> {
        let mut args = self.prologue(&opts.input, &[]);
        args.extend([
            "-af".into(),
            format!(
                "silencedetect=noise={}dB:d={}",
                opts.silence_threshold, opts.silence_min_length
            ),
            "-f".into(),
            "null".into(),
            "-".into(),
        ]);
        args
    }
}

/// Full metadata dump in JSON.
pub fn probe_args(input: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(path_arg(input));
    args
}

/// Container duration only, as a bare CSV value.
pub fn duration_args(input: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-v",
        "quiet",
        "-show_entries",
        "format=duration",
        "-of",
        "csv=p=0",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(path_arg(input));
    args
}

pub fn version_args() -> Vec<String> {
    vec!["-version".into()]
}

pub fn hwaccels_args() -> Vec<String> {
    vec!["-hide_banner".into(), "-hwaccels".into()]
}

/// Seconds with millisecond precision.
pub fn seconds(value: f64) -> String {
    format!("{:.3}", value)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn push_extra(args: &mut Vec<String>, extra: &[(String, String)]) {
    for (key, value) in extra {
        if key.is_empty() {
            continue;
        }
        if key.starts_with('-') {
            args.push(key.clone());
        } else {
            args.push(format!("-{key}"));
        }
        if !value.is_empty() {
            args.push(value.clone());
        }
    }
}

fn finish(args: &mut Vec<String>, streaming: bool, output: &Path) {
    if streaming {
        args.extend(["-movflags".into(), "frag_keyframe+empty_moov".into()]);
    }
    args.extend(["-progress".into(), "pipe:1".into()]);
    args.push(path_arg(output));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn builder(threads: usize, hw_accel: bool, platform: Platform) -> ArgBuilder {
        let config = Config {
            max_threads: threads,
            hw_accel,
            ..Default::default()
        };
        ArgBuilder::new(&config, platform)
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("{needle} missing from {args:?}"))
    }

    /// Assert that `expected` appears in `args` as an ordered subsequence.
    fn assert_in_order(args: &[String], expected: &[&str]) {
        let mut cursor = 0;
        for want in expected {
            let found = args[cursor..]
                .iter()
                .position(|a| a == want)
                .unwrap_or_else(|| panic!("{want} not found in order in {args:?}"));
            cursor += found + 1;
        }
    }

    #[test]
    fn test_convert_layout() {
        let mut opts = ConvertOptions::new("in.mov", "out.mp4")
            .with_format("mp4")
            .with_quality("5");
        opts.extra_args = vec![
            ("c:v".to_string(), "libx264".to_string()),
            ("-preset".to_string(), "fast".to_string()),
            ("shortest".to_string(), String::new()),
        ];

        let args = builder(4, false, Platform::Linux).convert(&opts);

        assert_in_order(
            &args,
            &[
                "-i", "in.mov", "-threads", "4", "-f", "mp4", "-q:v", "5", "-c:v", "libx264",
                "-preset", "fast", "-shortest", "-progress", "pipe:1", "out.mp4",
            ],
        );
        assert_eq!(args.last().unwrap(), "out.mp4");
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(!args.contains(&"-hwaccel".to_string()));
    }

    #[test]
    fn test_hwaccel_follows_prologue() {
        let args = builder(2, true, Platform::Linux).convert(&ConvertOptions::new("a", "b"));
        let threads = position(&args, "-threads");
        assert_eq!(args[threads + 2], "-hwaccel");
        assert_eq!(args[threads + 3], "auto");

        let args = builder(2, true, Platform::Darwin { arm64: true })
            .convert(&ConvertOptions::new("a", "b"));
        let hw = position(&args, "-hwaccel");
        assert_eq!(args[hw + 1], "videotoolbox");
    }

    #[test]
    fn test_gpu_index_emitted_with_hwaccel() {
        let config = Config {
            max_threads: 1,
            hw_accel: true,
            gpu_index: Some(1),
            ..Default::default()
        };
        let args = ArgBuilder::new(&config, Platform::Linux).convert(&ConvertOptions::new("a", "b"));
        assert_in_order(&args, &["-hwaccel", "auto", "-hwaccel_device", "1"]);
    }

    #[test]
    fn test_extract_audio() {
        let opts = ExtractOptions::new("in.mp4", "out.mp3", ExtractKind::Audio).with_format("mp3");
        let args = builder(8, false, Platform::Linux).extract(&opts);

        assert_in_order(
            &args,
            &["-i", "in.mp4", "-threads", "8", "-vn", "-f", "mp3", "-progress", "pipe:1", "out.mp3"],
        );
        assert!(!args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_extract_keyframe() {
        let opts = ExtractOptions::new("in.mp4", "out.mp4", ExtractKind::Keyframe).with_format("mp4");
        let args = builder(8, false, Platform::Linux).extract(&opts);

        assert_in_order(
            &args,
            &[
                "-i",
                "in.mp4",
                "-threads",
                "8",
                "-an",
                "-vf",
                "select='eq(pict_type,I)'",
                "-progress",
                "pipe:1",
                "out.mp4",
            ],
        );
        assert!(!args.contains(&"-f".to_string()));
        assert!(!args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_chunk_wav_from_audio() {
        let opts = ChunkOptions::new("talk.mp3", "/tmp/chunks");
        let output = PathBuf::from("/tmp/chunks/chunk_0001.wav");
        let args = builder(2, false, Platform::Linux).chunk(&opts, MediaKind::Audio, 10.0, 10.0, &output);

        let ss = position(&args, "-ss");
        let input = position(&args, "-i");
        assert!(ss < input, "seek must precede input");
        assert_eq!(args[ss + 1], "10.000");
        assert_in_order(&args, &["-t", "10.000", "-acodec", "pcm_s16le"]);
        assert_eq!(args.last().unwrap(), "/tmp/chunks/chunk_0001.wav");
    }

    #[test]
    fn test_chunk_video_has_no_pcm_codec() {
        let opts = ChunkOptions {
            format: "mp4".to_string(),
            ..ChunkOptions::new("movie.mkv", "/tmp/chunks")
        };
        let output = PathBuf::from("/tmp/chunks/chunk_0000.mp4");
        let args = builder(2, true, Platform::Linux).chunk(&opts, MediaKind::Video, 0.0, 12.3456, &output);

        assert!(!args.contains(&"pcm_s16le".to_string()));
        assert_in_order(&args, &["-threads", "2", "-hwaccel", "auto", "-t", "12.346"]);
    }

    #[test]
    fn test_silence_args() {
        let opts = ChunkOptions {
            silence_threshold: -35.0,
            silence_min_length: 0.75,
            ..ChunkOptions::new("talk.wav", "/tmp/chunks")
        };
        let args = builder(1, false, Platform::Linux).silence(&opts);

        assert_in_order(
            &args,
            &["-i", "talk.wav", "-af", "silencedetect=noise=-35dB:d=0.75", "-f", "null", "-"],
        );
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn test_prober_args() {
        let args = probe_args(Path::new("movie.mkv"));
        assert_eq!(
            args,
            vec!["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams", "movie.mkv"]
        );

        let args = duration_args(Path::new("movie.mkv"));
        assert_eq!(
            args,
            vec!["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0", "movie.mkv"]
        );
    }

    #[test]
    fn test_builder_is_pure() {
        let b = builder(3, true, Platform::Linux);
        let opts = ConvertOptions::new("x.mov", "y.mp4").with_format("mp4");
        assert_eq!(b.convert(&opts), b.convert(&opts));
    }

    #[test]
    fn test_streaming_hint() {
        let mut opts = ConvertOptions::new("in.mov", "out.mp4");
        opts.streaming = true;
        let args = builder(1, false, Platform::Linux).convert(&opts);
        assert_in_order(&args, &["-movflags", "frag_keyframe+empty_moov", "-progress", "out.mp4"]);
    }

    #[test]
    fn test_seconds_precision() {
        assert_eq!(seconds(0.0), "0.000");
        assert_eq!(seconds(1.23456), "1.235");
        assert_eq!(seconds(30.0), "30.000");
    }
}
