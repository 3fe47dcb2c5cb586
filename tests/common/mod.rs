//! Fake encoder and prober scripts for driving the processor without ffmpeg.
//!
//! Behaviour is steered by files in the fixture directory so a test can change
//! it between calls:
//!
//! - `duration`: what the prober prints for `-show_entries format=duration`
//! - `probe.json`: what the prober prints for `-print_format json`
//! - `silence.txt`: written to stderr when the encoder sees `silencedetect`
//! - `delay`: seconds the encoder sleeps before producing output
//! - `fail_on`: the encoder fails when its output path ends with this text
//!
//! Every invocation is appended to `encoder.log` / `prober.log`.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mediavisor::{Config, MediaProcessor};
use tempfile::TempDir;

const ENCODER: &str = r#"#!/bin/sh
DIR="__DIR__"
echo "$*" >> "$DIR/encoder.log"

last=""
prev=""
length=""
for a in "$@"; do
  case "$a" in
    -version) echo "ffmpeg version 6.1-fake Copyright (c) 2000-2023 the FFmpeg developers"; exit 0 ;;
    -hwaccels) printf 'Hardware acceleration methods:\ncuda\nvaapi\n'; exit 0 ;;
    silencedetect=*)
      if [ -f "$DIR/silence.txt" ]; then cat "$DIR/silence.txt" >&2; fi
      exit 0 ;;
  esac
  if [ "$prev" = "-t" ]; then length="$a"; fi
  prev="$a"
  last="$a"
done

if [ -f "$DIR/delay" ]; then sleep "$(cat "$DIR/delay")"; fi

if [ -f "$DIR/fail_on" ]; then
  pattern="$(cat "$DIR/fail_on")"
  case "$last" in
    *"$pattern")
      echo "[in#0 @ 0x0] Error opening input" >&2
      echo "Conversion failed!" >&2
      exit 1 ;;
  esac
fi

printf 'frame=10\nfps=25.0\nbitrate= 128.0kbits/s\nout_time_us=1000000\nspeed=2.0x\nprogress=continue\n'
printf 'out_time_us=2000000\nspeed=2.0x\nprogress=end\n'

bytes=1000
if [ -n "$length" ]; then
  bytes=$(awk "BEGIN { printf \"%d\", $length * 1000 }")
fi
head -c "$bytes" /dev/zero > "$last"
exit 0
"#;

const PROBER: &str = r#"#!/bin/sh
DIR="__DIR__"
echo "$*" >> "$DIR/prober.log"

for a in "$@"; do
  case "$a" in
    -version) echo "ffprobe version 6.1-fake Copyright (c) 2007-2023 the FFmpeg developers"; exit 0 ;;
    csv=p=0) cat "$DIR/duration"; exit 0 ;;
    json) cat "$DIR/probe.json"; exit 0 ;;
  esac
done
echo "unrecognised arguments" >&2
exit 1
"#;

pub const SAMPLE_PROBE: &str = r#"{
  "streams": [
    {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 1280, "height": 720, "avg_frame_rate": "25/1"},
    {"index": 1, "codec_name": "aac", "codec_type": "audio", "sample_rate": "44100"}
  ],
  "format": {"filename": "in.mp4", "duration": "35.000000", "bit_rate": "1200000"}
}"#;

pub struct FakeTools {
    dir: TempDir,
    pub encoder: PathBuf,
    pub prober: PathBuf,
    pub work_dir: PathBuf,
}

impl FakeTools {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create fixture dir");
        let root = dir.path().to_path_buf();

        let encoder = root.join("ffmpeg");
        let prober = root.join("ffprobe");
        write_script(&encoder, ENCODER, &root);
        write_script(&prober, PROBER, &root);

        let work_dir = root.join("work");
        fs::create_dir_all(&work_dir).expect("create work dir");

        let tools = Self {
            dir,
            encoder,
            prober,
            work_dir,
        };
        tools.set_duration("35.000000");
        tools.set_probe_json(SAMPLE_PROBE);
        tools
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Config {
        Config {
            encoder_path: self.encoder.clone(),
            prober_path: self.prober.clone(),
            work_dir: self.work_dir.clone(),
            max_processes: 4,
            max_threads: 2,
            ..Default::default()
        }
    }

    pub fn processor(&self) -> MediaProcessor {
        self.processor_with(self.config())
    }

    pub fn processor_with(&self, config: Config) -> MediaProcessor {
        MediaProcessor::new(config).expect("processor")
    }

    /// A file with `len` bytes, usable as an input path.
    pub fn input(&self, name: &str, len: usize) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, vec![0u8; len]).expect("write input");
        path
    }

    pub fn set_duration(&self, value: &str) {
        self.write("duration", value);
    }

    pub fn set_probe_json(&self, json: &str) {
        self.write("probe.json", json);
    }

    /// Silence periods reported by the encoder, as `(start, end)` pairs.
    pub fn set_silence(&self, periods: &[(f64, f64)]) {
        let mut text = String::from("Input #0, wav, from 'in.wav':\n");
        for (start, end) in periods {
            text.push_str(&format!("[silencedetect @ 0x55d1] silence_start: {start}\n"));
            text.push_str(&format!(
                "[silencedetect @ 0x55d1] silence_end: {end} | silence_duration: {}\n",
                end - start
            ));
        }
        self.write("silence.txt", &text);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.write("delay", &format!("{:.2}", delay.as_secs_f64()));
    }

    pub fn clear_delay(&self) {
        let _ = fs::remove_file(self.root().join("delay"));
    }

    pub fn fail_on(&self, suffix: &str) {
        self.write("fail_on", suffix);
    }

    pub fn encoder_calls(&self) -> Vec<String> {
        read_log(&self.root().join("encoder.log"))
    }

    pub fn prober_calls(&self) -> Vec<String> {
        read_log(&self.root().join("prober.log"))
    }

    fn write(&self, name: &str, contents: &str) {
        fs::write(self.root().join(name), contents).expect("write fixture");
    }
}

fn write_script(path: &Path, template: &str, dir: &Path) {
    let script = template.replace("__DIR__", &dir.display().to_string());
    fs::write(path, script).expect("write script");
    let mut perms = fs::metadata(path).expect("stat script").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod script");
}

fn read_log(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default()
}
