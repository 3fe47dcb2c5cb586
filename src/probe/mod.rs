//! Parsers for prober and encoder text output.

pub mod progress;
pub mod silence;

pub use progress::ProgressParser;
pub use silence::{parse_silence, total_silence};

use serde_json::Value;
use tracing::warn;

use crate::error::{MediavisorError, Result};
use crate::media::MediaInfo;

/// Parse `-print_format json -show_format -show_streams` output.
///
/// Only malformed JSON is an error. Absent or unparseable fields keep their
/// zero value. Streams are matched on their declared `codec_type`; the first
/// stream of each kind wins.
pub fn parse_media_info(json: &str) -> Result<MediaInfo> {
    let raw: Value = serde_json::from_str(json)
        .map_err(|e| MediavisorError::ParseFailure(format!("prober JSON: {e}")))?;

    let mut info = MediaInfo::default();

    if let Some(format) = raw.get("format") {
        if let Some(bit_rate) = format.get("bit_rate").and_then(text) {
            info.bit_rate = bit_rate;
        }
        match format.get("duration").and_then(number) {
            Some(d) => info.duration = d,
            None if format.get("duration").is_some() => {
                warn!("Ignoring unparseable duration in probe output");
            }
            None => {}
        }
    }

    let streams = raw
        .get("streams")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if let Some(video) = first_stream(streams, "video") {
        info.width = video.get("width").and_then(number).unwrap_or(0.0) as u32;
        info.height = video.get("height").and_then(number).unwrap_or(0.0) as u32;
        info.video_codec = video.get("codec_name").and_then(text).unwrap_or_default();
        info.frame_rate = video
            .get("avg_frame_rate")
            .and_then(Value::as_str)
            .map(parse_rational)
            .unwrap_or(0.0);
    }

    if let Some(audio) = first_stream(streams, "audio") {
        info.audio_codec = audio.get("codec_name").and_then(text).unwrap_or_default();
    }

    Ok(info)
}

/// Parse `-show_entries format=duration -of csv=p=0` output.
///
/// Duration is a required field, so anything unparseable is an error.
pub fn parse_duration(output: &str) -> Result<f64> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| MediavisorError::ParseFailure("prober returned no duration".into()))?;

    line.trim_end_matches(',')
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .ok_or_else(|| MediavisorError::ParseFailure(format!("invalid duration '{line}'")))
}

/// `num/den` frame rate. A zero denominator yields zero.
pub fn parse_rational(value: &str) -> f64 {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => value.trim().parse().unwrap_or(0.0),
    }
}

fn first_stream<'a>(streams: &'a [Value], kind: &str) -> Option<&'a Value> {
    streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some(kind))
}

/// Numbers arrive as JSON strings for format fields and as numbers for stream fields.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
