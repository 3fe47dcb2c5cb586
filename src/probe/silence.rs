use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::media::SilencePeriod;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"silence_(start|end):\s*(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)")
            .expect("silence marker regex is valid")
    })
}

/// Pair `silence_start:` / `silence_end:` markers from silencedetect output.
///
/// Periods come back in file order. A start without a matching end is
/// dropped, as is an end with no open start.
pub fn parse_silence(output: &str) -> Vec<SilencePeriod> {
    let mut periods = Vec::new();
    let mut open: Option<f64> = None;

    for caps in marker_regex().captures_iter(output) {
        let Ok(value) = caps[2].parse::<f64>() else {
            continue;
        };

        match &caps[1] {
            "start" => open = Some(value),
            _ => {
                if let Some(start) = open.take() {
                    periods.push(SilencePeriod { start, end: value });
                }
            }
        }
    }

    debug!("Parsed {} silence periods", periods.len());
    periods
}

/// Total silent time across all periods.
pub fn total_silence(periods: &[SilencePeriod]) -> f64 {
    periods.iter().map(SilencePeriod::duration).sum()
}
