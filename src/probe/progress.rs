use crate::media::ProgressInfo;

/// Incremental reader for the encoder's `-progress pipe:1` stream.
///
/// Lines are `key=value` pairs grouped into blocks terminated by
/// `progress=continue` or `progress=end`. One [`ProgressInfo`] is produced per
/// block. `current_time` never decreases across the records of one parser.
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    total_duration: f64,
    current_time: f64,
    speed: f64,
    bitrate: String,
    fps: f64,
    finished: bool,
}

impl ProgressParser {
    /// `total_duration` of zero means unknown; `progress` then stays at zero
    /// until the final block.
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration: if total_duration.is_finite() {
                total_duration.max(0.0)
            } else {
                0.0
            },
            ..Default::default()
        }
    }

    /// Whether a `progress=end` block has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one line; returns a record when the line closes a block.
    pub fn push_line(&mut self, line: &str) -> Option<ProgressInfo> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            // out_time_ms is microseconds as well, despite its name.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.advance(us as f64 / 1_000_000.0);
                }
            }
            "out_time" => {
                if let Some(secs) = parse_clock(value) {
                    self.advance(secs);
                }
            }
            "speed" => {
                if let Ok(speed) = value.trim_end_matches('x').trim().parse::<f64>() {
                    self.speed = speed;
                }
            }
            "bitrate" => {
                if value != "N/A" {
                    self.bitrate = value.to_string();
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse::<f64>() {
                    self.fps = fps;
                }
            }
            "progress" => {
                if value == "end" {
                    self.finished = true;
                }
                return Some(self.snapshot());
            }
            _ => {}
        }

        None
    }

    fn advance(&mut self, secs: f64) {
        if secs.is_finite() && secs > self.current_time {
            self.current_time = secs;
        }
    }

    fn snapshot(&self) -> ProgressInfo {
        let progress = if self.finished {
            1.0
        } else if self.total_duration > 0.0 {
            (self.current_time / self.total_duration).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ProgressInfo {
            total_duration: self.total_duration,
            current_time: self.current_time,
            progress,
            speed: self.speed,
            bitrate: self.bitrate.clone(),
            fps: self.fps,
        }
    }
}

/// `HH:MM:SS.micro` to seconds.
fn parse_clock(value: &str) -> Option<f64> {
    if value.starts_with('-') {
        return None;
    }
    let mut parts = value.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ProgressParser, text: &str) -> Vec<ProgressInfo> {
        text.lines().filter_map(|l| parser.push_line(l)).collect()
    }

    #[test]
    fn test_blocks_flush_on_sentinel() {
        let mut parser = ProgressParser::new(20.0);
        let records = feed(
            &mut parser,
            "frame=120\nfps=24.00\nbitrate= 128.0kbits/s\nout_time_us=5000000\n\
             out_time=00:00:05.000000\nspeed=2.5x\nprogress=continue\n\
             out_time_us=10000000\nspeed=2.4x\nprogress=continue\n",
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].current_time, 5.0);
        assert_eq!(records[0].progress, 0.25);
        assert_eq!(records[0].speed, 2.5);
        assert_eq!(records[0].fps, 24.0);
        assert_eq!(records[0].bitrate, "128.0kbits/s");
        assert_eq!(records[1].current_time, 10.0);
        assert_eq!(records[1].progress, 0.5);
        assert!(!parser.is_finished());
    }

    #[test]
    fn test_end_block_completes() {
        let mut parser = ProgressParser::new(20.0);
        let records = feed(&mut parser, "out_time_us=19500000\nprogress=end\n");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].progress, 1.0);
        assert!(parser.is_finished());
    }

    #[test]
    fn test_current_time_never_decreases() {
        let mut parser = ProgressParser::new(10.0);
        let records = feed(
            &mut parser,
            "out_time_us=4000000\nprogress=continue\n\
             out_time_us=-9223372036854775807\nprogress=continue\n\
             out_time_us=3000000\nprogress=continue\n\
             out_time_us=6000000\nprogress=continue\n",
        );

        let times: Vec<f64> = records.iter().map(|r| r.current_time).collect();
        assert_eq!(times, vec![4.0, 4.0, 4.0, 6.0]);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unknown_total_keeps_zero_progress() {
        let mut parser = ProgressParser::new(0.0);
        let records = feed(&mut parser, "out_time_us=7000000\nspeed=N/A\nprogress=continue\n");

        assert_eq!(records[0].progress, 0.0);
        assert_eq!(records[0].current_time, 7.0);
        assert_eq!(records[0].speed, 0.0);
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut parser = ProgressParser::new(5.0);
        let records = feed(&mut parser, "out_time=00:00:09.500000\nprogress=continue\n");
        assert_eq!(records[0].progress, 1.0);
        assert_eq!(records[0].current_time, 9.5);
    }

    #[test]
    fn test_ignores_noise() {
        let mut parser = ProgressParser::new(5.0);
        assert!(parser.push_line("").is_none());
        assert!(parser.push_line("garbage without separator").is_none());
        assert!(parser.push_line("stream_0_0_q=28.0").is_none());
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("01:02:03.5"), Some(3723.5));
        assert_eq!(parse_clock("N/A"), None);
        assert_eq!(parse_clock("-00:00:01.000000"), None);
    }
}
