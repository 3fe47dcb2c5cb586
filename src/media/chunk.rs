use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MediavisorError, Result};
use crate::probe::{parse_silence, total_silence};
use crate::processor::MediaProcessor;

use super::{ChunkInfo, ChunkOptions, ChunkResult, MediaKind, SilencePeriod};

/// Shortest content span a silence-driven plan emits, in seconds.
pub const MIN_SILENCE_CHUNK: f64 = 0.5;

/// Re-plans allowed when a fixed-plan chunk exceeds `max_chunk_size`.
const MAX_RESIZE_ROUNDS: usize = 6;
/// Chunk duration is never halved below this many seconds.
const MIN_RESIZED_DURATION: f64 = 1.0;
/// Half the millisecond resolution of `-ss` / `-t`; closer boundaries are equal.
const BOUNDARY_EPSILON: f64 = 0.0005;

/// One time range of a chunking plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedChunk {
    pub index: usize,
    pub start: f64,
    /// Logical end recorded in [`ChunkInfo`].
    pub end: f64,
    /// End of the range actually written; past `end` only when overlap applies.
    pub extract_end: f64,
}

impl PlannedChunk {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Seconds passed to `-t`.
    pub fn extract_length(&self) -> f64 {
        self.extract_end - self.start
    }
}

/// Fixed-length ranges starting at `0, D, 2D, ...`.
///
/// Every non-terminal chunk's written range is widened by `overlap`, capped
/// at `duration`; the logical end stays at the nominal boundary.
pub fn plan_fixed_chunks(duration: f64, chunk_duration: f64, overlap: f64) -> Vec<PlannedChunk> {
    let mut plan = Vec::new();
    if !(duration.is_finite() && chunk_duration.is_finite()) || duration <= 0.0 || chunk_duration <= 0.0 {
        return plan;
    }
    let overlap = if overlap.is_finite() { overlap.max(0.0) } else { 0.0 };

    let mut index = 0;
    loop {
        // Boundaries come from the index so one chunk's end is exactly the next start.
        let start = index as f64 * chunk_duration;
        if duration - start < BOUNDARY_EPSILON {
            break;
        }
        let mut end = ((index + 1) as f64 * chunk_duration).min(duration);
        let terminal = duration - end < BOUNDARY_EPSILON;
        if terminal {
            end = duration;
        }
        let extract_end = if overlap > 0.0 && !terminal {
            (end + overlap).min(duration)
        } else {
            end
        };

        plan.push(PlannedChunk {
            index,
            start,
            end,
            extract_end,
        });
        index += 1;
    }

    plan
}

/// Content ranges between silence periods.
///
/// Walks periods in order with a cursor starting at zero. A span shorter than
/// [`MIN_SILENCE_CHUNK`] is dropped. With no periods the whole input becomes a
/// single chunk.
pub fn plan_silence_chunks(periods: &[SilencePeriod], duration: f64) -> Vec<PlannedChunk> {
    let mut plan = Vec::new();
    if !duration.is_finite() || duration <= 0.0 {
        return plan;
    }

    let mut push = |start: f64, end: f64| {
        plan.push(PlannedChunk {
            index: plan.len(),
            start,
            end,
            extract_end: end,
        });
    };

    let mut last_end = 0.0_f64;
    for period in periods {
        let start = period.start.min(duration);
        if start - last_end >= MIN_SILENCE_CHUNK {
            push(last_end, start);
        }
        // Overlapping reports must not move the cursor backwards.
        last_end = last_end.max(period.end.min(duration));
    }
    if duration - last_end >= MIN_SILENCE_CHUNK {
        push(last_end, duration);
    }

    plan
}

impl MediaProcessor {
    /// Split an audio input into chunks, silence-guided when requested.
    pub async fn chunk_audio(&self, opts: &ChunkOptions, cancel: &CancellationToken) -> Result<ChunkResult> {
        self.chunk(opts, MediaKind::Audio, cancel).await
    }

    /// Split a video input into fixed-length chunks.
    pub async fn chunk_video(&self, opts: &ChunkOptions, cancel: &CancellationToken) -> Result<ChunkResult> {
        self.chunk(opts, MediaKind::Video, cancel).await
    }

    /// Probe, plan and cut. Chunks are produced one at a time in index order.
    pub async fn chunk(
        &self,
        opts: &ChunkOptions,
        kind: MediaKind,
        cancel: &CancellationToken,
    ) -> Result<ChunkResult> {
        self.platform().ensure_supported()?;
        opts.validate()?;

        create_output_dir(&self.resolve(&opts.output_dir)).await?;

        let duration = self.get_media_duration(&opts.input, cancel).await?;
        if duration.is_nan() || duration <= 0.0 {
            return Err(MediavisorError::invalid(format!(
                "{} has no duration (probed {})",
                opts.input.display(),
                duration
            )));
        }
        info!("Chunking {} ({} {:.2}s)", opts.input.display(), kind, duration);

        if opts.enable_silence_detection && kind == MediaKind::Audio {
            let periods = self.detect_silence(opts, cancel).await?;
            let plan = plan_silence_chunks(&periods, duration);
            debug!(
                "Silence plan: {} periods ({:.2}s silent) -> {} chunks",
                periods.len(),
                total_silence(&periods),
                plan.len()
            );

            let chunks = self.produce_chunks(opts, kind, &plan, cancel).await?;
            if opts.max_chunk_size > 0 {
                for chunk in chunks.iter().filter(|c| c.file_size > opts.max_chunk_size) {
                    warn!(
                        "Chunk {} is {} bytes, above the {} byte limit",
                        chunk.index, chunk.file_size, opts.max_chunk_size
                    );
                }
            }
            return Ok(summarize(opts, chunks));
        }

        let mut chunk_duration = opts.chunk_duration;
        let mut round = 0;
        loop {
            let plan = plan_fixed_chunks(duration, chunk_duration, opts.overlap_duration);
            let chunks = self.produce_chunks(opts, kind, &plan, cancel).await?;

            let oversize = opts.max_chunk_size > 0
                && chunks.iter().any(|c| c.file_size > opts.max_chunk_size);
            if !oversize {
                return Ok(summarize(opts, chunks));
            }

            let halved = chunk_duration / 2.0;
            if round >= MAX_RESIZE_ROUNDS || halved < MIN_RESIZED_DURATION {
                warn!(
                    "Chunks still exceed {} bytes at {:.3}s, keeping them",
                    opts.max_chunk_size, chunk_duration
                );
                return Ok(summarize(opts, chunks));
            }

            info!(
                "Chunk above {} bytes, re-planning with {:.3}s chunks",
                opts.max_chunk_size, halved
            );
            chunk_duration = halved;
            round += 1;
        }
    }

    /// Run the encoder's silence detector over the input.
    pub async fn detect_silence(
        &self,
        opts: &ChunkOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SilencePeriod>> {
        self.platform().ensure_supported()?;
        if opts.input.as_os_str().is_empty() {
            return Err(MediavisorError::invalid("input path is empty"));
        }

        let args = self.args.silence(opts);
        let output = self.run_encoder(&args, cancel, None, None).await?;
        Ok(parse_silence(&output.stderr))
    }

    async fn produce_chunks(
        &self,
        opts: &ChunkOptions,
        kind: MediaKind,
        plan: &[PlannedChunk],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkInfo>> {
        let mut chunks = Vec::with_capacity(plan.len());

        for planned in plan {
            let output_path = opts.chunk_path(planned.index);
            debug!(
                "Creating chunk {}: {:.3}s to {:.3}s",
                planned.index, planned.start, planned.extract_end
            );

            let args = self.args.chunk(
                opts,
                kind,
                planned.start,
                planned.extract_length(),
                &output_path,
            );
            let progress = opts.progress.as_ref().map(|s| (s, planned.extract_length()));
            self.run_encoder(&args, cancel, progress, None)
                .await
                .map_err(|e| MediavisorError::Chunk {
                    index: planned.index,
                    source: Box::new(e),
                })?;

            chunks.push(ChunkInfo {
                index: planned.index,
                start_time: planned.start,
                end_time: planned.end,
                duration: planned.duration(),
                output_path,
                file_size: 0,
                is_silence: false,
            });
        }

        for chunk in &mut chunks {
            chunk.file_size = tokio::fs::metadata(self.resolve(&chunk.output_path))
                .await
                .map_err(|e| MediavisorError::Chunk {
                    index: chunk.index,
                    source: Box::new(e.into()),
                })?
                .len();
        }

        info!("Created {} chunks", chunks.len());
        Ok(chunks)
    }
}

async fn create_output_dir(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(dir).await?;
    Ok(())
}

fn summarize(opts: &ChunkOptions, chunks: Vec<ChunkInfo>) -> ChunkResult {
    ChunkResult {
        total_chunks: chunks.len(),
        total_size: chunks.iter().map(|c| c.file_size).sum(),
        chunks,
        output_dir: opts.output_dir.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(plan: &[PlannedChunk]) -> Vec<(f64, f64)> {
        plan.iter().map(|c| (c.start, c.end)).collect()
    }

    fn period(start: f64, end: f64) -> SilencePeriod {
        SilencePeriod { start, end }
    }

    #[test]
    fn test_fixed_plan_with_remainder() {
        let plan = plan_fixed_chunks(35.0, 10.0, 0.0);
        assert_eq!(
            ranges(&plan),
            vec![(0.0, 10.0), (10.0, 20.0), (20.0, 30.0), (30.0, 35.0)]
        );
        assert_eq!(plan.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(plan.iter().all(|c| c.extract_end == c.end));
    }

    #[test]
    fn test_fixed_plan_inexact_boundaries() {
        // 3 * 11.7 and 3 * 0.7 land one ulp below the duration.
        for (duration, chunk) in [(35.1, 11.7), (2.1, 0.7)] {
            let plan = plan_fixed_chunks(duration, chunk, 0.0);
            assert_eq!(plan.len(), 3, "{duration} / {chunk}");
            assert_eq!(plan[2].end, duration);
            assert!(plan.iter().all(|c| c.extract_length() >= 0.001));
        }

        let plan = plan_fixed_chunks(35.1, 11.7, 1.0);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].extract_end, 35.1);
    }

    #[test]
    fn test_fixed_plan_exact_multiple() {
        let plan = plan_fixed_chunks(30.0, 10.0, 0.0);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].end, 30.0);
    }

    #[test]
    fn test_fixed_plan_shorter_than_chunk() {
        let plan = plan_fixed_chunks(4.2, 30.0, 2.0);
        assert_eq!(ranges(&plan), vec![(0.0, 4.2)]);
        assert_eq!(plan[0].extract_end, 4.2);
    }

    #[test]
    fn test_overlap_widens_written_range_only() {
        let plan = plan_fixed_chunks(25.0, 10.0, 1.5);

        assert_eq!(ranges(&plan), vec![(0.0, 10.0), (10.0, 20.0), (20.0, 25.0)]);
        assert_eq!(plan[0].extract_end, 11.5);
        assert_eq!(plan[1].extract_end, 21.5);
        assert_eq!(plan[2].extract_end, 25.0);
        assert_eq!(plan[0].extract_length(), 11.5);
    }

    #[test]
    fn test_overlap_longer_than_chunk() {
        let plan = plan_fixed_chunks(20.0, 5.0, 8.0);

        assert_eq!(plan.len(), 4);
        for pair in plan.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert!(plan.iter().all(|c| c.extract_end <= 20.0));
        assert_eq!(plan[2].extract_end, 20.0);
    }

    #[test]
    fn test_fixed_plan_rejects_degenerate_input() {
        assert!(plan_fixed_chunks(0.0, 10.0, 0.0).is_empty());
        assert!(plan_fixed_chunks(10.0, 0.0, 0.0).is_empty());
        assert!(plan_fixed_chunks(f64::NAN, 10.0, 0.0).is_empty());
    }

    #[test]
    fn test_silence_plan_splits_around_period() {
        let plan = plan_silence_chunks(&[period(4.0, 6.0)], 10.0);
        assert_eq!(ranges(&plan), vec![(0.0, 4.0), (6.0, 10.0)]);
        assert!(plan.iter().all(|c| c.duration() >= MIN_SILENCE_CHUNK));
    }

    #[test]
    fn test_silence_plan_drops_short_span() {
        let plan = plan_silence_chunks(&[period(0.2, 0.3)], 10.0);
        assert_eq!(ranges(&plan), vec![(0.3, 10.0)]);
        assert_eq!(plan[0].index, 0);
    }

    #[test]
    fn test_silence_plan_without_periods() {
        let plan = plan_silence_chunks(&[], 12.5);
        assert_eq!(ranges(&plan), vec![(0.0, 12.5)]);
    }

    #[test]
    fn test_silence_plan_trailing_silence() {
        let plan = plan_silence_chunks(&[period(3.0, 4.0), period(9.7, 10.0)], 10.0);
        assert_eq!(ranges(&plan), vec![(0.0, 3.0), (4.0, 9.7)]);
    }

    #[test]
    fn test_silence_plan_keeps_cursor_monotonic() {
        let plan = plan_silence_chunks(
            &[period(2.0, 5.0), period(4.0, 4.5), period(7.0, 8.0)],
            10.0,
        );
        assert_eq!(ranges(&plan), vec![(0.0, 2.0), (5.0, 7.0), (8.0, 10.0)]);
    }

    #[test]
    fn test_plans_satisfy_ordering_invariants() {
        let silence = vec![
            period(-0.01, 0.4),
            period(1.0, 1.2),
            period(1.5, 3.0),
            period(8.0, 8.1),
            period(14.9, 16.0),
        ];

        for duration in [0.6, 1.0, 7.3, 15.0, 61.0] {
            for d in [0.5, 1.0, 3.3, 10.0] {
                for overlap in [0.0, 0.25, 5.0] {
                    let plan = plan_fixed_chunks(duration, d, overlap);
                    assert!(!plan.is_empty());
                    assert!(plan[0].start >= 0.0);
                    assert_eq!(plan.last().unwrap().end, duration);
                    assert!(plan.iter().all(|c| c.duration() >= BOUNDARY_EPSILON));
                    for pair in plan.windows(2) {
                        assert!(pair[0].end <= pair[1].start);
                        assert_eq!(pair[0].index + 1, pair[1].index);
                    }
                }
            }

            let plan = plan_silence_chunks(&silence, duration);
            for chunk in &plan {
                assert!(chunk.duration() >= MIN_SILENCE_CHUNK);
                assert!(chunk.start >= 0.0 && chunk.end <= duration);
            }
            for pair in plan.windows(2) {
                assert!(pair[0].end <= pair[1].start);
            }
        }
    }
}
