use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::args::{duration_args, probe_args};
use crate::error::{MediavisorError, Result};
use crate::probe::{parse_duration, parse_media_info};
use crate::processor::MediaProcessor;

use super::{ConvertOptions, ExtractOptions, MediaInfo, ProgressSink};

impl MediaProcessor {
    /// Probe an input for duration, dimensions, codecs, bit rate and frame rate.
    pub async fn get_media_info(&self, input: &Path, cancel: &CancellationToken) -> Result<MediaInfo> {
        self.platform().ensure_supported()?;
        if input.as_os_str().is_empty() {
            return Err(MediavisorError::invalid("input path is empty"));
        }

        let metadata = tokio::fs::metadata(self.resolve(input))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    MediavisorError::NotFound(input.display().to_string())
                }
                _ => MediavisorError::Io(e),
            })?;

        let output = self.run_prober(&probe_args(input), cancel).await?;
        let mut info = parse_media_info(&output.stdout)?;
        info.file_size = metadata.len();

        debug!(
            "{}: {:.2}s, {}x{}, video={}, audio={}",
            input.display(),
            info.duration,
            info.width,
            info.height,
            info.video_codec,
            info.audio_codec
        );
        Ok(info)
    }

    /// Container duration in seconds.
    pub async fn get_media_duration(&self, input: &Path, cancel: &CancellationToken) -> Result<f64> {
        self.platform().ensure_supported()?;
        if input.as_os_str().is_empty() {
            return Err(MediavisorError::invalid("input path is empty"));
        }

        let output = self.run_prober(&duration_args(input), cancel).await?;
        parse_duration(&output.stdout)
    }

    pub async fn convert(&self, opts: &ConvertOptions, cancel: &CancellationToken) -> Result<()> {
        self.convert_inner(opts, cancel, None).await
    }

    pub async fn extract(&self, opts: &ExtractOptions, cancel: &CancellationToken) -> Result<()> {
        self.extract_inner(opts, cancel, None).await
    }

    /// Convert each item in order. The first failure aborts the batch;
    /// outputs already written are kept.
    pub async fn convert_batch(
        &self,
        items: &[ConvertOptions],
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Converting batch of {} items", items.len());
        for (i, opts) in items.iter().enumerate() {
            self.convert(opts, cancel).await.inspect_err(|e| {
                warn!("Batch conversion stopped at item {}: {}", i, e);
            })?;
        }
        Ok(())
    }

    pub async fn extract_batch(
        &self,
        items: &[ExtractOptions],
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Extracting batch of {} items", items.len());
        for (i, opts) in items.iter().enumerate() {
            self.extract(opts, cancel).await.inspect_err(|e| {
                warn!("Batch extraction stopped at item {}: {}", i, e);
            })?;
        }
        Ok(())
    }

    pub(crate) async fn convert_inner(
        &self,
        opts: &ConvertOptions,
        cancel: &CancellationToken,
        job: Option<&str>,
    ) -> Result<()> {
        self.platform().ensure_supported()?;
        opts.validate()?;

        let total = self
            .progress_total(opts.progress.as_ref(), &opts.input, cancel)
            .await;
        let args = self.args.convert(opts);

        info!("Converting {} -> {}", opts.input.display(), opts.output.display());
        self.run_encoder(&args, cancel, opts.progress.as_ref().map(|s| (s, total)), job)
            .await?;
        Ok(())
    }

    pub(crate) async fn extract_inner(
        &self,
        opts: &ExtractOptions,
        cancel: &CancellationToken,
        job: Option<&str>,
    ) -> Result<()> {
        self.platform().ensure_supported()?;
        opts.validate()?;

        let total = self
            .progress_total(opts.progress.as_ref(), &opts.input, cancel)
            .await;
        let args = self.args.extract(opts);

        info!(
            "Extracting {} from {} -> {}",
            opts.kind,
            opts.input.display(),
            opts.output.display()
        );
        self.run_encoder(&args, cancel, opts.progress.as_ref().map(|s| (s, total)), job)
            .await?;
        Ok(())
    }

    /// Duration used to scale progress; zero when there is no sink or the
    /// probe fails.
    async fn progress_total(
        &self,
        sink: Option<&ProgressSink>,
        input: &Path,
        cancel: &CancellationToken,
    ) -> f64 {
        if sink.is_none() {
            return 0.0;
        }
        match self.get_media_duration(input, cancel).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Progress will be unscaled, duration probe failed: {}", e);
                0.0
            }
        }
    }
}
