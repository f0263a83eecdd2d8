//! End-to-end curation run: shards → videos → clips → curated store.

use crate::clip_store::{ClipStore, StoreError};
use crate::config::{ConfigValidationError, CuratorConfig};
use crate::decoder::{DecodeError, FfmpegDecoder, VideoDecoder};
use crate::detector::{detector_from_config, DetectorError, SubjectDetector};
use crate::fetcher::{FetchError, HubFetcher, LocalFetcher, ShardFetcher};
use crate::quality_filter::{FilterOutcome, QualityFilter, QualityPolicy};
use crate::record::{Clip, VideoRecord};
use crate::shard_source::ShardSource;
use crate::window_extractor::{WindowConfig, WindowExtractor};
use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Fetcher setup failed: {0}")]
    Fetcher(#[from] FetchError),

    #[error("Decoder unavailable: {0}")]
    Decoder(#[from] DecodeError),

    #[error("Detector setup failed: {0}")]
    Detector(#[from] DetectorError),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Run interrupted before the manifest was written")]
    Interrupted,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub videos_sampled: u64,
    pub videos_failed: u64,
    pub clips_extracted: u64,
    pub clips_retained: u64,
    pub clips_rejected: u64,
    pub windows_dropped: u64,
    pub shards_fetched: u64,
    pub shards_skipped: u64,
    pub samples_skipped: u64,
    pub manifest_path: PathBuf,
}

/// What one video produced.
struct VideoOutcome {
    sample_id: u64,
    sample_name: String,
    retained: Vec<Clip>,
    extracted: u64,
    rejected: u64,
    dropped: u64,
    failed: bool,
}

/// Wires source, extractor, filter and store together.
pub struct Pipeline {
    config: CuratorConfig,
    fetcher: Arc<dyn ShardFetcher>,
    extractor: Arc<WindowExtractor>,
    filter: Arc<QualityFilter>,
}

impl Pipeline {
    pub fn new(
        config: CuratorConfig,
        fetcher: Arc<dyn ShardFetcher>,
        decoder: Arc<dyn VideoDecoder>,
        detector: Arc<dyn SubjectDetector>,
    ) -> Self {
        let extractor = WindowExtractor::new(WindowConfig::from(&config), decoder);
        let filter = QualityFilter::new(QualityPolicy::from(&config.clips), detector);

        Self {
            config,
            fetcher,
            extractor: Arc::new(extractor),
            filter: Arc::new(filter),
        }
    }

    /// Build the production pipeline: hub or local shards, ffmpeg decoding
    /// and the configured detector.
    pub fn from_config(config: CuratorConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let fetcher: Arc<dyn ShardFetcher> = match &config.data.local_root {
            Some(root) => {
                info!(root = %root.display(), "Reading shards from local mirror");
                Arc::new(LocalFetcher::new(root))
            }
            None => Arc::new(HubFetcher::new(&config.data)?),
        };

        let decoder = FfmpegDecoder::new(&config.processing);
        decoder.ensure_available()?;

        let detector = detector_from_config(&config.detector)?;

        Ok(Self::new(config, fetcher, Arc::new(decoder), detector))
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    /// Run until the source is exhausted or Ctrl-C is pressed.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Failed to install Ctrl-C handler, run is not interruptible");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C, stopping run");
        })
        .await
    }

    /// Run until the source is exhausted or `shutdown` completes.
    ///
    /// On shutdown nothing further is persisted and no manifest is written.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunSummary, PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = shutdown => Err(PipelineError::Interrupted),
            result = self.run_to_completion() => result,
        }
    }

    async fn run_to_completion(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let mut store = ClipStore::new(&self.config.output.local_dir)?;

        let source = ShardSource::from_config(&self.config.data, self.fetcher.clone());
        let source_stats = source.stats_handle();
        let workers = self.config.processing.num_workers.max(1);

        info!(
            dataset = %self.config.data.dataset_name,
            shards = self.config.data.shards.len(),
            max_videos = self.config.data.max_videos,
            workers = workers,
            output_dir = %store.output_dir().display(),
            "Starting curation run"
        );

        let extractor = self.extractor.clone();
        let filter = self.filter.clone();
        let outcomes = source
            .into_stream()
            .map(move |record| {
                let extractor = extractor.clone();
                let filter = filter.clone();
                tokio::task::spawn_blocking(move || process_video(&extractor, &filter, record))
            })
            .buffered(workers);
        let mut outcomes = std::pin::pin!(outcomes);

        let mut summary = RunSummary::default();
        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;

            summary.videos_sampled += 1;
            summary.clips_extracted += outcome.extracted;
            summary.clips_rejected += outcome.rejected;
            summary.windows_dropped += outcome.dropped;
            if outcome.failed {
                summary.videos_failed += 1;
            }

            let retained = outcome.retained.len() as u64;
            for clip in outcome.retained {
                store.persist(clip)?;
            }
            summary.clips_retained += retained;

            info!(
                sample_id = outcome.sample_id,
                sample = %outcome.sample_name,
                clips_extracted = outcome.extracted,
                clips_retained = retained,
                total_retained = summary.clips_retained,
                "Video processed"
            );
        }

        let stats = source_stats.read().clone();
        summary.shards_fetched = stats.shards_fetched;
        summary.shards_skipped = stats.shards_skipped;
        summary.samples_skipped = stats.samples_skipped;
        summary.manifest_path = store.finish()?;

        log_final_stats(&summary, started);
        Ok(summary)
    }
}

/// Decode, window and score one video. Runs on the blocking pool.
fn process_video(
    extractor: &WindowExtractor,
    filter: &QualityFilter,
    record: VideoRecord,
) -> VideoOutcome {
    let mut outcome = VideoOutcome {
        sample_id: record.sample_id,
        sample_name: record.sample_name.clone(),
        retained: Vec::new(),
        extracted: 0,
        rejected: 0,
        dropped: 0,
        failed: false,
    };

    let mut windows = match extractor.extract(&record.bytes, &record.metadata) {
        Ok(windows) => windows,
        Err(e) => {
            warn!(
                sample_id = record.sample_id,
                sample = %record.sample_name,
                error = %e,
                "Video could not be decoded, no clips produced"
            );
            outcome.failed = true;
            return outcome;
        }
    };
    drop(record);

    for clip in windows.by_ref() {
        outcome.extracted += 1;
        match filter.apply(clip) {
            FilterOutcome::Retained(clip) => outcome.retained.push(clip),
            FilterOutcome::Rejected { reason } => {
                debug!(sample = %outcome.sample_name, reason = %reason, "Clip rejected");
                outcome.rejected += 1;
            }
        }
    }
    outcome.dropped = windows.dropped() as u64;

    outcome
}

fn log_final_stats(summary: &RunSummary, started: Instant) {
    info!("=== Final Statistics ===");
    info!(
        shards_fetched = summary.shards_fetched,
        shards_skipped = summary.shards_skipped,
        samples_skipped = summary.samples_skipped,
        "Source stats"
    );
    info!(
        videos_sampled = summary.videos_sampled,
        videos_failed = summary.videos_failed,
        clips_extracted = summary.clips_extracted,
        clips_retained = summary.clips_retained,
        clips_rejected = summary.clips_rejected,
        windows_dropped = summary.windows_dropped,
        elapsed_secs = format!("{:.1}", started.elapsed().as_secs_f64()),
        manifest = %summary.manifest_path.display(),
        "Curation stats"
    );
}
