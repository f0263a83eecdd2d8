//! Lazy, capped stream of video records from a list of shards.
//!
//! Shards are fetched one at a time, in configured order, only when the
//! previous one is exhausted. Once the emission cap is reached no further
//! shard is fetched.

use crate::archive::{ArchiveError, SampleError, ShardArchive};
use crate::config::DataConfig;
use crate::fetcher::{FetchError, ShardFetcher};
use crate::record::VideoRecord;
use bytes::Bytes;
use futures::stream::{self, Stream};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a shard or sample was skipped.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("Shard unavailable: {0}")]
    Fetch(#[from] FetchError),

    #[error("Shard unreadable: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Malformed sample: {0}")]
    Sample(#[from] SampleError),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Global cap on emitted records, shareable across sources.
#[derive(Debug)]
pub struct EmissionCounter {
    emitted: AtomicU64,
    limit: u64,
}

impl EmissionCounter {
    pub fn new(limit: u64) -> Self {
        Self {
            emitted: AtomicU64::new(0),
            limit,
        }
    }

    /// Claim the next emission slot, returning its index.
    pub fn try_acquire(&self) -> Option<u64> {
        self.emitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.emitted() >= self.limit
    }
}

/// Source statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub records_emitted: u64,
    pub shards_fetched: u64,
    pub shards_skipped: u64,
    pub samples_skipped: u64,
}

struct OpenShard {
    index: usize,
    archive: Arc<ShardArchive>,
    cursor: usize,
}

/// Pull-based producer of [`VideoRecord`]s.
pub struct ShardSource {
    fetcher: Arc<dyn ShardFetcher>,
    dataset: String,
    shards: Vec<String>,
    counter: Arc<EmissionCounter>,
    next_shard: usize,
    current: Option<OpenShard>,
    stats: Arc<RwLock<SourceStats>>,
}

impl ShardSource {
    pub fn new(
        fetcher: Arc<dyn ShardFetcher>,
        dataset: impl Into<String>,
        shards: Vec<String>,
        counter: Arc<EmissionCounter>,
    ) -> Self {
        Self {
            fetcher,
            dataset: dataset.into(),
            shards,
            counter,
            next_shard: 0,
            current: None,
            stats: Arc::new(RwLock::new(SourceStats::default())),
        }
    }

    pub fn from_config(config: &DataConfig, fetcher: Arc<dyn ShardFetcher>) -> Self {
        Self::new(
            fetcher,
            config.dataset_name.clone(),
            config.shards.clone(),
            Arc::new(EmissionCounter::new(config.max_videos as u64)),
        )
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.read().clone()
    }

    /// Handle for reading statistics after the source is consumed.
    pub fn stats_handle(&self) -> Arc<RwLock<SourceStats>> {
        self.stats.clone()
    }

    /// Next complete sample, or `None` once the cap is hit or every shard
    /// is exhausted.
    pub async fn next_record(&mut self) -> Option<VideoRecord> {
        loop {
            if self.counter.is_exhausted() {
                return None;
            }

            let Some(shard) = self.current.as_mut() else {
                if self.next_shard >= self.shards.len() {
                    return None;
                }
                let index = self.next_shard;
                self.next_shard += 1;
                self.open_shard(index).await;
                continue;
            };

            let Some(pair) = shard.archive.samples().get(shard.cursor).cloned() else {
                debug!(shard = %self.shards[shard.index], "Shard exhausted");
                self.current = None;
                continue;
            };
            shard.cursor += 1;

            let shard_index = shard.index;
            let archive = shard.archive.clone();
            let sample_name = pair.name.clone();
            let read = tokio::task::spawn_blocking(move || archive.read_sample(&pair)).await;

            let (video, metadata) = match read.map_err(ShardError::from).and_then(|r| Ok(r?)) {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(
                        shard = %self.shards[shard_index],
                        sample = %sample_name,
                        error = %e,
                        "Skipping malformed sample"
                    );
                    self.stats.write().samples_skipped += 1;
                    continue;
                }
            };

            let Some(sample_id) = self.counter.try_acquire() else {
                return None;
            };
            self.stats.write().records_emitted += 1;

            return Some(VideoRecord {
                bytes: Bytes::from(video),
                metadata,
                sample_id,
                shard_index,
                sample_name,
            });
        }
    }

    /// Consume the source as a stream.
    pub fn into_stream(self) -> impl Stream<Item = VideoRecord> {
        stream::unfold(self, |mut source| async move {
            let record = source.next_record().await?;
            Some((record, source))
        })
    }

    async fn open_shard(&mut self, index: usize) {
        let shard = &self.shards[index];
        info!(shard = %shard, index = index, total = self.shards.len(), "Fetching shard");

        match self.fetch_and_index(shard).await {
            Ok(archive) => {
                info!(
                    shard = %shard,
                    samples = archive.samples().len(),
                    "Shard opened"
                );
                let mut stats = self.stats.write();
                stats.shards_fetched += 1;
                stats.samples_skipped += archive.incomplete() as u64;
                self.current = Some(OpenShard {
                    index,
                    archive: Arc::new(archive),
                    cursor: 0,
                });
            }
            Err(e) => {
                warn!(shard = %shard, error = %e, "Skipping unavailable shard");
                self.stats.write().shards_skipped += 1;
            }
        }
    }

    async fn fetch_and_index(&self, shard: &str) -> Result<ShardArchive, ShardError> {
        let path: PathBuf = self.fetcher.fetch(&self.dataset, shard).await?;
        let archive = tokio::task::spawn_blocking(move || ShardArchive::open(&path)).await??;
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_tar;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    /// Local fetcher that counts calls and can fail chosen shards.
    struct CountingFetcher {
        root: PathBuf,
        calls: AtomicUsize,
        failing: Vec<String>,
    }

    #[async_trait]
    impl ShardFetcher for CountingFetcher {
        async fn fetch(&self, _dataset: &str, shard: &str) -> Result<PathBuf, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|s| s == shard) {
                return Err(FetchError::Http {
                    status: 503,
                    url: shard.to_string(),
                });
            }
            Ok(self.root.join(shard))
        }
    }

    fn write_shard(dir: &Path, name: &str, samples: usize) -> String {
        let owned: Vec<(String, String)> = (0..samples)
            .flat_map(|i| {
                let base = format!("{}_{:03}", name, i);
                [
                    (format!("{}.mp4", base), format!("video {}", base)),
                    (format!("{}.json", base), format!(r#"{{"worker_id": "{}"}}"#, name)),
                ]
            })
            .collect();
        let members: Vec<(&str, &str)> = owned
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_str()))
            .collect();

        let file = format!("{}.tar", name);
        write_tar(&dir.join(&file), &members);
        file
    }

    fn create_source(
        root: &Path,
        shards: Vec<String>,
        failing: Vec<String>,
        max: u64,
    ) -> (ShardSource, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            root: root.to_path_buf(),
            calls: AtomicUsize::new(0),
            failing,
        });
        let source = ShardSource::new(
            fetcher.clone(),
            "org/egocentric",
            shards,
            Arc::new(EmissionCounter::new(max)),
        );
        (source, fetcher)
    }

    #[tokio::test]
    async fn test_cap_reached_mid_shard_stops_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let shards: Vec<String> = (0..50)
            .map(|i| write_shard(dir.path(), &format!("w{}", i), 2))
            .collect();

        let (source, fetcher) = create_source(dir.path(), shards, vec![], 3);
        let records: Vec<VideoRecord> = source.into_stream().collect().await;

        assert_eq!(records.len(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let ids: Vec<u64> = records.iter().map(|r| r.sample_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(records[2].shard_index, 1);
        assert_eq!(records[2].sample_name, "w1_000");
        assert_eq!(records[2].metadata["worker_id"], "w1");
        assert_eq!(&records[0].bytes[..], b"video w0_000");
    }

    #[tokio::test]
    async fn test_cap_never_exceeded_after_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let shards = vec![write_shard(dir.path(), "w0", 5)];

        let (mut source, fetcher) = create_source(dir.path(), shards, vec![], 2);
        assert!(source.next_record().await.is_some());
        assert!(source.next_record().await.is_some());
        assert!(source.next_record().await.is_none());
        assert!(source.next_record().await.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.stats().records_emitted, 2);
    }

    #[tokio::test]
    async fn test_failed_shards_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let shards = vec![
            write_shard(dir.path(), "w0", 1),
            "w1.tar".to_string(),
            "missing.tar".to_string(),
            write_shard(dir.path(), "w2", 1),
        ];

        let (mut source, _) =
            create_source(dir.path(), shards, vec!["w1.tar".to_string()], 100);
        let stats = source.stats_handle();

        let mut names = Vec::new();
        while let Some(record) = source.next_record().await {
            names.push(record.sample_name);
        }

        assert_eq!(names, vec!["w0_000", "w2_000"]);
        let stats = stats.read().clone();
        assert_eq!(stats.shards_fetched, 2);
        assert_eq!(stats.shards_skipped, 2);
    }

    #[tokio::test]
    async fn test_malformed_and_partial_samples_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_tar(
            &dir.path().join("w0.tar"),
            &[
                ("a.mp4", "video a"),
                ("a.json", "not json"),
                ("b.mp4", "video b"),
                ("c.mp4", "video c"),
                ("c.json", "{}"),
            ],
        );

        let (source, _) = create_source(dir.path(), vec!["w0.tar".to_string()], vec![], 10);
        let stats = source.stats_handle();
        let records: Vec<VideoRecord> = source.into_stream().collect().await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sample_name, "c");
        assert_eq!(records[0].sample_id, 0);
        assert_eq!(stats.read().samples_skipped, 2);
    }

    #[test]
    fn test_emission_counter() {
        let counter = EmissionCounter::new(2);
        assert_eq!(counter.try_acquire(), Some(0));
        assert_eq!(counter.try_acquire(), Some(1));
        assert_eq!(counter.try_acquire(), None);
        assert!(counter.is_exhausted());
        assert_eq!(counter.emitted(), 2);
    }
}
