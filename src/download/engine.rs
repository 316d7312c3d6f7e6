use crate::auth::{AuthError, CdnAuthToken, CdnAuthTokenManager};
use crate::cdn::{CdnClient, CdnError, ChunkRequest};
use crate::depot::{DepotFile, DepotManifest, FileChunk};
use crate::download::codec;
use crate::download::error::{DownloadError, DownloadResult};
use crate::download::rate_limiter::BandwidthLimiter;
use crate::download::types::{DepotContext, DownloadConfig, DownloadSummary, FileOutcome, FileReport};
use crate::integrity::{IntegrityError, IntegrityVerifier};
use crate::metrics;
use crate::progress::{emit, progress_channel, ByteProgress, ProgressSender, ProgressThrottle};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Downloads manifest-described files chunk by chunk.
///
/// Every chunk is decompressed and checked against its SHA-1 and CRC32
/// before it reaches disk, so a destination file only ever holds a
/// verified prefix followed by nothing.
pub struct ChunkedDownloadEngine {
    cdn: Arc<dyn CdnClient>,
    tokens: Arc<CdnAuthTokenManager>,
    config: DownloadConfig,
    limiter: BandwidthLimiter,
}

impl ChunkedDownloadEngine {
    pub fn new(
        cdn: Arc<dyn CdnClient>,
        tokens: Arc<CdnAuthTokenManager>,
        config: DownloadConfig,
    ) -> Self {
        let limiter = BandwidthLimiter::new(config.max_bytes_per_second);
        Self {
            cdn,
            tokens,
            config,
            limiter,
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download one manifest entry to `destination`.
    ///
    /// An existing file is scanned first: its verified prefix is kept, and a
    /// fully verified file is skipped without network access. On cancellation
    /// or failure the file is truncated to the end of the last verified chunk.
    pub async fn download_file(
        &self,
        ctx: &DepotContext,
        file: &DepotFile,
        destination: &Path,
        token: &CdnAuthToken,
        progress: &ProgressSender<ByteProgress>,
        cancel: &CancellationToken,
    ) -> DownloadResult<FileReport> {
        if file.is_directory() {
            tokio::fs::create_dir_all(destination).await?;
            return Ok(FileReport {
                outcome: FileOutcome::Directory,
                bytes_fetched: 0,
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut throttle =
            ProgressThrottle::new(file.size, self.config.progress_interval_for(file.size));

        let prefix = IntegrityVerifier::verified_prefix(destination, file)
            .await
            .map_err(|e| scan_error(file, e))?;

        if prefix.covers(file) {
            tracing::debug!(file = %file.filename, "Already verified, skipping");
            metrics::record_file_skipped();
            throttle.report(file.size, progress);
            throttle.finish(progress);
            return Ok(FileReport {
                outcome: FileOutcome::Skipped,
                bytes_fetched: 0,
            });
        }

        let handle = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(destination)
            .await?;
        handle.set_len(prefix.bytes).await?;

        let mut writer = BufWriter::with_capacity(self.config.write_buffer_for(file.size), handle);
        writer.seek(std::io::SeekFrom::Start(prefix.bytes)).await?;

        if prefix.bytes > 0 {
            tracing::info!(
                file = %file.filename,
                offset = prefix.bytes,
                chunks = prefix.chunks,
                "Resuming from verified prefix"
            );
        }
        throttle.report(prefix.bytes, progress);

        let mut token = token.clone();
        let mut committed = prefix.bytes;
        let mut bytes_fetched = 0u64;

        let transfer: DownloadResult<()> = async {
            for chunk in &file.chunks[prefix.chunks..] {
                if cancel.is_cancelled() {
                    return Err(DownloadError::Cancelled {
                        filename: file.filename.clone(),
                        resume_offset: committed,
                    });
                }

                let data = self.fetch_verified(ctx, file, chunk, &mut token, cancel, committed).await?;
                writer.write_all(&data).await?;

                committed = chunk.end();
                bytes_fetched += data.len() as u64;
                throttle.report(committed, progress);
            }
            Ok(())
        }
        .await;

        writer.flush().await?;
        let handle = writer.into_inner();

        if let Err(e) = transfer {
            handle.set_len(committed).await?;
            if !e.is_cancelled() {
                tracing::warn!(file = %file.filename, committed, "Download failed: {}", e);
            }
            return Err(e);
        }

        handle.set_len(file.size).await?;
        handle.sync_all().await?;
        drop(handle);

        #[cfg(unix)]
        if file.is_executable() {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(destination, std::fs::Permissions::from_mode(0o755)).await?;
        }

        throttle.finish(progress);

        let outcome = if prefix.bytes > 0 {
            FileOutcome::Resumed
        } else {
            FileOutcome::Downloaded
        };
        Ok(FileReport {
            outcome,
            bytes_fetched,
        })
    }

    /// Download every entry of `manifest` below `container`.
    ///
    /// Directories are created first. Files then run on up to
    /// `max_concurrent_files` workers; their byte counts are summed into one
    /// monotonic progress stream. The first failure cancels the remaining
    /// workers at their next chunk boundary.
    pub async fn download_manifest(
        &self,
        ctx: &DepotContext,
        manifest: &DepotManifest,
        container: &Path,
        progress: &ProgressSender<ByteProgress>,
        cancel: &CancellationToken,
    ) -> DownloadResult<DownloadSummary> {
        let mut summary = DownloadSummary {
            total_bytes: manifest.total_size,
            ..Default::default()
        };

        for dir in manifest.directories() {
            tokio::fs::create_dir_all(container.join(dir.relative_path())).await?;
            summary.directories += 1;
        }

        let files: Vec<&DepotFile> = manifest.regular_files().collect();
        let (agg_tx, mut agg_rx) = progress_channel::<(usize, ByteProgress)>();
        let outer = progress.clone();
        let total = manifest.total_size;
        let interval = self.config.progress_interval_for(total);
        let slots = files.len();

        let aggregator = tokio::spawn(async move {
            let mut per_file = vec![0u64; slots];
            let mut throttle = ProgressThrottle::new(total, interval);
            throttle.report(0, &outer);

            while let Some((index, event)) = agg_rx.recv().await {
                let slot = &mut per_file[index];
                *slot = (*slot).max(event.bytes_transferred);
                throttle.report(per_file.iter().sum(), &outer);
            }
            (throttle, outer)
        });

        let workers = cancel.child_token();
        let jobs: Vec<BoxFuture<'_, DownloadResult<FileReport>>> = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| {
                self.download_indexed(ctx, index, file, container, agg_tx.clone(), &workers)
                    .boxed()
            })
            .collect();
        let mut results = stream::iter(jobs).buffer_unordered(self.config.workers());

        let mut first_error: Option<DownloadError> = None;
        while let Some(result) = results.next().await {
            match result {
                Ok(report) => summary.add(report),
                Err(e) => {
                    workers.cancel();
                    match &first_error {
                        None => first_error = Some(e),
                        // Prefer the root cause over the cancellations it triggered
                        Some(prev) if prev.is_cancelled() && !e.is_cancelled() => {
                            first_error = Some(e)
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        drop(results);
        drop(agg_tx);

        let (mut throttle, outer) = aggregator
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))?;

        if let Some(e) = first_error {
            return Err(e);
        }
        throttle.finish(&outer);

        tracing::info!(
            depot_id = ctx.depot_id,
            downloaded = summary.files_downloaded,
            resumed = summary.files_resumed,
            skipped = summary.files_skipped,
            bytes = summary.bytes_fetched,
            "Depot download complete"
        );
        Ok(summary)
    }

    /// One worker job of `download_manifest`: the file's progress is tagged
    /// with its slot `index` for aggregation
    async fn download_indexed(
        &self,
        ctx: &DepotContext,
        index: usize,
        file: &DepotFile,
        container: &Path,
        agg_tx: ProgressSender<(usize, ByteProgress)>,
        workers: &CancellationToken,
    ) -> DownloadResult<FileReport> {
        let token = self.tokens.get_token(ctx.app_id).await?;
        let destination = container.join(file.relative_path());
        let (file_tx, mut file_rx) = progress_channel();

        let download = async move {
            let result = self
                .download_file(ctx, file, &destination, &token, &file_tx, workers)
                .await;
            drop(file_tx);
            result
        };
        let forward = async move {
            while let Some(event) = file_rx.recv().await {
                emit(&agg_tx, (index, event));
            }
        };

        let (result, ()) = tokio::join!(download, forward);
        result
    }

    /// Fetch, decode and verify one chunk, retrying within the policy budget.
    /// A rejected token is refreshed once per chunk.
    async fn fetch_verified(
        &self,
        ctx: &DepotContext,
        file: &DepotFile,
        chunk: &FileChunk,
        token: &mut CdnAuthToken,
        cancel: &CancellationToken,
        committed: u64,
    ) -> DownloadResult<Bytes> {
        let request = ChunkRequest::for_chunk(ctx.depot_id, chunk);
        let mut schedule = self.config.retry.schedule();
        let mut refreshed = false;

        loop {
            self.limiter.wait_for_bytes(chunk.compressed_size as usize).await;

            let failure = match self.cdn.fetch_chunk(token, &request).await {
                Ok(payload) => match codec::decompress(payload, ctx.codec) {
                    Ok(data) => match IntegrityVerifier::verify_chunk(&data, chunk) {
                        Ok(()) => {
                            metrics::record_chunk_verified(data.len() as u64);
                            return Ok(data);
                        }
                        Err(e) => Failure::Integrity(e.to_string()),
                    },
                    Err(e) => Failure::Integrity(e.to_string()),
                },
                Err(CdnError::Unauthorized(reason)) => {
                    if refreshed {
                        return Err(DownloadError::Auth(AuthError::Rejected {
                            app_id: ctx.app_id,
                            reason,
                        }));
                    }
                    refreshed = true;
                    *token = self.tokens.refresh(ctx.app_id, token).await?;
                    continue;
                }
                Err(e) if e.is_transient() => Failure::Network(e.to_string()),
                Err(e) => {
                    return Err(DownloadError::Cdn {
                        filename: file.filename.clone(),
                        source: e,
                    })
                }
            };

            let Some(delay) = schedule.next_delay() else {
                let attempts = schedule.attempts();
                return Err(match failure {
                    Failure::Integrity(reason) => DownloadError::Integrity {
                        filename: file.filename.clone(),
                        offset: chunk.offset,
                        attempts,
                        reason,
                    },
                    Failure::Network(reason) => DownloadError::Network {
                        filename: file.filename.clone(),
                        offset: chunk.offset,
                        attempts,
                        reason,
                    },
                });
            };

            metrics::record_chunk_retry(failure.label());
            tracing::warn!(
                file = %file.filename,
                offset = chunk.offset,
                attempt = schedule.attempts(),
                "Chunk {} failed, retrying in {:?}: {}",
                failure.label(),
                delay,
                failure.reason()
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(DownloadError::Cancelled {
                        filename: file.filename.clone(),
                        resume_offset: committed,
                    });
                }
            }
        }
    }
}

enum Failure {
    Integrity(String),
    Network(String),
}

impl Failure {
    fn label(&self) -> &'static str {
        match self {
            Failure::Integrity(_) => "integrity",
            Failure::Network(_) => "network",
        }
    }

    fn reason(&self) -> &str {
        match self {
            Failure::Integrity(r) | Failure::Network(r) => r,
        }
    }
}

fn scan_error(file: &DepotFile, err: IntegrityError) -> DownloadError {
    match err {
        IntegrityError::IoError(e) => DownloadError::Io(e),
        other => DownloadError::Integrity {
            filename: file.filename.clone(),
            offset: 0,
            attempts: 0,
            reason: other.to_string(),
        },
    }
}
