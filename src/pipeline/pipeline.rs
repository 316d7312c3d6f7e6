use crate::archive::{BootstrapArchive, BootstrapArchiveExtractor, ExtractProgress, ExtractSummary};
use crate::auth::CdnAuthTokenManager;
use crate::cdn::{CdnClient, TokenSource};
use crate::config::InstallerConfig;
use crate::depot::{DepotCatalog, DepotError, DepotFile, DepotManifest};
use crate::download::{ChunkedDownloadEngine, DepotContext, DownloadSummary};
use crate::metrics::{record_stage_duration, InstallMetrics};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::state_machine::InstallStateMachine;
use crate::pipeline::types::{
    InstallRequest, PipelineConfig, PipelineEvent, PipelineStage, PipelineTransition,
};
use crate::progress::{emit, progress_channel, ByteProgress, ProgressReceiver, ProgressSender};
use crate::record::{InstallRecord, InstallRecordStore, InstallationStatus, RecordUpdate};
use crate::runtime::{GuestRuntime, RuntimeHandle};
use crate::validator::{InstallationValidator, ValidationReport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Downloaded bootstrap files are staged here, relative to the container root
pub const STAGING_DIR: &str = ".depot/staging";

type ActiveKey = (u32, PathBuf);

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub record: InstallRecord,
    pub runtime: RuntimeHandle,
    pub bootstrap: Option<ExtractSummary>,
    pub content: DownloadSummary,
}

/// Drives one installation from runtime preparation to validation.
///
/// At most one run per (app, container) is active; a second request for the
/// same pair fails with `AlreadyInProgress` without touching the record.
pub struct InstallationPipeline {
    runtime: Arc<dyn GuestRuntime>,
    tokens: Arc<CdnAuthTokenManager>,
    catalog: Arc<DepotCatalog>,
    engine: Arc<ChunkedDownloadEngine>,
    extractor: BootstrapArchiveExtractor,
    validator: InstallationValidator,
    records: Arc<dyn InstallRecordStore>,
    config: PipelineConfig,
    active: Arc<DashMap<ActiveKey, String>>,
}

impl InstallationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn GuestRuntime>,
        tokens: Arc<CdnAuthTokenManager>,
        catalog: Arc<DepotCatalog>,
        engine: Arc<ChunkedDownloadEngine>,
        extractor: BootstrapArchiveExtractor,
        validator: InstallationValidator,
        records: Arc<dyn InstallRecordStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            runtime,
            tokens,
            catalog,
            engine,
            extractor,
            validator,
            records,
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Wire every component from one configuration
    pub fn from_config(
        config: &InstallerConfig,
        cdn: Arc<dyn CdnClient>,
        token_source: Arc<dyn TokenSource>,
        runtime: Arc<dyn GuestRuntime>,
        records: Arc<dyn InstallRecordStore>,
    ) -> Self {
        let tokens = Arc::new(CdnAuthTokenManager::new(
            token_source,
            config.download.retry.clone(),
        ));
        let catalog = Arc::new(DepotCatalog::new(cdn.clone()));
        let engine = Arc::new(ChunkedDownloadEngine::new(
            cdn,
            tokens.clone(),
            config.download.clone(),
        ));

        Self::new(
            runtime,
            tokens,
            catalog,
            engine,
            BootstrapArchiveExtractor::new(config.extract.clone()),
            InstallationValidator::new(config.validator.clone()),
            records,
            config.pipeline.clone(),
        )
    }

    pub fn records(&self) -> &Arc<dyn InstallRecordStore> {
        &self.records
    }

    pub fn validator(&self) -> &InstallationValidator {
        &self.validator
    }

    /// Whether a run for `app_id` into `container` is in flight
    pub fn is_active(&self, app_id: u32, container: &Path) -> bool {
        self.active.contains_key(&(app_id, container.to_path_buf()))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Install the app described by `request`.
    ///
    /// Overall progress in [0, 1] and stage transitions are sent on `events`.
    /// On failure the record keeps the error message and a failure status:
    /// `UPDATE_PAUSED` after cancellation, `VALIDATION_FAILED` otherwise.
    pub async fn run(
        &self,
        request: &InstallRequest,
        events: ProgressSender<PipelineEvent>,
        cancel: &CancellationToken,
    ) -> PipelineResult<InstallOutcome> {
        request.validate()?;
        let record = self
            .records
            .get(&request.record_id)
            .await?
            .ok_or_else(|| PipelineError::RecordNotFound(request.record_id.clone()))?;
        let _active = self.claim(&record)?;

        tracing::info!(
            record_id = %record.id,
            app_id = record.app_id,
            container = %record.container_path.display(),
            "Starting installation"
        );

        let metrics = InstallMetrics::start(record.app_id);
        let machine = InstallStateMachine::new();
        machine.transition(PipelineTransition::Start)?;

        let mut run = InstallRun {
            pipeline: self,
            request,
            record,
            machine,
            reporter: StageReporter::new(events),
            cancel: cancel.child_token(),
            content_progress: None,
            stage_started: Instant::now(),
        };

        match run.execute().await {
            Ok(outcome) => {
                metrics.complete();
                emit(
                    &run.reporter.events,
                    PipelineEvent::Completed {
                        record_id: outcome.record.id.clone(),
                    },
                );
                tracing::info!(
                    record_id = %outcome.record.id,
                    bytes = outcome.content.total_bytes,
                    "Installation complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                run.fail(&e).await;
                metrics.fail(e.kind().as_str());
                Err(e)
            }
        }
    }

    /// Re-run the launch checks for an existing record.
    ///
    /// An installed record that no longer validates is moved to
    /// `VALIDATION_FAILED`. Records with a run in flight are only inspected.
    pub async fn revalidate(&self, record_id: &str) -> PipelineResult<ValidationReport> {
        let record = self
            .records
            .get(record_id)
            .await?
            .ok_or_else(|| PipelineError::RecordNotFound(record_id.to_string()))?;

        let report = self.validator.validate(&record).await;
        if self.is_active(record.app_id, &record.container_path) {
            return Ok(report);
        }

        if record.status == InstallationStatus::Installed && !report.is_valid() {
            tracing::warn!(record_id, "Installed app no longer validates");
            self.records
                .apply(
                    record_id,
                    &RecordUpdate::status(InstallationStatus::ValidationFailed)
                        .with_error(report.summary()),
                )
                .await?;
        }
        Ok(report)
    }

    fn claim(&self, record: &InstallRecord) -> PipelineResult<ActiveInstall> {
        let key = (record.app_id, record.container_path.clone());
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => Err(PipelineError::AlreadyInProgress {
                app_id: record.app_id,
                container: record.container_path.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.id.clone());
                Ok(ActiveInstall {
                    active: self.active.clone(),
                    key,
                })
            }
        }
    }

    /// Drive `work` under the stage time limit while mapping its local
    /// progress into overall progress
    async fn run_stage<T, P, F>(
        &self,
        stage: PipelineStage,
        reporter: &mut StageReporter,
        cancel: &CancellationToken,
        mut progress: ProgressReceiver<P>,
        mut local: impl FnMut(P) -> f64,
        work: F,
    ) -> PipelineResult<T>
    where
        F: Future<Output = PipelineResult<T>>,
    {
        let limit = self.config.timeout_for(stage);
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);
        tokio::pin!(work);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = progress.recv() => reporter.progress(stage, local(event)),
                result = &mut work => break Some(result),
                _ = &mut deadline => break None,
            }
        };

        let Some(result) = outcome else {
            tracing::error!(stage = %stage, ?limit, "Stage timed out");
            // Downloads stop at the next chunk boundary and truncate to the
            // last verified chunk; extraction stops at the next entry
            cancel.cancel();
            if tokio::time::timeout(self.config.stop_grace, &mut work)
                .await
                .is_err()
            {
                tracing::warn!(stage = %stage, "Timed-out stage did not stop, abandoning it");
            }
            return Err(PipelineError::Timeout { stage, limit });
        };

        while let Ok(event) = progress.try_recv() {
            reporter.progress(stage, local(event));
        }
        result
    }
}

/// Releases the (app, container) claim when the run ends
struct ActiveInstall {
    active: Arc<DashMap<ActiveKey, String>>,
    key: ActiveKey,
}

impl Drop for ActiveInstall {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

/// Emits stage events and keeps overall progress monotonic
struct StageReporter {
    events: ProgressSender<PipelineEvent>,
    last: Option<f64>,
}

impl StageReporter {
    fn new(events: ProgressSender<PipelineEvent>) -> Self {
        Self { events, last: None }
    }

    fn started(&mut self, stage: PipelineStage) {
        emit(&self.events, PipelineEvent::StageStarted { stage });
        self.progress(stage, 0.0);
    }

    fn progress(&mut self, stage: PipelineStage, local: f64) {
        let overall = stage.range().map(local);
        if self.last.map_or(true, |last| overall > last) {
            self.last = Some(overall);
            emit(&self.events, PipelineEvent::Progress { stage, overall });
        }
    }

    fn completed(&mut self, stage: PipelineStage) {
        self.progress(stage, 1.0);
        emit(&self.events, PipelineEvent::StageCompleted { stage });
    }
}

struct Manifests {
    content: DepotManifest,
    bootstrap: Option<(DepotManifest, DepotFile)>,
}

/// State of one `run` call
struct InstallRun<'a> {
    pipeline: &'a InstallationPipeline,
    request: &'a InstallRequest,
    record: InstallRecord,
    machine: InstallStateMachine,
    reporter: StageReporter,
    cancel: CancellationToken,
    content_progress: Option<(u64, u64)>,
    stage_started: Instant,
}

impl InstallRun<'_> {
    async fn execute(&mut self) -> PipelineResult<InstallOutcome> {
        let runtime = self.initialize().await?;
        let manifests = self.prepare_container().await?;
        let staged = self.fetch_bootstrap(&manifests).await?;
        let bootstrap = self.unpack(staged).await?;
        let content = self.fetch_content(&manifests.content).await?;
        self.verify().await?;

        Ok(InstallOutcome {
            record: self.record.clone(),
            runtime,
            bootstrap,
            content,
        })
    }

    async fn initialize(&mut self) -> PipelineResult<RuntimeHandle> {
        let stage = PipelineStage::Initializing;
        self.begin(stage).await?;

        let (tx, rx) = progress_channel::<f64>();
        let runtime = self.pipeline.runtime.clone();
        let work = async move { runtime.prepare(tx).await.map_err(PipelineError::from) };
        let handle = self
            .pipeline
            .run_stage(stage, &mut self.reporter, &self.cancel, rx, |p| p, work)
            .await?;

        tracing::debug!(root = %handle.root.display(), version = handle.version, "Guest runtime ready");
        self.finish(stage)?;
        Ok(handle)
    }

    async fn prepare_container(&mut self) -> PipelineResult<Manifests> {
        let stage = PipelineStage::PreparingContainer;
        self.begin(stage).await?;

        let (tx, rx) = progress_channel::<f64>();
        let tokens = &self.pipeline.tokens;
        let catalog = &self.pipeline.catalog;
        let request = self.request;
        let app_id = self.record.app_id;
        let container = self.record.container_path.clone();

        let work = async move {
            tokio::fs::create_dir_all(&container).await?;
            emit(&tx, 0.2);

            let token = tokens.get_token(app_id).await?;
            emit(&tx, 0.4);

            let content = catalog
                .fetch_manifest(&token, app_id, request.content_depot, &request.branch)
                .await?;
            emit(&tx, 0.7);

            let bootstrap = match &request.bootstrap {
                None => None,
                Some(source) => {
                    let manifest = catalog
                        .fetch_manifest(&token, app_id, source.depot_id, &request.branch)
                        .await?;
                    let file = manifest.file(&source.filename).cloned().ok_or_else(|| {
                        DepotError::FileNotFound {
                            depot_id: source.depot_id,
                            filename: source.filename.clone(),
                        }
                    })?;
                    Some((manifest, file))
                }
            };
            emit(&tx, 1.0);
            Ok::<_, PipelineError>(Manifests { content, bootstrap })
        };
        let manifests = self
            .pipeline
            .run_stage(stage, &mut self.reporter, &self.cancel, rx, |p| p, work)
            .await?;

        let total = manifests.content.total_size;
        self.content_progress = Some((0, total));
        self.record = self
            .pipeline
            .records
            .apply(&self.record.id, &RecordUpdate::progress(0, total))
            .await?;

        self.finish(stage)?;
        Ok(manifests)
    }

    /// Download the bootstrap file into the staging directory
    async fn fetch_bootstrap(&mut self, manifests: &Manifests) -> PipelineResult<Option<PathBuf>> {
        let stage = PipelineStage::FetchingBootstrap;
        self.begin(stage).await?;

        let Some((manifest, file)) = &manifests.bootstrap else {
            self.finish(stage)?;
            return Ok(None);
        };

        let destination = self
            .record
            .container_path
            .join(STAGING_DIR)
            .join(file.relative_path());
        let ctx = DepotContext::for_manifest(self.record.app_id, manifest);
        let (tx, rx) = progress_channel::<ByteProgress>();
        let tokens = &self.pipeline.tokens;
        let engine = &self.pipeline.engine;
        let cancel = &self.cancel;
        let target = destination.as_path();

        let work = async move {
            let token = tokens.get_token(ctx.app_id).await?;
            let report = engine
                .download_file(&ctx, file, target, &token, &tx, cancel)
                .await?;
            Ok::<_, PipelineError>(report)
        };
        let report = self
            .pipeline
            .run_stage(stage, &mut self.reporter, cancel, rx, |p| p.fraction(), work)
            .await?;

        tracing::info!(
            file = %file.filename,
            outcome = ?report.outcome,
            bytes = report.bytes_fetched,
            "Bootstrap fetched"
        );
        self.finish(stage)?;
        Ok(Some(destination))
    }

    async fn unpack(&mut self, staged: Option<PathBuf>) -> PipelineResult<Option<ExtractSummary>> {
        let stage = PipelineStage::Unpacking;
        self.begin(stage).await?;

        let request = self.request;
        let (Some(path), Some(source)) = (staged, &request.bootstrap) else {
            self.finish(stage)?;
            return Ok(None);
        };

        let mut archive = BootstrapArchive::new(path);
        if let Some(entry) = &source.nested_entry {
            archive = archive.with_nested_entry(entry.clone());
        }
        let destination = self.record.container_path.join(&source.extract_to);
        let (tx, rx) = progress_channel::<ExtractProgress>();
        let extractor = &self.pipeline.extractor;
        let cancel = &self.cancel;

        let work = async move {
            extractor
                .extract(&archive, &destination, &tx, cancel)
                .await
                .map_err(PipelineError::from)
        };
        let summary = self
            .pipeline
            .run_stage(stage, &mut self.reporter, cancel, rx, |p| p.fraction(), work)
            .await?;

        self.finish(stage)?;
        Ok(Some(summary))
    }

    async fn fetch_content(&mut self, manifest: &DepotManifest) -> PipelineResult<DownloadSummary> {
        let stage = PipelineStage::FetchingContent;
        self.begin(stage).await?;

        let ctx = DepotContext::for_manifest(self.record.app_id, manifest);
        let destination = self.record.container_path.join(&self.request.install_dir);
        let (tx, rx) = progress_channel::<ByteProgress>();
        let engine = &self.pipeline.engine;
        let cancel = &self.cancel;
        let bytes = &mut self.content_progress;

        let work = async move {
            engine
                .download_manifest(&ctx, manifest, &destination, &tx, cancel)
                .await
                .map_err(PipelineError::from)
        };
        let summary = self
            .pipeline
            .run_stage(
                stage,
                &mut self.reporter,
                cancel,
                rx,
                |p: ByteProgress| {
                    *bytes = Some((p.bytes_transferred, p.total_bytes));
                    p.fraction()
                },
                work,
            )
            .await?;

        self.content_progress = Some((summary.total_bytes, summary.total_bytes));
        self.finish(stage)?;
        Ok(summary)
    }

    async fn verify(&mut self) -> PipelineResult<()> {
        let stage = PipelineStage::Verifying;
        self.begin(stage).await?;

        let (tx, rx) = progress_channel::<f64>();
        let validator = &self.pipeline.validator;
        let record = &self.record;
        let work = async move {
            let report = validator.validate(record).await;
            emit(&tx, 0.5);
            Ok::<_, PipelineError>(report)
        };
        let report = self
            .pipeline
            .run_stage(stage, &mut self.reporter, &self.cancel, rx, |p| p, work)
            .await?;
        if !report.is_valid() {
            return Err(PipelineError::ValidationFailed(report));
        }

        let (done, total) = self.content_progress.unwrap_or((0, 0));
        let update = RecordUpdate {
            status: Some(InstallationStatus::Installed),
            progress: Some((done, total)),
            error_message: Some(None),
        };
        self.record = self.pipeline.records.apply(&self.record.id, &update).await?;

        self.finish(stage)?;
        Ok(())
    }

    async fn begin(&mut self, stage: PipelineStage) -> PipelineResult<()> {
        debug_assert_eq!(self.machine.current_stage(), Some(stage));
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }

        let status = stage.status();
        if self.record.status != status {
            self.record = self
                .pipeline
                .records
                .apply(&self.record.id, &RecordUpdate::status(status).clear_error())
                .await?;
        }

        tracing::info!(record_id = %self.record.id, stage = %stage, "Stage started");
        self.stage_started = Instant::now();
        self.reporter.started(stage);
        Ok(())
    }

    fn finish(&mut self, stage: PipelineStage) -> PipelineResult<()> {
        let elapsed = self.stage_started.elapsed();
        record_stage_duration(stage.as_str(), elapsed);
        tracing::debug!(stage = %stage, ?elapsed, "Stage completed");

        self.reporter.completed(stage);
        self.machine.transition(PipelineTransition::Advance)?;
        Ok(())
    }

    /// Record the failure; never fails itself
    async fn fail(&mut self, error: &PipelineError) {
        let stage = self
            .machine
            .current_stage()
            .unwrap_or(PipelineStage::Initializing);
        let reason = error.to_string();
        let kind = error.kind();

        if let Err(e) = self.machine.transition(PipelineTransition::Fail(reason.clone())) {
            tracing::debug!("Failure after terminal state: {}", e);
        }

        let status = if error.is_cancelled() {
            InstallationStatus::UpdatePaused
        } else {
            InstallationStatus::ValidationFailed
        };
        let update = RecordUpdate {
            status: Some(status),
            progress: self.content_progress,
            error_message: Some(Some(reason.clone())),
        };
        match self.pipeline.records.apply(&self.record.id, &update).await {
            Ok(record) => self.record = record,
            Err(e) => tracing::error!(
                record_id = %self.record.id,
                "Failed to persist install failure: {}",
                e
            ),
        }

        tracing::warn!(
            record_id = %self.record.id,
            stage = %stage,
            kind = %kind,
            "Installation failed: {}",
            reason
        );
        emit(
            &self.reporter.events,
            PipelineEvent::Failed {
                stage,
                kind,
                reason,
            },
        );
    }
}
