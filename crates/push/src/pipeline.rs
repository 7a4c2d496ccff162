//! Push orchestrator.
//!
//! Runs one push end to end, emits state and progress events, and supports
//! cancellation. The source scan runs in the background while the build is
//! registered; the diff engine then streams straight into the two upload
//! sinks, so neither output is ever held whole.

use std::future::Future;
use std::sync::Arc;

use buildpush_delta::{ContainerStats, DeltaError, DiffContext, DiffStats};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use buildpush_protocol::BuildFileKind;
use buildpush_transfer::progress::{ProgressFeeds, spawn_tracker};
use buildpush_transfer::{TransferError, UploadSink, spawn_sink, upload_client};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::baseline::{Baseline, resolve_baseline};
use crate::error::{PushError, Stage, StageExt};
use crate::files::{PushSessions, init_sessions};
use crate::remote::BuildApi;
use crate::scanner::{ScanResult, scan_source};
use crate::tasks::join_all_or_cancel;
use crate::types::{BuildTarget, PushConfig, PushEvent, PushRequest, PushState, PushSummary};

/// Sizes and totals of a finished upload phase.
struct Uploaded {
    stats: DiffStats,
    source_size: u64,
    source_stats: ContainerStats,
    patch_size: u64,
    signature_size: u64,
}

/// Orchestrates a build push.
pub struct Pusher {
    config: PushConfig,
    http: reqwest::Client,
    events_tx: mpsc::Sender<PushEvent>,
    events_rx: Option<mpsc::Receiver<PushEvent>>,
    cancel: CancellationToken,
}

impl Pusher {
    /// Creates a new pusher with its own upload client.
    pub fn new(config: PushConfig) -> Result<Self, PushError> {
        Ok(Self::with_http(config, upload_client()?))
    }

    /// Creates a pusher uploading through `http`, which must not follow
    /// redirects.
    pub fn with_http(config: PushConfig, http: reqwest::Client) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            http,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<PushEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this pusher.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pushes a build.
    ///
    /// Succeeds only once both the patch and the signature are uploaded and
    /// finalized. Errors carry the [`Stage`] they happened in; the first one
    /// wins and stops every other task of the push.
    pub async fn push(
        &self,
        api: Arc<dyn BuildApi>,
        request: PushRequest,
    ) -> Result<PushSummary, PushError> {
        let cancel = self.cancel.child_token();
        let result = self.run(api, &request, &cancel).await;
        cancel.cancel();

        match result {
            Ok(summary) => {
                info!(
                    build_id = summary.build_id,
                    patch_bytes = summary.patch_size,
                    fresh_bytes = summary.fresh_bytes,
                    reused_bytes = summary.reused_bytes,
                    "push completed"
                );
                self.emit(PushEvent::Completed(summary.clone()));
                Ok(summary)
            }
            Err(e) => {
                error!(stage = ?e.stage(), error = %e, "push failed");
                self.emit(PushEvent::State(PushState::Aborted));
                self.emit(PushEvent::Failed {
                    stage: e.stage(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        api: Arc<dyn BuildApi>,
        request: &PushRequest,
        cancel: &CancellationToken,
    ) -> Result<PushSummary, PushError> {
        // Walk the source while talking to the service.
        self.set_state(PushState::ScanningSource);
        let scan = {
            let path = request.path.clone();
            let filter = self.config.filter;
            let fix_permissions = request.fix_permissions;
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || scan_source(&path, filter, fix_permissions, &cancel))
        };

        let target =
            BuildTarget::parse(&request.spec, &request.user_version).at(Stage::ParseSpec)?;
        self.set_state(PushState::SpecParsed);

        self.set_state(PushState::Authenticating);
        until_cancelled(cancel, async {
            api.authenticate()
                .await
                .map_err(PushError::remote("authenticate"))
        })
        .await
        .at(Stage::Authenticate)?;

        let build = until_cancelled(cancel, async {
            api.create_build(&target.target, &target.channel, &target.user_version)
                .await
                .map_err(PushError::remote("create build"))
        })
        .await
        .at(Stage::CreateBuild)?;
        info!(
            build_id = build.id,
            parent_build_id = build.parent_build_id,
            channel = %target.channel,
            "build created"
        );
        self.set_state(PushState::BuildCreated);

        let baseline = until_cancelled(cancel, resolve_baseline(api.as_ref(), build.parent_build_id))
            .await
            .at(Stage::ResolveBaseline)?;
        self.set_state(PushState::BaselineResolved);

        let sessions = init_sessions(Arc::clone(&api), &self.http, build.id, cancel)
            .await
            .at(Stage::InitSessions)?;
        self.set_state(PushState::SessionsInitialized);

        // Diffing needs the source now.
        let source = until_cancelled(cancel, async { scan.await? })
            .await
            .at(Stage::ScanSource)?;
        let stats = source.container.stats();
        info!(
            files = stats.files,
            dirs = stats.dirs,
            symlinks = stats.symlinks,
            bytes = source.container.size(),
            "source scanned"
        );

        self.set_state(PushState::Uploading);
        let uploaded = self
            .diff_and_upload(source, baseline, &sessions, cancel)
            .await?;
        self.set_state(PushState::AllUploadsClosed);

        finalize_files(api, build.id, &sessions, &uploaded, cancel)
            .await
            .at(Stage::FinalizeFiles)?;
        self.set_state(PushState::AllFilesFinalized);
        self.set_state(PushState::Done);

        Ok(PushSummary {
            build_id: build.id,
            parent_build_id: build.parent_build_id,
            source_size: uploaded.source_size,
            source_stats: uploaded.source_stats,
            patch_size: uploaded.patch_size,
            signature_size: uploaded.signature_size,
            fresh_bytes: uploaded.stats.fresh_bytes,
            reused_bytes: uploaded.stats.reused_bytes,
        })
    }

    /// Streams the patch and signature into their sessions and waits for
    /// both uploads to close. Progress is tracked for this phase only.
    async fn diff_and_upload(
        &self,
        source: ScanResult,
        baseline: Baseline,
        sessions: &PushSessions,
        cancel: &CancellationToken,
    ) -> Result<Uploaded, PushError> {
        let ScanResult {
            container,
            mut pool,
        } = source;
        let source_size = container.size();
        let source_stats = container.stats();

        let (patch_writer, patch_sink) = spawn_sink(
            self.http.clone(),
            sessions.patch.session.clone(),
            self.config.sink.clone(),
            cancel.clone(),
        );
        let (signature_writer, signature_sink) = spawn_sink(
            self.http.clone(),
            sessions.signature.session.clone(),
            self.config.sink.clone(),
            cancel.clone(),
        );

        let (read_tx, read_rx) = watch::channel(0u64);
        let stop = cancel.child_token();
        let events = self.events_tx.clone();
        let tracker = spawn_tracker(
            source_size,
            ProgressFeeds {
                bytes_read: read_rx,
                patch_offered: patch_sink.offered(),
                patch_confirmed: patch_sink.confirmed(),
            },
            self.config.sample_interval,
            stop.clone(),
            move |snapshot| {
                let _ = events.try_send(PushEvent::Progress(snapshot.clone()));
            },
        );

        let engine = DiffContext::new(container, baseline.container, baseline.signature)
            .with_compression(self.config.compression);
        let engine_cancel = cancel.clone();
        let diff = tokio::task::spawn_blocking(move || -> Result<DiffStats, PushError> {
            let mut patch = patch_writer;
            let mut signature = signature_writer;
            let stats = engine.write_patch(
                pool.as_mut(),
                &mut patch,
                &mut signature,
                &engine_cancel,
                &mut |progress| {
                    read_tx.send_replace(progress.bytes_read);
                },
            )?;
            patch.close().map_err(DeltaError::from)?;
            signature.close().map_err(DeltaError::from)?;
            Ok(stats)
        });

        let mut diff = diff;
        let mut closing: FuturesUnordered<_> = [
            wait_upload(BuildFileKind::Patch, patch_sink),
            wait_upload(BuildFileKind::Signature, signature_sink),
        ]
        .into_iter()
        .collect();
        let mut closed = Vec::with_capacity(2);

        // A sink that fails mid-stream stops the engine at its next block.
        let diffed = loop {
            tokio::select! {
                joined = &mut diff => break joined.map_err(PushError::from).and_then(|r| r),
                Some(joined) = closing.next() => match joined.map_err(PushError::from).and_then(|r| r) {
                    Ok(done) => closed.push(done),
                    // The writer went away: the engine's own error follows.
                    Err(PushError::Upload(TransferError::Aborted)) => {}
                    Err(e) => {
                        cancel.cancel();
                        let _ = diff.await;
                        let _ = tracker.await;
                        return Err(e.at(Stage::DiffUpload));
                    }
                },
            }
        };

        let stats = match diffed {
            Ok(stats) => stats,
            Err(e) => {
                cancel.cancel();
                let _ = tracker.await;
                let e = upload_failure_or(e, closing).await;
                return Err(e.at(Stage::DiffUpload));
            }
        };
        debug!(
            fresh_bytes = stats.fresh_bytes,
            reused_bytes = stats.reused_bytes,
            "diff finished, waiting for uploads"
        );

        let rest = join_all_or_cancel(closing.into_iter().collect(), cancel).await;
        stop.cancel();
        let last = tracker.await;

        closed.extend(rest.at(Stage::CloseUploads)?);
        let mut patch_size = 0;
        let mut signature_size = 0;
        for (kind, size) in closed {
            match kind {
                BuildFileKind::Signature => signature_size = size,
                _ => patch_size = size,
            }
        }

        let last = last.at(Stage::CloseUploads)?;
        debug!(
            confirmed = last.confirmed,
            conservative_total = last.conservative_total,
            "uploads closed"
        );
        self.emit(PushEvent::Progress(last));

        Ok(Uploaded {
            stats,
            source_size,
            source_stats,
            patch_size,
            signature_size,
        })
    }

    fn set_state(&self, state: PushState) {
        debug!(state = state.label(), "push state");
        self.emit(PushEvent::State(state));
    }

    /// Events are dropped rather than stall the push when nobody drains them.
    fn emit(&self, event: PushEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, PushError>
where
    F: Future<Output = Result<T, PushError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PushError::Cancelled),
        result = fut => result,
    }
}

fn wait_upload(
    kind: BuildFileKind,
    sink: UploadSink,
) -> JoinHandle<Result<(BuildFileKind, u64), PushError>> {
    tokio::spawn(async move {
        let size = sink.wait().await?;
        debug!(%kind, size, "upload closed");
        Ok::<_, PushError>((kind, size))
    })
}

/// A failed sink explains a broken stream better than the engine's write
/// error does, so it takes precedence.
async fn upload_failure_or(
    engine_error: PushError,
    mut closing: FuturesUnordered<JoinHandle<Result<(BuildFileKind, u64), PushError>>>,
) -> PushError {
    while let Some(joined) = closing.next().await {
        match joined.map_err(PushError::from).and_then(|r| r) {
            Ok(_) | Err(PushError::Cancelled) | Err(PushError::Upload(TransferError::Aborted)) => {}
            Err(e) => return e,
        }
    }
    engine_error
}

/// Declares both files with their uploaded sizes, in parallel.
async fn finalize_files(
    api: Arc<dyn BuildApi>,
    build_id: i64,
    sessions: &PushSessions,
    uploaded: &Uploaded,
    cancel: &CancellationToken,
) -> Result<(), PushError> {
    let files = [
        (BuildFileKind::Patch, sessions.patch.file.id, uploaded.patch_size),
        (
            BuildFileKind::Signature,
            sessions.signature.file.id,
            uploaded.signature_size,
        ),
    ];

    let tasks: Vec<_> = files
        .into_iter()
        .map(|(kind, file_id, size)| {
            let api = Arc::clone(&api);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let finalized = tokio::select! {
                    _ = cancel.cancelled() => Err(PushError::Cancelled),
                    result = api.finalize_build_file(build_id, file_id, size as i64) => {
                        result.map_err(|source| PushError::Finalize { kind, source })
                    }
                };
                finalized?;
                debug!(%kind, file_id, size, "build file finalized");
                Ok::<_, PushError>(())
            })
        })
        .collect();

    join_all_or_cancel(tasks, cancel).await?;
    Ok(())
}
