//! Patch and signature build files and their upload sessions.

use std::sync::Arc;

use buildpush_protocol::{BuildFile, BuildFileKind, BuildFileSubType, UploadType};
use buildpush_transfer::{UploadSession, bootstrap_session};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PushError;
use crate::remote::BuildApi;
use crate::tasks::join_all_or_cancel;

/// A registered build file with its open upload session.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub file: BuildFile,
    pub session: UploadSession,
}

/// The two files every push uploads.
#[derive(Debug, Clone)]
pub struct PushSessions {
    pub patch: UploadTarget,
    pub signature: UploadTarget,
}

/// Registers the patch and signature files of `build_id` and opens a
/// resumable upload session for each, both at once.
///
/// The first failure cancels the other side and fails the whole step.
pub async fn init_sessions(
    api: Arc<dyn BuildApi>,
    http: &reqwest::Client,
    build_id: i64,
    cancel: &CancellationToken,
) -> Result<PushSessions, PushError> {
    let tasks: Vec<_> = [BuildFileKind::Patch, BuildFileKind::Signature]
        .into_iter()
        .map(|kind| {
            let api = Arc::clone(&api);
            let http = http.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let target = init_session(api.as_ref(), &http, build_id, kind, &cancel).await?;
                Ok::<_, PushError>((kind, target))
            })
        })
        .collect();

    let mut patch = None;
    let mut signature = None;
    for (kind, target) in join_all_or_cancel(tasks, cancel).await? {
        match kind {
            BuildFileKind::Signature => signature = Some(target),
            _ => patch = Some(target),
        }
    }

    match (patch, signature) {
        (Some(patch), Some(signature)) => Ok(PushSessions { patch, signature }),
        _ => Err(PushError::Task("upload session initialization incomplete".into())),
    }
}

async fn init_session(
    api: &dyn BuildApi,
    http: &reqwest::Client,
    build_id: i64,
    kind: BuildFileKind,
    cancel: &CancellationToken,
) -> Result<UploadTarget, PushError> {
    let file = tokio::select! {
        _ = cancel.cancelled() => return Err(PushError::Cancelled),
        file = api.create_build_file(
            build_id,
            kind,
            BuildFileSubType::Default,
            UploadType::DeferredResumable,
        ) => file.map_err(PushError::remote("create build file"))?,
    };
    debug!(%kind, file_id = file.id, "build file created");

    let session = bootstrap_session(http, &file.upload_url, &file.upload_headers, cancel)
        .await
        .map_err(|source| match source {
            buildpush_transfer::TransferError::Cancelled => PushError::Cancelled,
            source => PushError::SessionBootstrap { kind, source },
        })?;
    debug!(%kind, location = %session.location, "resumable upload session started");

    Ok(UploadTarget { file, session })
}
