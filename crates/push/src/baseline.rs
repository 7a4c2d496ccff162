//! The previous build a push is diffed against.

use buildpush_delta::{BlockHash, Container, read_signature};
use buildpush_protocol::BuildFileKind;
use tracing::info;

use crate::error::PushError;
use crate::remote::BuildApi;

/// Manifest and block signature of the channel's previous build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub container: Container,
    pub signature: Vec<BlockHash>,
}

impl Baseline {
    /// Baseline of a first push: nothing to reuse.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty() && self.signature.is_empty()
    }
}

/// Fetches the baseline for a build whose parent is `parent_build_id`.
///
/// A parent of `0` means a first push: the baseline is empty and the
/// service is not contacted. Otherwise the parent's signature file is
/// downloaded and decoded; a parent without one is
/// [`PushError::BaselineUnavailable`].
pub async fn resolve_baseline(
    api: &dyn BuildApi,
    parent_build_id: i64,
) -> Result<Baseline, PushError> {
    if parent_build_id == 0 {
        info!("pushing first build");
        return Ok(Baseline::empty());
    }

    info!(parent_build_id, "downloading signature of last build");
    let files = api
        .list_build_files(parent_build_id)
        .await
        .map_err(PushError::remote("list build files"))?;

    let signature_file = files
        .iter()
        .find(|f| f.kind == BuildFileKind::Signature)
        .ok_or(PushError::BaselineUnavailable { parent_build_id })?;

    let data = api
        .download_build_file(parent_build_id, signature_file.id)
        .await
        .map_err(PushError::remote("download signature"))?;

    let (container, signature) =
        tokio::task::spawn_blocking(move || read_signature(data.as_slice())).await??;

    info!(
        files = container.file_count(),
        blocks = signature.len(),
        "baseline signature decoded"
    );
    Ok(Baseline {
        container,
        signature,
    })
}
