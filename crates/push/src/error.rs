//! Push error types.

use std::fmt;
use std::path::PathBuf;

use buildpush_delta::DeltaError;
use buildpush_protocol::BuildFileKind;
use buildpush_transfer::TransferError;

/// Errors produced during a push.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("invalid spec: {0}")]
    Spec(String),

    #[error("could not find signature for parent build {parent_build_id}, aborting")]
    BaselineUnavailable { parent_build_id: i64 },

    #[error("{call}: {source}")]
    Remote {
        call: &'static str,
        #[source]
        source: buildpush_api::Error,
    },

    #[error("could not create resumable upload session for {kind}: {source}")]
    SessionBootstrap {
        kind: BuildFileKind,
        #[source]
        source: TransferError,
    },

    #[error("upload failed: {0}")]
    Upload(TransferError),

    #[error("could not finalize {kind} file: {source}")]
    Finalize {
        kind: BuildFileKind,
        #[source]
        source: buildpush_api::Error,
    },

    #[error("could not scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: DeltaError,
    },

    #[error("delta error: {0}")]
    Delta(DeltaError),

    #[error("cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    Task(String),

    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PushError>,
    },
}

impl PushError {
    /// Wraps the error with the stage it happened in. Already staged errors
    /// keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            staged @ Self::Stage { .. } => staged,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error happened in, if recorded.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error without its stage wrapper.
    pub fn root(&self) -> &PushError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    pub(crate) fn remote(call: &'static str) -> impl FnOnce(buildpush_api::Error) -> Self {
        move |source| Self::Remote { call, source }
    }
}

impl From<DeltaError> for PushError {
    fn from(e: DeltaError) -> Self {
        match e {
            DeltaError::Cancelled => Self::Cancelled,
            other => Self::Delta(other),
        }
    }
}

impl From<TransferError> for PushError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => Self::Cancelled,
            other => Self::Upload(other),
        }
    }
}

impl From<tokio::task::JoinError> for PushError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Attaches a [`Stage`] to the error of a result.
pub trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T, PushError>;
}

impl<T, E: Into<PushError>> StageExt<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, PushError> {
        self.map_err(|e| PushError::at(e.into(), stage))
    }
}

/// Pipeline step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ScanSource,
    ParseSpec,
    Authenticate,
    CreateBuild,
    ResolveBaseline,
    InitSessions,
    DiffUpload,
    CloseUploads,
    FinalizeFiles,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanSource => "scanning source",
            Self::ParseSpec => "parsing spec",
            Self::Authenticate => "authenticating",
            Self::CreateBuild => "creating build",
            Self::ResolveBaseline => "resolving baseline",
            Self::InitSessions => "initializing upload sessions",
            Self::DiffUpload => "diffing and uploading",
            Self::CloseUploads => "closing uploads",
            Self::FinalizeFiles => "finalizing build files",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
