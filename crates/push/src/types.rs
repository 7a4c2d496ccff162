//! Data types for the push pipeline.

use std::path::PathBuf;
use std::time::Duration;

use buildpush_delta::{CompressionSettings, ContainerStats};
use buildpush_transfer::progress::SAMPLE_INTERVAL;
use buildpush_transfer::{ProgressSnapshot, SinkConfig};

use crate::error::Stage;
use crate::scanner::{PathFilter, default_filter};

/// Where a build goes: `target:channel` plus the user's version label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Project identifier, e.g. `user/page`.
    pub target: String,
    pub channel: String,
    pub user_version: String,
}

/// What to push.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Build directory or zip archive.
    pub path: PathBuf,
    /// `target:channel`.
    pub spec: String,
    pub user_version: String,
    /// Restore lost executable bits before diffing.
    pub fix_permissions: bool,
}

/// Config passed to the [`Pusher`](crate::Pusher).
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub sink: SinkConfig,
    pub compression: CompressionSettings,
    /// Throughput sampling interval of the progress tracker.
    pub sample_interval: Duration,
    /// Decides which source paths are part of the build.
    pub filter: PathFilter,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            compression: CompressionSettings::default(),
            sample_interval: SAMPLE_INTERVAL,
            filter: default_filter,
        }
    }
}

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    ScanningSource,
    SpecParsed,
    Authenticating,
    BuildCreated,
    BaselineResolved,
    SessionsInitialized,
    Uploading,
    AllUploadsClosed,
    AllFilesFinalized,
    Done,
    Aborted,
}

impl PushState {
    /// Short human label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ScanningSource => "scanning source",
            Self::SpecParsed => "spec parsed",
            Self::Authenticating => "authenticating",
            Self::BuildCreated => "build created",
            Self::BaselineResolved => "baseline resolved",
            Self::SessionsInitialized => "upload sessions ready",
            Self::Uploading => "diffing and uploading",
            Self::AllUploadsClosed => "uploads closed",
            Self::AllFilesFinalized => "build files finalized",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

/// Event emitted during a push.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// The pipeline entered a new state.
    State(PushState),
    /// Progress recomputed.
    Progress(ProgressSnapshot),
    /// The push succeeded.
    Completed(PushSummary),
    /// The push failed.
    Failed { stage: Option<Stage>, error: String },
}

/// Outcome of a successful push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushSummary {
    pub build_id: i64,
    pub parent_build_id: i64,
    pub source_size: u64,
    pub source_stats: ContainerStats,
    /// Uploaded (and declared) patch size.
    pub patch_size: u64,
    pub signature_size: u64,
    pub fresh_bytes: u64,
    pub reused_bytes: u64,
}

impl PushSummary {
    /// Share of the new build satisfied from the old one, in percent.
    pub fn reuse_percent(&self) -> f64 {
        let total = self.fresh_bytes + self.reused_bytes;
        if total == 0 {
            return 0.0;
        }
        100.0 * self.reused_bytes as f64 / total as f64
    }

    /// How much smaller the patch is than the build, in percent.
    ///
    /// `None` when the patch saves nothing.
    pub fn savings_percent(&self) -> Option<f64> {
        if self.source_size == 0 {
            return None;
        }
        let savings = 100.0 - 100.0 * self.patch_size as f64 / self.source_size as f64;
        (savings > 0.0).then_some(savings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(patch_size: u64, fresh: u64, reused: u64) -> PushSummary {
        PushSummary {
            build_id: 2,
            parent_build_id: 1,
            source_size: 1000,
            source_stats: ContainerStats::default(),
            patch_size,
            signature_size: 10,
            fresh_bytes: fresh,
            reused_bytes: reused,
        }
    }

    #[test]
    fn reuse_percent() {
        assert_eq!(summary(100, 250, 750).reuse_percent(), 75.0);
        assert_eq!(summary(100, 0, 0).reuse_percent(), 0.0);
    }

    #[test]
    fn savings_percent() {
        assert_eq!(summary(100, 0, 0).savings_percent(), Some(90.0));
        assert_eq!(summary(1000, 0, 0).savings_percent(), None);
        assert_eq!(summary(1200, 0, 0).savings_percent(), None);

        let empty = PushSummary {
            source_size: 0,
            ..summary(50, 0, 0)
        };
        assert_eq!(empty.savings_percent(), None);
    }
}
