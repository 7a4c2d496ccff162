//! Build push pipeline.
//!
//! This crate holds the **coordination logic** of a push. It has no UI:
//! the CLI provides a [`BuildApi`] implementation (normally
//! [`buildpush_api::Client`]) and renders the [`PushEvent`]s.
//!
//! # Pipeline
//!
//! 1. **Scan**: walk the build directory or zip (runs in the background)
//! 2. **Build**: parse `target:channel`, authenticate, register the build
//! 3. **Baseline**: fetch the previous build's signature, if any
//! 4. **Sessions**: register patch + signature files, open two upload sessions
//! 5. **Diff + upload**: stream the patch and signature into their sessions
//! 6. **Finalize**: declare both files with their uploaded sizes

pub mod baseline;
pub mod error;
pub mod files;
pub mod pipeline;
pub mod remote;
pub mod scanner;
pub mod spec;
mod tasks;
pub mod types;

#[cfg(test)]
mod mock;

// Re-export primary types for convenience.
pub use baseline::{Baseline, resolve_baseline};
pub use error::{PushError, Stage};
pub use files::{PushSessions, UploadTarget, init_sessions};
pub use pipeline::Pusher;
pub use remote::BuildApi;
pub use scanner::{PathFilter, ScanResult, default_filter, scan_source};
pub use spec::parse_spec;
pub use types::{BuildTarget, PushConfig, PushEvent, PushRequest, PushState, PushSummary};
