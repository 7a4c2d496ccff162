//! Client for the build service REST API.
//!
//! Builds, their files, and the upload URLs those files are sent to are
//! all registered through this API; the file contents themselves travel
//! through resumable upload sessions (see `buildpush-transfer`).

pub mod client;

pub use client::{Client, Error};
