//! Remote build service seen by the pipeline.
//!
//! `BuildApi` is implemented by [`buildpush_api::Client`]. Using a trait keeps
//! the pipeline decoupled from HTTP and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use buildpush_api::Error as ApiError;
use buildpush_protocol::{Build, BuildFile, BuildFileKind, BuildFileSubType, UploadType};

/// Abstract connection to the build service.
pub trait BuildApi: Send + Sync {
    /// Checks the credentials before any build is created.
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;

    /// Registers a new build on `target:channel`.
    fn create_build<'a>(
        &'a self,
        target: &'a str,
        channel: &'a str,
        user_version: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Build, ApiError>> + Send + 'a>>;

    fn list_build_files(
        &self,
        build_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BuildFile>, ApiError>> + Send + '_>>;

    fn download_build_file(
        &self,
        build_id: i64,
        file_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApiError>> + Send + '_>>;

    /// Registers a file on a build; the response carries its upload URL.
    fn create_build_file(
        &self,
        build_id: i64,
        kind: BuildFileKind,
        sub_type: BuildFileSubType,
        upload_type: UploadType,
    ) -> Pin<Box<dyn Future<Output = Result<BuildFile, ApiError>> + Send + '_>>;

    fn finalize_build_file(
        &self,
        build_id: i64,
        file_id: i64,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;
}

impl BuildApi for buildpush_api::Client {
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        Box::pin(async move { self.credentials_info().await.map(|_| ()) })
    }

    fn create_build<'a>(
        &'a self,
        target: &'a str,
        channel: &'a str,
        user_version: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Build, ApiError>> + Send + 'a>> {
        Box::pin(buildpush_api::Client::create_build(
            self,
            target,
            channel,
            user_version,
        ))
    }

    fn list_build_files(
        &self,
        build_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BuildFile>, ApiError>> + Send + '_>> {
        Box::pin(buildpush_api::Client::list_build_files(self, build_id))
    }

    fn download_build_file(
        &self,
        build_id: i64,
        file_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApiError>> + Send + '_>> {
        Box::pin(buildpush_api::Client::download_build_file(
            self, build_id, file_id,
        ))
    }

    fn create_build_file(
        &self,
        build_id: i64,
        kind: BuildFileKind,
        sub_type: BuildFileSubType,
        upload_type: UploadType,
    ) -> Pin<Box<dyn Future<Output = Result<BuildFile, ApiError>> + Send + '_>> {
        Box::pin(buildpush_api::Client::create_build_file(
            self,
            build_id,
            kind,
            sub_type,
            upload_type,
        ))
    }

    fn finalize_build_file(
        &self,
        build_id: i64,
        file_id: i64,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        Box::pin(buildpush_api::Client::finalize_build_file(
            self, build_id, file_id, size,
        ))
    }
}
