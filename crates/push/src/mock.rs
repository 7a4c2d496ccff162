//! In-memory build service for tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use buildpush_api::Error as ApiError;
use buildpush_protocol::{Build, BuildFile, BuildFileKind, BuildFileSubType, UploadType};

use crate::remote::BuildApi;

pub const BUILD_ID: i64 = 20;
pub const PATCH_FILE_ID: i64 = 200;
pub const SIGNATURE_FILE_ID: i64 = 201;
pub const PARENT_SIGNATURE_FILE_ID: i64 = 101;

fn api_error(body: &str) -> ApiError {
    ApiError::Api {
        status: 500,
        body: body.to_string(),
    }
}

pub struct MockApi {
    upload_url: String,
    parent_build_id: i64,
    /// Files of the parent build, with their content.
    parent_files: Vec<(BuildFile, Vec<u8>)>,
    fail_create: Option<BuildFileKind>,
    fail_finalize: Option<BuildFileKind>,
    stall_finalize: bool,
    calls: Mutex<Vec<String>>,
    finalized: Mutex<HashMap<i64, i64>>,
}

impl MockApi {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            parent_build_id: 0,
            parent_files: Vec::new(),
            fail_create: None,
            fail_finalize: None,
            stall_finalize: false,
            calls: Mutex::new(Vec::new()),
            finalized: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the channel's last build `parent_build_id`, with a signature
    /// file holding `signature` when given.
    pub fn with_parent(mut self, parent_build_id: i64, signature: Option<Vec<u8>>) -> Self {
        self.parent_build_id = parent_build_id;
        self.parent_files = vec![(file(100, BuildFileKind::Patch, ""), Vec::new())];
        if let Some(signature) = signature {
            self.parent_files.push((
                file(PARENT_SIGNATURE_FILE_ID, BuildFileKind::Signature, ""),
                signature,
            ));
        }
        self
    }

    pub fn failing_create(mut self, kind: BuildFileKind) -> Self {
        self.fail_create = Some(kind);
        self
    }

    pub fn failing_finalize(mut self, kind: BuildFileKind) -> Self {
        self.fail_finalize = Some(kind);
        self
    }

    /// Finalize calls never answer.
    pub fn stalling_finalize(mut self) -> Self {
        self.stall_finalize = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Declared sizes by file ID.
    pub fn finalized(&self) -> HashMap<i64, i64> {
        self.finalized.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn file(id: i64, kind: BuildFileKind, upload_url: &str) -> BuildFile {
    BuildFile {
        id,
        kind,
        sub_type: BuildFileSubType::Default,
        state: None,
        size: 0,
        upload_url: upload_url.to_string(),
        upload_headers: if upload_url.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("X-Goog-Resumable".to_string(), "start".to_string())])
        },
    }
}

impl BuildApi for MockApi {
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.record("authenticate".into());
            Ok(())
        })
    }

    fn create_build<'a>(
        &'a self,
        target: &'a str,
        channel: &'a str,
        user_version: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Build, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            self.record(format!("create_build {target}:{channel}"));
            Ok(Build {
                id: BUILD_ID,
                parent_build_id: self.parent_build_id,
                channel_name: channel.to_string(),
                user_version: user_version.to_string(),
                state: None,
            })
        })
    }

    fn list_build_files(
        &self,
        build_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BuildFile>, ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.record(format!("list_build_files {build_id}"));
            Ok(self.parent_files.iter().map(|(f, _)| f.clone()).collect())
        })
    }

    fn download_build_file(
        &self,
        build_id: i64,
        file_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.record(format!("download_build_file {build_id}/{file_id}"));
            self.parent_files
                .iter()
                .find(|(f, _)| f.id == file_id)
                .map(|(_, data)| data.clone())
                .ok_or_else(|| api_error("no such file"))
        })
    }

    fn create_build_file(
        &self,
        build_id: i64,
        kind: BuildFileKind,
        _sub_type: BuildFileSubType,
        upload_type: UploadType,
    ) -> Pin<Box<dyn Future<Output = Result<BuildFile, ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.record(format!("create_build_file {build_id} {kind}"));
            assert_eq!(upload_type, UploadType::DeferredResumable);
            if self.fail_create == Some(kind) {
                return Err(api_error("storage unavailable"));
            }
            let id = match kind {
                BuildFileKind::Signature => SIGNATURE_FILE_ID,
                _ => PATCH_FILE_ID,
            };
            Ok(file(id, kind, &self.upload_url))
        })
    }

    fn finalize_build_file(
        &self,
        build_id: i64,
        file_id: i64,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.record(format!("finalize_build_file {build_id}/{file_id}"));
            let kind = if file_id == SIGNATURE_FILE_ID {
                BuildFileKind::Signature
            } else {
                BuildFileKind::Patch
            };
            if self.fail_finalize == Some(kind) {
                return Err(api_error("finalize rejected"));
            }
            if self.stall_finalize {
                std::future::pending::<()>().await;
            }
            self.finalized.lock().unwrap().insert(file_id, size);
            Ok(())
        })
    }
}
