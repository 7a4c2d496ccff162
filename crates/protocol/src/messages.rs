use serde::{Deserialize, Serialize};

use crate::types::{Build, BuildFile, BuildFileKind, BuildFileSubType, UploadType};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Registers a new build on `target:channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBuildRequest {
    pub target: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_version: String,
}

/// Registers a new file on a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBuildFileRequest {
    #[serde(rename = "type")]
    pub kind: BuildFileKind,
    pub sub_type: BuildFileSubType,
    pub upload_type: UploadType,
}

/// Marks a build file as fully uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeBuildFileRequest {
    pub size: i64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Error list some endpoints return alongside a 2xx status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorsResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Describes the credentials the client authenticated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsInfoResponse {
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBuildResponse {
    pub build: Build,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBuildFilesResponse {
    #[serde(default)]
    pub files: Vec<BuildFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBuildFileResponse {
    pub file: BuildFile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeBuildFileResponse {}
