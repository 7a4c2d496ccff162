use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A build registered on a channel.
///
/// `parent_build_id == 0` means this is the first build pushed to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    #[serde(default)]
    pub parent_build_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BuildState>,
}

impl Build {
    /// Returns `true` if no earlier build exists on the channel.
    pub fn is_first_push(&self) -> bool {
        self.parent_build_id == 0
    }
}

/// Processing state of a build on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Started,
    Processing,
    Completed,
    Failed,
}

/// Kind of file attached to a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildFileKind {
    Patch,
    Signature,
    Archive,
    Manifest,
    Unpacked,
}

impl BuildFileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::Signature => "signature",
            Self::Archive => "archive",
            Self::Manifest => "manifest",
            Self::Unpacked => "unpacked",
        }
    }
}

impl fmt::Display for BuildFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant of a build file (the pipeline only produces `Default`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildFileSubType {
    #[default]
    Default,
    Gzip,
    Optimized,
}

/// How the content of a new build file will be transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    Multipart,
    Resumable,
    DeferredResumable,
}

/// Lifecycle of a build file on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildFileState {
    Created,
    Uploading,
    Uploaded,
    Failed,
}

/// A file attached to a build.
///
/// `upload_url` and `upload_headers` are only present in the response to
/// file creation; listings leave them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildFile {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: BuildFileKind,
    #[serde(default)]
    pub sub_type: BuildFileSubType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BuildFileState>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upload_url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub upload_headers: HashMap<String, String>,
}
