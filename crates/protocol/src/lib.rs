pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use types::{
    Build, BuildFile, BuildFileKind, BuildFileState, BuildFileSubType, BuildState, UploadType,
};
