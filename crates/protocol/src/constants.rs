/// Default base URL of the build service API.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Granularity of resumable upload chunks (256 KiB).
///
/// Every non-final chunk sent to a resumable session must be a multiple of
/// this size.
pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Default number of [`UPLOAD_CHUNK_SIZE`] chunks sent per request (16 MiB).
pub const DEFAULT_MAX_CHUNK_GROUP: usize = 64;

