use buildpush_protocol::constants::UPLOAD_CHUNK_SIZE;

use crate::TransferError;

/// Bytes sent per non-final request for a chunk group of `max_chunk_group`.
///
/// Always a non-zero multiple of [`UPLOAD_CHUNK_SIZE`].
pub fn group_size(max_chunk_group: usize) -> usize {
    max_chunk_group.max(1) * UPLOAD_CHUNK_SIZE
}

/// Formats a `Content-Range` header value.
///
/// - `len == 0` with a known total: `bytes */total` (finalize only)
/// - unknown total: `bytes a-b/*`
/// - known total: `bytes a-b/total`
pub fn content_range(offset: u64, len: usize, total: Option<u64>) -> String {
    match (len, total) {
        (0, Some(total)) => format!("bytes */{total}"),
        (0, None) => "bytes */*".to_string(),
        (len, total) => {
            let last = offset + len as u64 - 1;
            match total {
                Some(total) => format!("bytes {offset}-{last}/{total}"),
                None => format!("bytes {offset}-{last}/*"),
            }
        }
    }
}

/// Parses a `Range: bytes=0-n` confirmation into the number of bytes the
/// server holds (`n + 1`).
pub fn parse_range_header(value: &str) -> Result<u64, TransferError> {
    let invalid = || TransferError::InvalidRange(value.to_string());

    let range = value.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = range.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if start != 0 || end < start {
        return Err(invalid());
    }
    Ok(end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_size_is_chunk_multiple() {
        assert_eq!(group_size(4), 4 * UPLOAD_CHUNK_SIZE);
        assert_eq!(group_size(0), UPLOAD_CHUNK_SIZE);
    }

    #[test]
    fn content_range_forms() {
        assert_eq!(content_range(0, 262_144, None), "bytes 0-262143/*");
        assert_eq!(content_range(262_144, 10, Some(262_154)), "bytes 262144-262153/262154");
        assert_eq!(content_range(100, 0, Some(100)), "bytes */100");
        assert_eq!(content_range(0, 0, None), "bytes */*");
    }

    #[test]
    fn parse_range_confirmation() {
        assert_eq!(parse_range_header("bytes=0-262143").unwrap(), 262_144);
        assert_eq!(parse_range_header("bytes=0-0").unwrap(), 1);
    }

    #[test]
    fn parse_range_rejects_garbage() {
        assert!(parse_range_header("0-100").is_err());
        assert!(parse_range_header("bytes=10-100").is_err());
        assert!(parse_range_header("bytes=0-").is_err());
        assert!(parse_range_header("bytes=abc").is_err());
    }
}
