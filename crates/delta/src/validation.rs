use crate::DeltaError;

/// Validates a container entry path.
///
/// Entry paths are relative and `/`-separated regardless of platform, so
/// this works on the string rather than on [`std::path::Path`], which would
/// treat `\` and drive letters differently per OS.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (`/etc`, `\\server`, `C:/...`)
/// - Parent directory traversal (`..`), with either separator
pub fn validate_entry_path(path: &str) -> Result<(), DeltaError> {
    if path.is_empty() {
        return Err(DeltaError::InvalidPath("empty path".into()));
    }

    if path.starts_with('/') || path.starts_with('\\') {
        return Err(DeltaError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(DeltaError::InvalidPath(format!(
            "path prefix not allowed: {path}"
        )));
    }

    if path.split(['/', '\\']).any(|component| component == "..") {
        return Err(DeltaError::InvalidPath(format!(
            "parent directory traversal not allowed: {path}"
        )));
    }

    Ok(())
}
