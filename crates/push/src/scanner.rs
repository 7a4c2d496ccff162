//! Source scanning.
//!
//! Turns a build directory or zip archive into a [`Container`] plus a
//! [`FilePool`] over its files. Relative paths use `/` as separator on every
//! platform.

use std::fmt;
use std::fs::{self, File};
use std::path::Path;

use buildpush_delta::container::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use buildpush_delta::{Container, DeltaError, DirPool, Entry, FilePool, ZipPool, validate_entry_path};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::ZipArchive;

use crate::error::PushError;

/// Decides from a file or directory name whether it belongs in the build.
pub type PathFilter = fn(&str) -> bool;

/// Names never pushed: VCS metadata and OS clutter.
const IGNORED_NAMES: &[&str] = &[".git", ".hg", ".svn", ".DS_Store", "__MACOSX", "Thumbs.db"];

/// Symlink file type in Unix mode bits.
const S_IFLNK: u32 = 0o120000;
const S_IFMT: u32 = 0o170000;

/// Keeps everything but [`IGNORED_NAMES`].
pub fn default_filter(name: &str) -> bool {
    !IGNORED_NAMES.contains(&name)
}

/// A scanned build.
pub struct ScanResult {
    pub container: Container,
    pub pool: Box<dyn FilePool>,
}

impl fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanResult")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

/// Scans a directory tree or a zip archive.
///
/// The root itself is not followed when it is a symlink: only a real
/// directory is walked, anything else is read as a zip archive. Ignored directories are pruned along with their content. With
/// `fix_permissions`, files that look executable get their `+x` back.
pub fn scan_source(
    path: &Path,
    filter: PathFilter,
    fix_permissions: bool,
    cancel: &CancellationToken,
) -> Result<ScanResult, PushError> {
    let scan_error = |source: DeltaError| PushError::Scan {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::symlink_metadata(path).map_err(|e| scan_error(e.into()))?;
    let mut result = if metadata.is_dir() {
        scan_dir(path, filter, cancel)?
    } else {
        scan_zip(path, filter).map_err(scan_error)?
    };

    if fix_permissions {
        let fixed = result
            .container
            .fix_permissions(result.pool.as_mut())
            .map_err(scan_error)?;
        debug!(fixed, "restored executable permissions");
    }

    let stats = result.container.stats();
    debug!(
        files = stats.files,
        dirs = stats.dirs,
        symlinks = stats.symlinks,
        total_bytes = result.container.size(),
        "scan complete"
    );
    Ok(result)
}

fn scan_dir(
    root: &Path,
    filter: PathFilter,
    cancel: &CancellationToken,
) -> Result<ScanResult, PushError> {
    let mut entries = Vec::new();
    walk_dir(root, root, filter, cancel, &mut entries).map_err(|source| match source {
        DeltaError::Cancelled => PushError::Cancelled,
        source => PushError::Scan {
            path: root.to_path_buf(),
            source,
        },
    })?;

    let container = Container::new(entries);
    let pool = DirPool::new(root, &container);
    Ok(ScanResult {
        container,
        pool: Box::new(pool),
    })
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: PathFilter,
    cancel: &CancellationToken,
    out: &mut Vec<Entry>,
) -> Result<(), DeltaError> {
    if cancel.is_cancelled() {
        return Err(DeltaError::Cancelled);
    }

    let mut children = fs::read_dir(current)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name();
        if !filter(&name.to_string_lossy()) {
            continue;
        }

        let path = child.path();
        let metadata = fs::symlink_metadata(&path)?;
        let rel = path.strip_prefix(root).map_err(std::io::Error::other)?;

        // Normalize to forward slashes.
        let rel = rel.to_string_lossy().replace('\\', "/");
        let mode = unix_mode(&metadata);

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            out.push(Entry::symlink(
                rel,
                target.to_string_lossy().replace('\\', "/"),
                mode.unwrap_or(DEFAULT_DIR_MODE),
            ));
        } else if metadata.is_dir() {
            out.push(Entry::dir(rel, mode.unwrap_or(DEFAULT_DIR_MODE)));
            walk_dir(root, &path, filter, cancel, out)?;
        } else if metadata.is_file() {
            out.push(Entry::file(
                rel,
                metadata.len(),
                mode.unwrap_or(DEFAULT_FILE_MODE),
            ));
        }
    }

    Ok(())
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

fn scan_zip(path: &Path, filter: PathFilter) -> Result<ScanResult, DeltaError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    // (entry, archive index for files)
    let mut found: Vec<(Entry, Option<usize>)> = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let name = file.name().to_string();
        let rel = name.trim_end_matches('/');
        if rel.is_empty() {
            continue;
        }
        validate_entry_path(rel)?;
        if !rel.split('/').all(filter) {
            continue;
        }

        let mode = file.unix_mode();
        let entry = if file.is_dir() {
            (Entry::dir(rel, mode.map_or(DEFAULT_DIR_MODE, |m| m & 0o7777)), None)
        } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            std::io::Read::read_to_string(&mut file, &mut target)?;
            (Entry::symlink(rel, target, DEFAULT_DIR_MODE), None)
        } else {
            let mode = mode.map_or(DEFAULT_FILE_MODE, |m| m & 0o7777);
            (Entry::file(rel, file.size(), mode), Some(index))
        };
        found.push(entry);
    }

    found.sort_by(|a, b| a.0.path.cmp(&b.0.path));
    let indices = found.iter().filter_map(|(_, index)| *index).collect();
    let container = Container::new(found.into_iter().map(|(entry, _)| entry).collect());

    Ok(ScanResult {
        container,
        pool: Box::new(ZipPool::new(archive, indices)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::write(root.join("game.exe"), b"EXE_CONTENT").unwrap();
        fs::write(root.join("readme.txt"), b"READ").unwrap();

        fs::create_dir_all(root.join("data").join("levels")).unwrap();
        fs::write(root.join("data").join("config.ini"), b"CFG").unwrap();
        fs::write(
            root.join("data").join("levels").join("level1.dat"),
            b"LEVEL_DATA_HERE",
        )
        .unwrap();

        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git").join("HEAD"), b"ref: refs/heads/main").unwrap();
        fs::write(root.join(".DS_Store"), b"junk").unwrap();

        dir
    }

    fn read_all(pool: &mut dyn FilePool, index: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        pool.open(index).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn scan_dir_finds_files_sorted() {
        let dir = create_test_tree();
        let mut result =
            scan_source(dir.path(), default_filter, false, &CancellationToken::new()).unwrap();

        let paths: Vec<&str> = result.container.files().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "data/config.ini",
                "data/levels/level1.dat",
                "game.exe",
                "readme.txt"
            ]
        );

        let stats = result.container.stats();
        assert_eq!(stats.files, 4);
        assert_eq!(stats.dirs, 2);

        let expected_size =
            b"EXE_CONTENT".len() + b"READ".len() + b"CFG".len() + b"LEVEL_DATA_HERE".len();
        assert_eq!(result.container.size(), expected_size as u64);

        assert_eq!(read_all(result.pool.as_mut(), 1), b"LEVEL_DATA_HERE");
    }

    #[test]
    fn ignored_names_are_pruned() {
        let dir = create_test_tree();
        let result =
            scan_source(dir.path(), default_filter, false, &CancellationToken::new()).unwrap();
        assert!(
            result
                .container
                .entries()
                .iter()
                .all(|e| !e.path.starts_with(".git") && e.path != ".DS_Store")
        );
    }

    #[test]
    fn custom_filter() {
        let dir = create_test_tree();
        fn no_txt(name: &str) -> bool {
            default_filter(name) && !name.ends_with(".txt")
        }
        let result = scan_source(dir.path(), no_txt, false, &CancellationToken::new()).unwrap();
        assert!(result.container.files().all(|e| e.path != "readme.txt"));
    }

    #[test]
    fn scan_empty_dir() {
        let dir = TempDir::new().unwrap();
        let result =
            scan_source(dir.path(), default_filter, false, &CancellationToken::new()).unwrap();
        assert!(result.container.is_empty());
        assert_eq!(result.container.size(), 0);
    }

    #[test]
    fn scan_nonexistent_path() {
        let err = scan_source(
            Path::new("/nonexistent/path/that/does/not/exist"),
            default_filter,
            false,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PushError::Scan { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_root_is_not_walked() {
        let dir = create_test_tree();
        let outer = TempDir::new().unwrap();
        let link = outer.path().join("build");
        std::os::unix::fs::symlink(dir.path(), &link).unwrap();

        let err = scan_source(&link, default_filter, false, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PushError::Scan { .. }), "got {err:?}");
    }

    #[test]
    fn debug_shows_the_container() {
        let dir = create_test_tree();
        let result =
            scan_source(dir.path(), default_filter, false, &CancellationToken::new()).unwrap();
        let shown = format!("{result:?}");
        assert!(shown.starts_with("ScanResult { container:"));
        assert!(shown.contains("game.exe"));
    }

    #[test]
    fn cancelled_scan() {
        let dir = create_test_tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scan_source(dir.path(), default_filter, false, &cancel).unwrap_err();
        assert!(matches!(err, PushError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn fix_permissions_marks_scripts() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(dir.path().join("notes.txt"), b"plain text").unwrap();

        let result =
            scan_source(dir.path(), default_filter, true, &CancellationToken::new()).unwrap();
        let modes: Vec<(String, u32)> = result
            .container
            .files()
            .map(|e| (e.path.clone(), e.mode))
            .collect();
        assert_eq!(modes[1], ("run.sh".to_string(), 0o755));
        assert_eq!(modes[0].1 & 0o111, 0);
    }

    fn write_zip(path: &Path) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();

        zip.add_directory("bin/", options).unwrap();
        zip.start_file("bin/game", options.unix_permissions(0o755))
            .unwrap();
        zip.write_all(b"\x7fELF-binary").unwrap();
        zip.start_file("assets/level.dat", options).unwrap();
        zip.write_all(b"LEVEL").unwrap();
        zip.start_file("__MACOSX/assets/._level.dat", options)
            .unwrap();
        zip.write_all(b"resource fork").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn scan_zip_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("build.zip");
        write_zip(&archive);

        let mut result =
            scan_source(&archive, default_filter, false, &CancellationToken::new()).unwrap();
        let paths: Vec<&str> = result.container.files().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["assets/level.dat", "bin/game"]);
        assert_eq!(result.container.stats().dirs, 1);
        assert_eq!(result.container.size(), 5 + 11);

        // Pool follows container order, not archive order.
        assert_eq!(read_all(result.pool.as_mut(), 0), b"LEVEL");
        assert_eq!(read_all(result.pool.as_mut(), 1), b"\x7fELF-binary");
        assert_eq!(result.container.files().nth(1).unwrap().mode, 0o755);
    }

    #[test]
    fn zip_with_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("../escape.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"nope").unwrap();
        zip.finish().unwrap();

        let err = scan_source(&archive, default_filter, false, &CancellationToken::new())
            .unwrap_err();
        assert!(
            matches!(
                err,
                PushError::Scan {
                    source: DeltaError::InvalidPath(_),
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn not_a_zip_is_a_scan_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("build.bin");
        fs::write(&file, b"definitely not a zip").unwrap();
        let err =
            scan_source(&file, default_filter, false, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PushError::Scan { .. }));
    }
}
