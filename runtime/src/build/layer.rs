//! Layer content utilities for image building.
//!
//! Provides deterministic content digests for directory trees, filesystem
//! snapshotting and diffing for RUN steps, and the copy helpers used to
//! stage layer content.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use cimg_core::error::{CimgError, Result};
use cimg_core::ContentDigest;
use sha2::{Digest, Sha256};

// =============================================================================
// Content digests
// =============================================================================

/// `io::Write` sink that only feeds a SHA256 hasher.
struct HashWriter {
    hasher: Sha256,
}

impl Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest a directory tree.
///
/// The tree is serialized as a tar stream with entries in sorted order and
/// ownership and timestamps zeroed, so the same content always yields the
/// same digest regardless of when or where it was produced.
pub fn digest_dir(dir: &Path) -> Result<ContentDigest> {
    let mut builder = tar::Builder::new(HashWriter {
        hasher: Sha256::new(),
    });
    append_tree(&mut builder, dir, Path::new(""))?;
    finish_digest(builder)
}

/// Digest a single path: a directory's tree, or a file under its own name.
pub fn digest_path(path: &Path) -> Result<ContentDigest> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        CimgError::LayerStoreError(format!(
            "Failed to stat {} for hashing: {}",
            path.display(),
            e
        ))
    })?;
    if metadata.is_dir() {
        return digest_dir(path);
    }

    let name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("file"));
    let mut builder = tar::Builder::new(HashWriter {
        hasher: Sha256::new(),
    });
    append_entry(&mut builder, path, &name, &metadata)?;
    finish_digest(builder)
}

fn finish_digest(builder: tar::Builder<HashWriter>) -> Result<ContentDigest> {
    let writer = builder
        .into_inner()
        .map_err(|e| CimgError::LayerStoreError(format!("Failed to finalize digest: {}", e)))?;
    ContentDigest::from_hex(&hex::encode(writer.hasher.finalize()))
}

/// Append every entry under `current` in sorted order.
fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    current: &Path,
    relative: &Path,
) -> Result<()> {
    for name in sorted_entries(current)? {
        let path = current.join(&name);
        let tar_path = relative.join(&name);
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| {
            CimgError::LayerStoreError(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                e
            ))
        })?;

        append_entry(builder, &path, &tar_path, &metadata)?;
        if metadata.is_dir() {
            append_tree(builder, &path, &tar_path)?;
        }
    }
    Ok(())
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    tar_path: &Path,
    metadata: &Metadata,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(file_mode(metadata));

    let file_type = metadata.file_type();
    let result = if file_type.is_symlink() {
        let target = std::fs::read_link(path)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, tar_path, &target)
    } else if file_type.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, tar_path, io::empty())
    } else {
        let file = std::fs::File::open(path)?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        builder.append_data(&mut header, tar_path, file)
    };

    result.map_err(|e| {
        CimgError::LayerStoreError(format!(
            "Failed to hash {}: {}",
            tar_path.display(),
            e
        ))
    })
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::ffi::OsString>> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| {
        CimgError::LayerStoreError(format!(
            "Failed to read directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    let mut names = Vec::new();
    for entry in read_dir {
        names.push(entry?.file_name());
    }
    names.sort();
    Ok(names)
}

// =============================================================================
// Snapshots
// =============================================================================

/// Metadata for a single file in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Relative path from rootfs root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time (nanoseconds since epoch)
    pub mtime: u128,
}

/// A snapshot of a directory's file state.
#[derive(Debug, Clone)]
pub struct DirSnapshot {
    /// Map of relative path → file entry
    pub entries: HashMap<PathBuf, FileEntry>,
}

impl DirSnapshot {
    /// Take a snapshot of a directory, recording all files and their metadata.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        walk_dir(root, root, &mut entries)?;
        Ok(DirSnapshot { entries })
    }

    /// Paths added or modified between this snapshot (before) and `after`.
    ///
    /// Deleted paths are not reported.
    pub fn diff(&self, after: &DirSnapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = after
            .entries
            .iter()
            .filter(|(path, after_entry)| match self.entries.get(*path) {
                None => true,
                Some(before) => before.size != after_entry.size || before.mtime != after_entry.mtime,
            })
            .map(|(path, _)| path.clone())
            .collect();

        changed.sort();
        changed
    }
}

fn walk_dir(root: &Path, current: &Path, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        CimgError::Other(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                CimgError::Other(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        let metadata = std::fs::symlink_metadata(&path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        entries.insert(
            relative.clone(),
            FileEntry {
                path: relative,
                size: metadata.len(),
                mtime,
            },
        );

        if metadata.is_dir() {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}

// =============================================================================
// Copy helpers
// =============================================================================

/// Recursively copy a directory, preserving symlinks.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        copy_entry(&src_path, &dst_path)?;
    }
    Ok(())
}

/// Copy one path (file, symlink, or directory tree) to `dst`.
pub fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(src)?;
    if metadata.file_type().is_symlink() {
        copy_symlink(src, dst)
    } else if metadata.is_dir() {
        copy_dir_recursive(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = std::fs::read_link(src)?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::symlink_metadata(dst).is_ok() {
        std::fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

/// Copy changed paths from `rootfs` into `layer_dir`.
///
/// Directories are created empty; their changed children are listed
/// separately by the snapshot diff.
pub fn copy_changed(rootfs: &Path, changed: &[PathBuf], layer_dir: &Path) -> io::Result<()> {
    for relative in changed {
        let src = rootfs.join(relative);
        let dst = layer_dir.join(relative);
        let metadata = match std::fs::symlink_metadata(&src) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.is_dir() {
            std::fs::create_dir_all(&dst)?;
        } else {
            copy_entry(&src, &dst)?;
        }
    }
    Ok(())
}
