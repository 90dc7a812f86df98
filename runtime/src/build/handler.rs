//! Instruction handlers.
//!
//! Each handler stages the content an instruction produces in a scratch
//! directory and registers it with the layer store. Cache decisions are
//! made by the builder before a handler is invoked.

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use cimg_core::error::{CimgError, Result};
use cimg_core::ContentDigest;

use super::layer::{copy_changed, copy_dir_recursive, copy_entry, DirSnapshot};
use crate::image::Layer;
use crate::store::LayerStore;

/// Environment variable pointing RUN commands at the merged rootfs.
pub const ROOTFS_ENV: &str = "ROOTFS";

/// Execute a COPY: place the sources at the destination inside a fresh
/// layer directory and register it.
pub fn handle_copy(
    layer: &Layer,
    context_dir: &Path,
    layer_store: &dyn LayerStore,
) -> Result<ContentDigest> {
    let instruction = layer.instruction();
    let (srcs, dst) = layer
        .copy_args()
        .ok_or_else(|| failed(&instruction, "COPY requires a source and a destination"))?;

    let scratch = scratch_dir(&instruction)?;
    let layer_dir = scratch.path().join("layer");
    std::fs::create_dir_all(&layer_dir)
        .map_err(|e| failed(&instruction, format!("Failed to create layer directory: {}", e)))?;

    let dst_rel = relative_path(dst).ok_or_else(|| {
        failed(&instruction, format!("COPY destination '{}' escapes the image", dst))
    })?;
    let dst_path = layer_dir.join(&dst_rel);
    let into_dir = dst.ends_with('/') || dst_rel.as_os_str().is_empty() || srcs.len() > 1;

    for src in &srcs {
        let src_rel = relative_path(src).ok_or_else(|| {
            failed(&instruction, format!("COPY source '{}' escapes the build context", src))
        })?;
        let src_path = context_dir.join(&src_rel);
        let metadata = std::fs::symlink_metadata(&src_path).map_err(|_| {
            failed(
                &instruction,
                format!(
                    "COPY source not found: {} (in context {})",
                    src,
                    context_dir.display()
                ),
            )
        })?;

        // Directories contribute their contents; files land under their own
        // name when the destination is a directory.
        let result = if metadata.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)
        } else {
            let target = match (into_dir, src_path.file_name()) {
                (true, Some(name)) => dst_path.join(name),
                _ => dst_path.clone(),
            };
            copy_entry(&src_path, &target)
        };
        result.map_err(|e| {
            failed(
                &instruction,
                format!("Failed to copy {} to {}: {}", src, dst, e),
            )
        })?;
    }

    let id = layer_store.register_layer(&layer_dir)?;
    tracing::debug!(instruction = %instruction, layer = %id, "COPY produced layer");
    Ok(id)
}

/// Execute a RUN or CMD against the merged view of `base_paths`.
///
/// Returns `None` when the command leaves the filesystem unchanged.
pub fn handle_run(
    layer: &Layer,
    base_paths: &[PathBuf],
    layer_store: &dyn LayerStore,
) -> Result<Option<ContentDigest>> {
    let instruction = layer.instruction();
    let scratch = scratch_dir(&instruction)?;
    let rootfs = scratch.path().join("rootfs");
    materialize_rootfs(base_paths, &rootfs)?;

    let before = DirSnapshot::capture(&rootfs)?;

    let output = Command::new("sh")
        .arg("-c")
        .arg(&layer.value)
        .current_dir(&rootfs)
        .env(ROOTFS_ENV, &rootfs)
        .output()
        .map_err(|e| failed(&instruction, format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(
            &instruction,
            format!(
                "command failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        tracing::debug!(instruction = %instruction, stdout = %stdout.trim(), "Command output");
    }

    let after = DirSnapshot::capture(&rootfs)?;
    let changed = before.diff(&after);
    if changed.is_empty() {
        tracing::debug!(instruction = %instruction, "Command left the filesystem unchanged");
        return Ok(None);
    }

    let layer_dir = scratch.path().join("layer");
    std::fs::create_dir_all(&layer_dir)?;
    copy_changed(&rootfs, &changed, &layer_dir)
        .map_err(|e| failed(&instruction, format!("Failed to collect changes: {}", e)))?;

    let id = layer_store.register_layer(&layer_dir)?;
    tracing::debug!(
        instruction = %instruction,
        layer = %id,
        changed = changed.len(),
        "Command produced layer"
    );
    Ok(Some(id))
}

/// Merge layer directories into `target`, later layers overwriting earlier
/// ones.
pub fn materialize_rootfs(base_paths: &[PathBuf], target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    for path in base_paths {
        if !path.is_dir() {
            return Err(CimgError::LayerStoreError(format!(
                "Layer content missing at {}",
                path.display()
            )));
        }
        copy_dir_recursive(path, target).map_err(|e| {
            CimgError::LayerStoreError(format!(
                "Failed to materialize layer {}: {}",
                path.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Normalize a path written in a Kubefile to one relative to its root.
///
/// Returns `None` if the path climbs above the root.
pub(crate) fn relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
        }
    }
    Some(out)
}

fn scratch_dir(instruction: &str) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("cimg-build-")
        .tempdir()
        .map_err(|e| failed(instruction, format!("Failed to create scratch directory: {}", e)))
}

fn failed(instruction: &str, message: impl Into<String>) -> CimgError {
    CimgError::InstructionFailed {
        instruction: instruction.to_string(),
        message: message.into(),
    }
}
