use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write content to a file
///
/// Writes to a temporary file in the same directory, syncs to disk,
/// then renames over the target path. Readers observe either the old
/// content or the new content, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_directory(parent)?;
    }

    let temp_path = sibling_temp_path(path);

    write_synced(&temp_path, content)?;

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Create `path` with `content`, synced to disk, and restrict it to the owner
pub fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;

    file.write_all(content)
        .with_context(|| format!("Failed to write file: {}", path.display()))?;

    file.sync_all().context("Failed to sync file to disk")?;

    set_file_permissions(path, 0o600)?;

    Ok(())
}

/// Temporary path next to `path`, unique per process
pub fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}

/// Ensure a directory exists and is only accessible by the current user
pub fn ensure_private_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;

        set_file_permissions(path, 0o700)?;
    }

    Ok(())
}

/// Set file permissions to a specific mode (Unix only, no-op on Windows)
pub fn set_file_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?;

        let mut permissions = metadata.permissions();
        permissions.set_mode(mode);

        std::fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    #[cfg(windows)]
    {
        let _ = (path, mode);
    }

    Ok(())
}
