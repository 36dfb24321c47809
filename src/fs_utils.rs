use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Replace a file's contents as a whole using temp file + rename
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
    }

    let parent = path.parent().unwrap_or(Path::new("."));
    let temp_path = parent.join(format!(
        ".mks2git_tmp_{}_{}",
        std::process::id(),
        rand_suffix()
    ));

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

    file.write_all(data)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    file.sync_all()
        .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;

    drop(file);

    fs::rename(&temp_path, path).with_context(|| {
        let _ = fs::remove_file(&temp_path);
        format!("Failed to rename temp file to: {}", path.display())
    })?;

    Ok(())
}

/// Generate a random suffix for temp files
fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    duration.as_nanos() as u64
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory tree left behind by an earlier step, if any
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Whether a file has any execute bit set
#[cfg(unix)]
pub fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("exported.txt");

        atomic_write(&file_path, b"1.1\n1.2\n").unwrap();

        assert_eq!(fs::read(&file_path).unwrap(), b"1.1\n1.2\n");
    }

    #[test]
    fn test_atomic_write_overwrites_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("marks.txt");

        fs::write(&file_path, b":1 1.1\n:2 1.2\n").unwrap();
        atomic_write(&file_path, b":1 1.1\n").unwrap();

        assert_eq!(fs::read(&file_path).unwrap(), b":1 1.1\n");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join(".mks2git").join("state").join("broken.txt");

        atomic_write(&file_path, b"").unwrap();

        assert!(file_path.exists());
        assert_eq!(fs::read(&file_path).unwrap().len(), 0);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        atomic_write(&temp_dir.path().join("a.txt"), b"a").unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dir_path = temp_dir.path().join("nested").join("sandbox");

        ensure_dir(&dir_path).unwrap();
        ensure_dir(&dir_path).unwrap();

        assert!(dir_path.is_dir());
    }

    #[test]
    fn test_remove_dir_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let dir_path = temp_dir.path().join("sandbox");
        fs::create_dir_all(dir_path.join("sub")).unwrap();
        fs::write(dir_path.join("sub").join("f.c"), b"x").unwrap();

        remove_dir_if_exists(&dir_path).unwrap();
        assert!(!dir_path.exists());

        remove_dir_if_exists(&dir_path).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("build.sh");
        fs::write(&script, b"#!/bin/sh").unwrap();

        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_executable(&fs::metadata(&script).unwrap()));

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&fs::metadata(&script).unwrap()));
    }
}
