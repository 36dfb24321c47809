use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

/// Buffer size for reading files during hashing (64KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the blake3 hash of a file
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash the content of a symlink (the target path, not the file it points to)
pub fn hash_symlink(path: &Path) -> Result<String> {
    let target = fs::read_link(path)
        .with_context(|| format!("Failed to read symlink: {}", path.display()))?;

    let target_str = target.to_string_lossy();
    let hash = blake3::hash(target_str.as_bytes());

    Ok(hash.to_hex().to_string())
}

/// Hash a tree entry, treating symlinks by their target
pub fn hash_entry(path: &Path) -> Result<String> {
    let metadata = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat: {}", path.display()))?;

    if metadata.file_type().is_symlink() {
        hash_symlink(path)
    }
    else {
        hash_file(path)
    }
}
