use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use vaultclaw_core::Result;

/// Suffixes tried before `write_new` gives up on a crowded name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Replace an item file or the dashboard in place. The new content is staged
/// next to the target and renamed over it, so a watcher or operator opening
/// the file mid-update still sees a whole document.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically create `dir/file_name` without ever replacing an existing file.
///
/// If the name is taken, `_1`, `_2`, ... is inserted before the extension.
/// Returns the path actually written.
pub fn write_new(dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(suffixed(file_name, attempt));
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(e.error.into()),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {file_name} in {}", dir.display()),
    )
    .into())
}

/// First path in `dir` derived from `file_name` that does not exist yet.
pub fn free_path(dir: &Path, file_name: &str) -> PathBuf {
    (0..MAX_NAME_ATTEMPTS)
        .map(|n| dir.join(suffixed(file_name, n)))
        .find(|p| !p.exists())
        .unwrap_or_else(|| dir.join(file_name))
}

fn suffixed(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{file_name}_{n}"),
    }
}

/// Append one line to a file, creating it if it doesn't exist.
/// The line and its newline go out in a single write.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.write_all(buf.as_bytes())?;
    Ok(())
}
