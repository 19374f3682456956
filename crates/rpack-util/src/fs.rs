use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// Package manifests are not guaranteed to be valid UTF-8 (older ones are often Latin-1).
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write bytes to `path` through a sibling temp file and a rename.
///
/// Readers never observe a partially written archive.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.part.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// Copy `src` into `dest_dir`, keeping its file name. Returns the new path.
///
/// # Errors
/// Returns an error if `src` has no file name or the copy fails.
pub fn copy_into_dir(src: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    let file_name = src.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no file name in {}", src.display()),
        )
    })?;
    fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(file_name);
    fs::copy(src, &target)?;
    Ok(target)
}

/// Append a single line to a text file, creating it if needed.
///
/// # Errors
/// Returns an error if the file cannot be opened or written.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
