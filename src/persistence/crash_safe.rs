//! Crash-safe file primitives
//!
//! A full rewrite goes through `<file>~`:
//!
//! 1. flush the containing directory
//! 2. flush the existing live file, if any
//! 3. write every line to the temp file
//! 4. flush the temp file
//! 5. rename the temp file over the live file
//! 6. flush the containing directory
//!
//! Whatever step a crash interrupts, one of the live file or the temp file
//! holds a complete snapshot. `ensure_file_integrity` picks it up again.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::crash_point::{maybe_crash, points};
use crate::observability::{log_event_with_fields, Event};

/// What `ensure_file_integrity` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityOutcome {
    /// The live file existed
    LivePresent,
    /// Only the temp file existed and was renamed into place
    TempPromoted,
    /// Neither existed; an empty live file was created
    Initialized,
}

/// `<path>~`
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push("~");
    PathBuf::from(name)
}

/// `path` with `suffix` appended to its final component
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Create the directory that will hold `path`
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(parent_dir(path))
}

/// Flush a file to stable storage
pub fn flush_file(path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(path)?.sync_all()
}

/// Flush a directory entry table to stable storage
///
/// Platforms that cannot open or flush directories skip this step.
pub fn flush_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        match File::open(dir).and_then(|handle| handle.sync_all()) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::PermissionDenied
                        | io::ErrorKind::InvalidInput
                        | io::ErrorKind::Unsupported
                ) =>
            {
                log_event_with_fields(
                    Event::DirectorySyncSkipped,
                    &[("dir", &dir.display().to_string()), ("reason", &e.to_string())],
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
    #[cfg(not(unix))]
    {
        log_event_with_fields(
            Event::DirectorySyncSkipped,
            &[("dir", &dir.display().to_string()), ("reason", "unsupported platform")],
        );
        Ok(())
    }
}

/// Write lines, each followed by a newline, replacing the file
pub fn write_file_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Replace `path` with `lines` so that a crash never leaves it half-written
pub fn crash_safe_write_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    let dir = parent_dir(path);
    let temp = temp_path(path);

    flush_dir(&dir)?;
    if path.exists() {
        flush_file(path)?;
    }

    maybe_crash(points::REWRITE_BEFORE_TEMP_WRITE);
    write_file_lines(&temp, lines)?;
    maybe_crash(points::REWRITE_AFTER_TEMP_WRITE);

    flush_file(&temp)?;
    maybe_crash(points::REWRITE_AFTER_TEMP_FSYNC);

    fs::rename(&temp, path)?;
    maybe_crash(points::REWRITE_AFTER_RENAME);

    flush_dir(&dir)?;
    maybe_crash(points::REWRITE_AFTER_DIR_SYNC);
    Ok(())
}

/// Make sure a live file exists, recovering from an interrupted rewrite
///
/// - live file present: use it, even if a stale temp file lies next to it
/// - only the temp file present: it is a complete snapshot, rename it
/// - neither present: first run, create an empty live file
pub fn ensure_file_integrity(path: &Path) -> io::Result<IntegrityOutcome> {
    if path.exists() {
        return Ok(IntegrityOutcome::LivePresent);
    }

    let temp = temp_path(path);
    if temp.exists() {
        fs::rename(&temp, path)?;
        flush_dir(&parent_dir(path))?;
        log_event_with_fields(
            Event::TempFilePromoted,
            &[("path", &path.display().to_string())],
        );
        return Ok(IntegrityOutcome::TempPromoted);
    }

    File::create(path)?.sync_all()?;
    flush_dir(&parent_dir(path))?;
    log_event_with_fields(
        Event::DataFileInitialized,
        &[("path", &path.display().to_string())],
    );
    Ok(IntegrityOutcome::Initialized)
}

/// Append lines in one write and flush before returning
pub fn append_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut buffer = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        buffer.push_str(line);
        buffer.push('\n');
    }

    maybe_crash(points::APPEND_BEFORE_WRITE);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buffer.as_bytes())?;
    file.sync_all()?;
    maybe_crash(points::APPEND_AFTER_FSYNC);
    Ok(())
}

/// Stream every line of a file to `sink`
///
/// Invalid UTF-8 is replaced rather than rejected so that damaged lines
/// reach the caller's corruption accounting instead of aborting the read.
pub fn read_lines(path: &Path, sink: &mut dyn FnMut(&str)) -> io::Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            return Ok(());
        }
        if buffer.last() == Some(&b'\n') {
            buffer.pop();
        }
        sink(&String::from_utf8_lossy(&buffer));
    }
}
