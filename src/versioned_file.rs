//! Rotate-on-write versioned files.
//!
//! Writes go to a temporary file in the target directory. On
//! [`VersionedFile::commit`] the existing backups shift up by one
//! (`name.000.ext` is always the most recent backup), the current file becomes
//! `name.000.ext` and the temporary file atomically replaces the current one.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

/// Backups kept when the caller does not specify a count.
pub const DEFAULT_VERSION_COUNT: usize = 10;

/// Pending write of a versioned file. Dropping it without
/// [`commit`](Self::commit) discards the write.
pub struct VersionedFile {
    path: PathBuf,
    tmp: NamedTempFile,
    version_count: usize,
}

impl VersionedFile {
    /// Starts a new version of `path`, keeping `version_count` backups.
    pub fn create<P: AsRef<Path>>(
        path: P,
        version_count: usize,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let tmp = NamedTempFile::new_in(&dir)?;
        Ok(Self {
            path,
            tmp,
            version_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the new contents to disk, rotates the backups and moves the new
    /// contents into place.
    pub fn commit(mut self) -> io::Result<()> {
        self.tmp.flush()?;
        self.tmp.as_file().sync_all()?;
        rotate(&self.path, self.version_count)?;
        self.tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Write for VersionedFile {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

/// Path of backup `n`: the 3-digit number goes before the extension.
///
/// `settings.json` becomes `settings.004.json`; a path without an extension
/// gets the number appended.
pub fn version_path<P: AsRef<Path>>(
    path: P,
    n: usize,
) -> PathBuf {
    let path = path.as_ref();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{n:03}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{n:03}"),
    };
    path.with_file_name(name)
}

/// Reads the current version.
pub fn read<P: AsRef<Path>>(path: P) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Reverts `count` versions back.
///
/// The current file is discarded, backup `count - 1` becomes current and every
/// later backup moves down to fill the gap. Backups newer than the restored
/// one are left untouched.
pub fn revert<P: AsRef<Path>>(
    path: P,
    count: usize,
) -> io::Result<()> {
    if count < 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid revert count {count}"),
        ));
    }
    let path = path.as_ref();
    if path.is_file() {
        fs::remove_file(path)?;
    }
    let mut last = path.to_path_buf();
    let mut n = count - 1;
    loop {
        let candidate = version_path(path, n);
        if !candidate.is_file() {
            break;
        }
        fs::rename(&candidate, &last)?;
        last = candidate;
        n += 1;
    }
    Ok(())
}

/// Highest backup number present next to `path`, gaps included.
fn highest_version(path: &Path) -> io::Result<Option<usize>> {
    let Some(dir) = path.parent() else {
        return Ok(None);
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    if !dir.is_dir() {
        return Ok(None);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut highest = None;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix(&format!("{stem}.")) else {
            continue;
        };
        let number = match &ext {
            Some(ext) => rest.strip_suffix(&format!(".{ext}")),
            None => Some(rest),
        };
        if let Some(n) = number.and_then(|n| n.parse::<usize>().ok()) {
            highest = highest.max(Some(n));
        }
    }
    Ok(highest)
}

fn rotate(
    path: &Path,
    version_count: usize,
) -> io::Result<()> {
    let top = highest_version(path)?.map_or(0, |n| n + 1);
    for n in (0..=top).rev() {
        let target = version_path(path, n);
        let source = match n {
            0 => path.to_path_buf(),
            _ => version_path(path, n - 1),
        };
        if target.is_file() {
            fs::remove_file(&target)?;
        }
        if n < version_count && source.is_file() {
            fs::rename(&source, &target)?;
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
