//! Bulk extraction of archive entries to a directory.

use std::{
    cmp, fs,
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    archive::{Archive, Storage},
    entry::Entry,
    error::PackError,
    filter::PathFilter,
    folder::FolderPath,
    Result,
};

/// Consecutive zero-byte transfer attempts tolerated before giving up.
pub const DEFAULT_PATIENCE: u32 = 16;
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// What to extract and how.
pub struct Extraction<'a> {
    filter: PathFilter,
    patience: u32,
    buffer_size: usize,
    cancel: Option<&'a AtomicBool>,
    progress: Option<&'a dyn Fn(&Entry)>,
}

impl Default for Extraction<'_> {
    fn default() -> Self {
        Self {
            filter: PathFilter::all(),
            patience: DEFAULT_PATIENCE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            cancel: None,
            progress: None,
        }
    }
}

impl<'a> Extraction<'a> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }
    pub fn patience(mut self, patience: u32) -> Self {
        self.patience = patience;
        self
    }
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
    /// Checked before each folder and entry; setting it stops the run with
    /// [`PackError::Cancelled`].
    pub fn cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }
    /// Called after each entry has been written.
    pub fn on_entry(mut self, progress: &'a dyn Fn(&Entry)) -> Self {
        self.progress = Some(progress);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(PackError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub folders: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Copies up to `len` bytes from `src` to `dst` through `buf`.
///
/// Neither side has to move everything in one call. Every read or write that
/// moves nothing costs one unit of `patience`, any progress restores it, and
/// the copy stops once it runs out. Returns the number of bytes written,
/// which is less than `len` only when patience ran out.
pub fn copy_with_patience<R, W>(
    src: &mut R,
    dst: &mut W,
    len: u64,
    patience: u32,
    buf: &mut [u8],
) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let patience = patience.max(1);
    let mut moved = 0u64;
    let mut idle = 0u32;

    while moved < len && idle < patience {
        let want = cmp::min(buf.len() as u64, len - moved) as usize;
        let read = match src.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if read == 0 {
            idle += 1;
            continue;
        }
        idle = 0;

        let mut written = 0;
        while written < read {
            if idle >= patience {
                return Ok(moved);
            }
            match dst.write(&buf[written..read]) {
                Ok(0) => idle += 1,
                Ok(n) => {
                    written += n;
                    moved += n as u64;
                    idle = 0;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(moved)
}

/// Joins archive path components onto `dest`, refusing anything that could
/// escape it.
fn safe_join<'p>(
    dest: &Path,
    parts: impl IntoIterator<Item = &'p str>,
    display: &str,
) -> Result<PathBuf> {
    let mut path = dest.to_path_buf();
    for part in parts {
        for piece in part.split(['/', '\\']).filter(|p| !p.is_empty()) {
            if piece == "." || piece == ".." || piece.contains(':') {
                return Err(PackError::UnsafePath(display.to_string()));
            }
            path.push(piece);
        }
    }
    Ok(path)
}

fn folder_target(dest: &Path, folder: &FolderPath) -> Result<PathBuf> {
    safe_join(dest, folder.components(), folder.path())
}

fn entry_target(dest: &Path, entry: &Entry) -> Result<PathBuf> {
    safe_join(
        dest,
        entry.folder().components().chain([entry.name()]),
        &entry.path(),
    )
}

fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| PackError::Create {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn run<S: Storage>(
    archive: &Archive<S>,
    dest: &Path,
    extraction: &Extraction<'_>,
) -> Result<ExtractSummary> {
    let folders = archive.list_folders(&extraction.filter)?;
    let entries = archive.list_entries(&extraction.filter)?;
    let mut summary = ExtractSummary::default();

    create_dir_all(dest)?;
    // Folders first, so empty ones exist no matter how entries are ordered.
    for folder in folders.iter().filter(|f| !f.is_root()) {
        extraction.check_cancelled()?;
        create_dir_all(&folder_target(dest, folder)?)?;
        summary.folders += 1;
    }

    let mut buf = vec![0u8; extraction.buffer_size.max(1)];
    for entry in &entries {
        extraction.check_cancelled()?;
        let target = entry_target(dest, entry)?;
        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target).map_err(|source| PackError::Create {
            path: target.clone(),
            source,
        })?;
        let moved = archive.copy_entry(entry, &mut out, extraction.patience, &mut buf)?;
        if moved < u64::from(entry.size()) {
            return Err(PackError::TruncatedTransfer {
                path: entry.path(),
                moved,
                expected: u64::from(entry.size()),
            });
        }
        out.flush()?;
        debug!(%entry, target = %target.display(), "extracted");
        if let Some(progress) = extraction.progress {
            progress(entry);
        }
        summary.files += 1;
        summary.bytes += moved;
    }

    info!(
        dest = %dest.display(),
        folders = summary.folders,
        files = summary.files,
        bytes = summary.bytes,
        "extraction finished"
    );
    Ok(summary)
}
