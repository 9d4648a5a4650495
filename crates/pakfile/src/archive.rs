use std::{
    cell::{Cell, RefCell, RefMut},
    fmt,
    fs::{File, OpenOptions},
    io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom, Write},
    path::Path,
};

use tracing::{debug, info, warn};

use crate::{
    entry::{Entry, EntryReader, EntryWriter},
    error::PackError,
    extract::{self, copy_with_patience, ExtractSummary, Extraction},
    filter::PathFilter,
    folder::FolderPath,
    index::Index,
    record::{fits_name, Header, NAME_LEN},
    tree, Result, HEADER_LEN, RECORD_LEN,
};

/// Random-access byte store an archive lives in.
pub trait Storage: Read + Write + Seek {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl Storage for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Open(Direction),
}

/// A pack archive backed by one storage handle.
///
/// Read-only queries take `&self`, so they stay available while an entry
/// stream is open. Only one stream may be open at a time, and nothing that
/// moves the file position on its own (mutation, extraction, write-back)
/// runs while one is.
pub struct Archive<S: Storage = File> {
    inner: RefCell<Option<S>>,
    /// Last known position of `inner`, `None` when unknown.
    pos: Cell<Option<u64>>,
    len: Cell<u64>,
    mode: OpenMode,
    list_offset: u64,
    /// End of the entry list as it currently sits in storage.
    list_end: u64,
    data_end: u64,
    index: Index,
    modified: bool,
    stream: Cell<StreamState>,
}

impl Archive<File> {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)?;
        Self::from_storage(file, mode)
    }

    /// Creates (or truncates) the file at `path` as an empty archive.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::new(file)
    }
}

impl<S: Storage> Archive<S> {
    /// Validates the header and loads the entry list.
    pub fn from_storage(mut storage: S, mode: OpenMode) -> Result<Self> {
        let len = storage.seek(SeekFrom::End(0))?;
        let (header, index) = tree::read_index(&mut storage, len)?;
        let data_end = index
            .entries()
            .map(Entry::end)
            .max()
            .unwrap_or(0)
            .max(HEADER_LEN);
        let pos = storage.stream_position()?;
        info!(
            len,
            entries = index.entry_count(),
            folders = index.folder_count(),
            ?mode,
            "opened archive"
        );
        Ok(Self {
            inner: RefCell::new(Some(storage)),
            pos: Cell::new(Some(pos)),
            len: Cell::new(len),
            mode,
            list_offset: u64::from(header.entry_list_offset),
            list_end: u64::from(header.entry_list_offset)
                + record_count(&header) * RECORD_LEN,
            data_end,
            index,
            modified: false,
            stream: Cell::new(StreamState::Idle),
        })
    }

    /// Starts an empty archive in `storage`, discarding whatever it held.
    pub fn new(mut storage: S) -> Result<Self> {
        storage.seek(SeekFrom::Start(0))?;
        Header {
            entry_list_offset: HEADER_LEN as u32,
            entry_count: 0,
        }
        .write_to(&mut storage)?;
        storage.set_len(HEADER_LEN)?;
        Ok(Self {
            inner: RefCell::new(Some(storage)),
            pos: Cell::new(Some(HEADER_LEN)),
            len: Cell::new(HEADER_LEN),
            mode: OpenMode::ReadWrite,
            list_offset: HEADER_LEN,
            list_end: HEADER_LEN,
            data_end: HEADER_LEN,
            index: Index::new(),
            modified: true,
            stream: Cell::new(StreamState::Idle),
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn has_open_stream(&self) -> bool {
        self.stream.get() != StreamState::Idle
    }

    /// Current length of the backing file in bytes.
    pub fn file_len(&self) -> u64 {
        self.len.get()
    }

    pub fn index(&self) -> Result<&Index> {
        self.ensure_open()?;
        Ok(&self.index)
    }

    pub fn list_entries(&self, filter: &PathFilter) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        Ok(self.index.list_entries(filter))
    }

    pub fn list_folders(&self, filter: &PathFilter) -> Result<Vec<FolderPath>> {
        self.ensure_open()?;
        Ok(self.index.list_folders(filter))
    }

    pub fn find_entry(&self, path: &str) -> Result<Entry> {
        self.ensure_open()?;
        self.index.find(path).cloned()
    }

    pub fn open_read_stream(&self, entry: &Entry) -> Result<EntryReader<'_, S>> {
        let entry = self.stored(entry)?;
        self.acquire_stream(Direction::Input)?;
        Ok(EntryReader::new(self, entry))
    }

    /// Opens the entry's bytes for overwriting in place.
    pub fn open_write_stream(&self, entry: &Entry) -> Result<EntryWriter<'_, S>> {
        self.ensure_writable()?;
        let entry = self.stored(entry)?;
        self.acquire_stream(Direction::Output)?;
        Ok(EntryWriter::new(self, entry))
    }

    pub fn extract_all(&self, dest: impl AsRef<Path>) -> Result<ExtractSummary> {
        self.extract_with(dest, &Extraction::new())
    }

    pub fn extract(
        &self,
        dest: impl AsRef<Path>,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<ExtractSummary> {
        let filter = PathFilter::new(include, exclude)?;
        self.extract_with(dest, &Extraction::new().filter(filter))
    }

    pub fn extract_with(
        &self,
        dest: impl AsRef<Path>,
        extraction: &Extraction<'_>,
    ) -> Result<ExtractSummary> {
        self.ensure_open()?;
        self.ensure_idle()?;
        extract::run(self, dest.as_ref(), extraction)
    }

    pub fn rename(&mut self, entry: &Entry, new_name: &str) -> Result<Entry> {
        self.ensure_mutable()?;
        check_name(new_name, &entry.folder().append(new_name))?;
        Ok(match self.index.rename(entry, new_name)? {
            Some(renamed) => {
                self.modified = true;
                renamed
            }
            None => entry.clone(),
        })
    }

    pub fn move_entry(&mut self, entry: &Entry, destination: &FolderPath) -> Result<Entry> {
        self.ensure_mutable()?;
        check_folder(destination)?;
        Ok(match self.index.move_entry(entry, destination)? {
            Some(moved) => {
                self.modified = true;
                moved
            }
            None => entry.clone(),
        })
    }

    /// Drops the entry from the index. Its bytes stay in the file until the
    /// space is reused.
    pub fn remove(&mut self, entry: &Entry) -> Result<Entry> {
        self.ensure_mutable()?;
        let removed = self.index.remove(entry)?;
        self.modified = true;
        Ok(removed)
    }

    /// Returns the number of folders removed.
    pub fn delete_empty_folders(&mut self) -> Result<usize> {
        self.ensure_mutable()?;
        let removed = self.index.delete_empty_folders();
        if removed > 0 {
            self.modified = true;
        }
        Ok(removed)
    }

    /// Adds a folder (and its missing ancestors). Returns false if it was
    /// already there.
    pub fn add_folder(&mut self, folder: &FolderPath) -> Result<bool> {
        self.ensure_mutable()?;
        check_folder(folder)?;
        let added = self.index.insert_folder(folder.clone());
        if added {
            self.modified = true;
        }
        Ok(added)
    }

    /// Streams `r` into the archive as `folder\name`.
    ///
    /// The bytes land at the tail, which may be where the stored entry list
    /// sits. Once that happens the list is rewritten on flush even if the
    /// append itself fails.
    pub fn append<R: Read>(
        &mut self,
        folder: &FolderPath,
        name: &str,
        timestamp: i32,
        r: R,
    ) -> Result<Entry> {
        self.ensure_mutable()?;
        check_folder(folder)?;
        check_name(name, &folder.append(name))?;
        let invalid = |reason: &str| PackError::InvalidEntry {
            path: folder.append(name).path().to_string(),
            reason: reason.to_string(),
        };

        let start = self.tail();
        let offset = u32::try_from(start).map_err(|_| invalid("archive is full"))?;
        if start < self.list_end {
            self.modified = true;
        }
        let copied = {
            let mut storage = self.storage()?;
            self.pos.set(None);
            storage.seek(SeekFrom::Start(start))?;
            io::copy(&mut r.take(u64::from(u32::MAX) + 1), &mut *storage)?
        };
        self.len.set(self.len.get().max(start + copied));
        // Rejected bytes sit past the tail and get cut off on write-back.
        let size = match u32::try_from(copied) {
            Ok(0) => return Err(invalid("entry is empty")),
            Ok(size) => size,
            Err(_) => return Err(invalid("entry is larger than 4 GiB")),
        };
        let entry = Entry::new(folder.clone(), name, offset, size, timestamp);
        if self.index.contains(&entry) {
            return Err(PackError::AlreadyExists(entry.path()));
        }
        self.index.insert(entry.clone());
        self.data_end = entry.end();
        self.modified = true;
        debug!(%entry, offset, size, "appended entry");
        Ok(entry)
    }

    /// Writes the entry list back if anything changed.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_idle()?;
        if self.modified {
            self.ensure_writable()?;
            self.write_back()?;
        }
        Ok(())
    }

    /// Writes back pending changes and releases the storage. Afterwards
    /// every operation fails with [`PackError::Closed`]. If the write-back
    /// fails the archive stays open.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.inner.borrow_mut().take();
        self.pos.set(None);
        debug!("closed archive");
        Ok(())
    }

    /// Like [`Archive::close`], but hands the storage back.
    pub fn into_inner(mut self) -> Result<S> {
        self.flush()?;
        self.pos.set(None);
        self.inner.get_mut().take().ok_or(PackError::Closed)
    }

    /// First byte past both the entry data and the current entry list.
    fn tail(&self) -> u64 {
        self.data_end.max(self.list_offset)
    }

    fn write_back(&mut self) -> Result<()> {
        let records = tree::serialize(&self.index);
        let offset = self.tail();
        let list_offset = u32::try_from(offset)
            .map_err(|_| PackError::format("entry list would start past 4 GiB"))?;
        let entry_count = i32::try_from(records.len())
            .map_err(|_| PackError::format("too many records"))?;

        let mut buf = Vec::with_capacity(records.len() * RECORD_LEN as usize);
        for record in &records {
            record.write_to(&mut buf)?;
        }
        let end = offset + buf.len() as u64;
        {
            let mut storage = self.storage()?;
            self.pos.set(None);
            storage.seek(SeekFrom::Start(offset))?;
            storage.write_all(&buf)?;
            storage.seek(SeekFrom::Start(0))?;
            Header {
                entry_list_offset: list_offset,
                entry_count,
            }
            .write_to(&mut *storage)?;
            storage.set_len(end)?;
            storage.flush()?;
        }
        self.list_offset = offset;
        self.list_end = end;
        self.len.set(end);
        self.modified = false;
        info!(records = entry_count, offset, len = end, "wrote entry list");
        Ok(())
    }

    fn stored(&self, entry: &Entry) -> Result<Entry> {
        self.ensure_open()?;
        self.index
            .get(entry)
            .cloned()
            .ok_or_else(|| PackError::NotFound(entry.path()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(PackError::Closed)
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_read_only() {
            Err(PackError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.stream.get() {
            StreamState::Idle => Ok(()),
            StreamState::Open(direction) => Err(PackError::StreamConflict(direction)),
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_idle()
    }

    fn acquire_stream(&self, direction: Direction) -> Result<()> {
        self.ensure_idle()?;
        self.stream.set(StreamState::Open(direction));
        Ok(())
    }

    pub(crate) fn release_stream(&self) {
        self.stream.set(StreamState::Idle);
    }

    fn storage(&self) -> Result<RefMut<'_, S>> {
        RefMut::filter_map(self.inner.borrow_mut(), Option::as_mut).map_err(|_| PackError::Closed)
    }

    fn seek_to(&self, storage: &mut S, pos: u64) -> io::Result<()> {
        if self.pos.get() != Some(pos) {
            self.pos.set(None);
            storage.seek(SeekFrom::Start(pos))?;
        }
        Ok(())
    }

    pub(crate) fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut storage = self.storage().map_err(io::Error::other)?;
        self.seek_to(&mut storage, pos)?;
        self.pos.set(None);
        let n = storage.read(buf)?;
        self.pos.set(Some(pos + n as u64));
        Ok(n)
    }

    pub(crate) fn write_at(&self, pos: u64, buf: &[u8]) -> io::Result<usize> {
        let mut storage = self.storage().map_err(io::Error::other)?;
        self.seek_to(&mut storage, pos)?;
        self.pos.set(None);
        let n = storage.write(buf)?;
        self.pos.set(Some(pos + n as u64));
        self.len.set(self.len.get().max(pos + n as u64));
        Ok(n)
    }

    pub(crate) fn flush_storage(&self) -> io::Result<()> {
        self.storage().map_err(io::Error::other)?.flush()
    }

    /// Copies the entry's bytes into `out`; see [`copy_with_patience`].
    pub(crate) fn copy_entry<W: Write + ?Sized>(
        &self,
        entry: &Entry,
        out: &mut W,
        patience: u32,
        buf: &mut [u8],
    ) -> Result<u64> {
        let mut storage = self.storage()?;
        self.pos.set(None);
        storage.seek(SeekFrom::Start(u64::from(entry.offset())))?;
        let size = u64::from(entry.size());
        let mut src = (&mut *storage).take(size);
        Ok(copy_with_patience(&mut src, out, size, patience, buf)?)
    }
}

/// Names are a single path component that fits a record unchanged.
fn check_name(name: &str, path: &FolderPath) -> Result<()> {
    let reason = if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        format!("{name:?} is not a single path component")
    } else if !fits_name(name) {
        format!("{name:?} is longer than {} bytes or not ISO-8859-1", NAME_LEN - 1)
    } else {
        return Ok(());
    };
    Err(PackError::InvalidEntry {
        path: path.path().to_string(),
        reason,
    })
}

fn check_folder(folder: &FolderPath) -> Result<()> {
    folder
        .components()
        .try_for_each(|component| check_name(component, folder))
}

fn record_count(header: &Header) -> u64 {
    u64::try_from(header.entry_count).unwrap_or(0)
}

impl<S: Storage> Drop for Archive<S> {
    fn drop(&mut self) {
        if self.modified && self.is_open() && !self.is_read_only() {
            if let Err(e) = self.write_back() {
                warn!(error = %e, "couldn't write entry list while dropping archive");
            }
        }
    }
}
