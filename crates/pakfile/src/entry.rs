use std::{
    cmp::{self, Ordering},
    fmt,
    hash::{Hash, Hasher},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
};

use serde::Serialize;

use crate::{
    archive::{Archive, Storage},
    folder::{FolderPath, SEPARATOR},
};

/// A named byte range inside the archive.
///
/// Two entries are the same entry when their full paths match without regard
/// to case and their timestamp and size agree. The offset is not part of the
/// identity.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    offset: u32,
    size: u32,
    folder: FolderPath,
    name: String,
    #[serde(skip)]
    folded_name: String,
    timestamp: i32,
}

impl Entry {
    pub fn new(folder: FolderPath, name: &str, offset: u32, size: u32, timestamp: i32) -> Self {
        Self {
            offset,
            size,
            folder,
            name: name.to_string(),
            folded_name: name.to_lowercase(),
            timestamp,
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn folder(&self) -> &FolderPath {
        &self.folder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> i32 {
        self.timestamp
    }

    /// First byte past the entry's range.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }

    pub fn path(&self) -> String {
        if self.folder.is_root() {
            self.name.clone()
        } else {
            format!("{}{SEPARATOR}{}", self.folder.path(), self.name)
        }
    }

    pub(crate) fn has_path(&self, folder: &FolderPath, name: &str) -> bool {
        self.folder == *folder && self.folded_name == name.to_lowercase()
    }

    pub(crate) fn renamed(&self, name: &str) -> Self {
        Self::new(
            self.folder.clone(),
            name,
            self.offset,
            self.size,
            self.timestamp,
        )
    }

    pub(crate) fn moved_to(&self, folder: FolderPath) -> Self {
        Self::new(folder, &self.name, self.offset, self.size, self.timestamp)
    }

    /// Smallest possible entry at `folder\name`, used as a range start.
    pub(crate) fn lower_bound(folder: FolderPath, name: &str) -> Self {
        Self::new(folder, name, 0, 0, i32::MIN)
    }
}

/// Existing archives were sorted with a size tie-break that saturates to the
/// i32 range before taking the sign; keep it that way.
fn clamped_size_cmp(a: u32, b: u32) -> Ordering {
    let diff = (i64::from(a) - i64::from(b)).clamp(i64::from(i32::MIN), i64::from(i32::MAX));
    (diff as i32).cmp(&0)
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folder
            .cmp(&other.folder)
            .then_with(|| self.folded_name.cmp(&other.folded_name))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| clamped_size_cmp(self.size, other.size))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folder.hash(state);
        self.folded_name.hash(state);
        self.timestamp.hash(state);
        self.size.hash(state);
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn out_of_bounds() -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, "Seek out of bounds")
}

/// Resolves `target` against `[start, end)` with `pos` as the current
/// absolute position. Returns the new absolute position.
fn seek_within(start: u64, end: u64, pos: u64, target: SeekFrom) -> io::Result<u64> {
    let (base, delta) = match target {
        SeekFrom::Start(i) => (start, i128::from(i)),
        SeekFrom::End(i) => (end, i128::from(i)),
        SeekFrom::Current(i) => (pos, i128::from(i)),
    };
    let next = i128::from(base) + delta;
    if next < i128::from(start) || next > i128::from(end) {
        return Err(out_of_bounds());
    }
    Ok(next as u64)
}

/// Read view of one entry's bytes. Holds the archive's stream slot until
/// dropped.
pub struct EntryReader<'a, S: Storage> {
    pub(crate) archive: &'a Archive<S>,
    pub(crate) entry: Entry,
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) pos: u64,
    pub(crate) mark: u64,
}

impl<'a, S: Storage> EntryReader<'a, S> {
    pub(crate) fn new(archive: &'a Archive<S>, entry: Entry) -> Self {
        let start = u64::from(entry.offset());
        Self {
            archive,
            start,
            end: entry.end(),
            pos: start,
            mark: start,
            entry,
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position relative to the start of the entry.
    pub fn pos(&self) -> u64 {
        self.pos - self.start
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    pub fn mark(&mut self) {
        self.mark = self.pos;
    }

    pub fn reset(&mut self) {
        self.pos = self.mark;
    }

    /// Moves by `n` bytes in either direction, stopping at the entry bounds.
    /// Returns how far the position actually moved.
    pub fn skip(&mut self, n: i64) -> i64 {
        let target = (i128::from(self.pos) + i128::from(n))
            .clamp(i128::from(self.start), i128::from(self.end)) as u64;
        let moved = target as i64 - self.pos as i64;
        self.pos = target;
        moved
    }

    pub fn close(self) {}
}

impl<S: Storage> Read for EntryReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rem = self.remaining();
        if rem == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = cmp::min(buf.len() as u64, rem) as usize;
        let n = self.archive.read_at(self.pos, &mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: Storage> Seek for EntryReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_within(self.start, self.end, self.pos, pos)?;
        Ok(self.pos - self.start)
    }
}

impl<S: Storage> Drop for EntryReader<'_, S> {
    fn drop(&mut self) {
        self.archive.release_stream();
    }
}

/// In-place write view of one entry's bytes. Never grows the entry: writes
/// at the end of the range report zero bytes written.
pub struct EntryWriter<'a, S: Storage> {
    pub(crate) archive: &'a Archive<S>,
    pub(crate) entry: Entry,
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) pos: u64,
}

impl<'a, S: Storage> EntryWriter<'a, S> {
    pub(crate) fn new(archive: &'a Archive<S>, entry: Entry) -> Self {
        let start = u64::from(entry.offset());
        Self {
            archive,
            start,
            end: entry.end(),
            pos: start,
            entry,
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pos(&self) -> u64 {
        self.pos - self.start
    }

    pub fn close(mut self) -> io::Result<()> {
        self.flush()
    }
}

impl<S: Storage> Write for EntryWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let rem = self.end - self.pos;
        if rem == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = cmp::min(buf.len() as u64, rem) as usize;
        let n = self.archive.write_at(self.pos, &buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.archive.flush_storage()
    }
}

impl<S: Storage> Seek for EntryWriter<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_within(self.start, self.end, self.pos, pos)?;
        Ok(self.pos - self.start)
    }
}

impl<S: Storage> Drop for EntryWriter<'_, S> {
    fn drop(&mut self) {
        self.archive.release_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn entry(path: &str, size: u32, timestamp: i32) -> Entry {
        let full = FolderPath::new(path);
        Entry::new(full.parent(), full.name(), 16, size, timestamp)
    }

    #[test]
    fn path_joins_folder_and_name() {
        assert_eq!(entry("data\\sub\\x.bin", 1, 0).path(), "data\\sub\\x.bin");
        assert_eq!(entry("root.txt", 1, 0).path(), "root.txt");
    }

    #[test]
    fn identity_ignores_case_and_offset() {
        let a = entry("data\\FILE.BIN", 10, 5);
        let mut b = entry("DATA\\file.bin", 10, 5);
        b.offset = 999;
        assert_eq!(a, b);
        assert_ne!(a, entry("data\\file.bin", 11, 5));
        assert_ne!(a, entry("data\\file.bin", 10, 6));
    }

    #[test]
    fn case_variants_with_distinct_identity_are_both_kept() {
        let set: BTreeSet<_> = [
            entry("FILE.BIN", 10, 1),
            entry("file.bin", 10, 2),
            entry("file.bin", 10, 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn orders_by_folder_then_name_then_timestamp_then_size() {
        let set: BTreeSet<_> = [
            entry("b.txt", 1, 0),
            entry("a\\z.txt", 1, 0),
            entry("a\\b.txt", 2, 0),
            entry("a\\b.txt", 1, 0),
            entry("a\\b.txt", 1, -5),
        ]
        .into_iter()
        .collect();
        let order: Vec<_> = set
            .iter()
            .map(|e| (e.path(), e.timestamp(), e.size()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a\\b.txt".to_string(), -5, 1),
                ("a\\b.txt".to_string(), 0, 1),
                ("a\\b.txt".to_string(), 0, 2),
                ("a\\z.txt".to_string(), 0, 1),
                ("b.txt".to_string(), 0, 1),
            ]
        );
    }

    #[test]
    fn size_tie_break_saturates() {
        assert_eq!(clamped_size_cmp(u32::MAX, 0), Ordering::Greater);
        assert_eq!(clamped_size_cmp(0, u32::MAX), Ordering::Less);
        assert_eq!(clamped_size_cmp(7, 7), Ordering::Equal);
    }

    #[test]
    fn seek_within_checks_bounds() {
        assert_eq!(seek_within(10, 20, 15, SeekFrom::Start(3)).unwrap(), 13);
        assert_eq!(seek_within(10, 20, 15, SeekFrom::End(-1)).unwrap(), 19);
        assert_eq!(seek_within(10, 20, 15, SeekFrom::Current(-5)).unwrap(), 10);
        assert!(seek_within(10, 20, 15, SeekFrom::Current(-6)).is_err());
        assert!(seek_within(10, 20, 15, SeekFrom::End(1)).is_err());
        assert!(seek_within(10, 20, 15, SeekFrom::Start(11)).is_err());
    }
}
