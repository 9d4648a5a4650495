//! Conversion between the flat record list and the folder/entry index.
//!
//! The list encodes the tree with directory markers: a zero-size record named
//! `..` returns to the parent folder, any other zero-size record descends into
//! a subfolder, and file records belong to whichever folder is current. The
//! writer walks the sorted folder set and only emits the markers needed to
//! get from one folder to the next.

use std::io::{Cursor, Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::{
    entry::Entry,
    error::PackError,
    folder::FolderPath,
    index::Index,
    record::{fits_name, Header, Record},
    Result, HEADER_LEN, RECORD_LEN,
};

/// Validates the header against `file_len` and parses the entry list.
pub fn read_index<R: Read + Seek>(r: &mut R, file_len: u64) -> Result<(Header, Index)> {
    if file_len < HEADER_LEN {
        return Err(PackError::format(format!(
            "file is {file_len} bytes, shorter than the {HEADER_LEN} byte header"
        )));
    }
    r.seek(SeekFrom::Start(0))?;
    let header = Header::read_from(&mut *r)?;
    let count = u64::try_from(header.entry_count)
        .map_err(|_| PackError::format(format!("negative entry count {}", header.entry_count)))?;
    let list_offset = u64::from(header.entry_list_offset);
    let list_len = count * RECORD_LEN;
    if list_offset + list_len > file_len {
        return Err(PackError::format(format!(
            "entry list at {list_offset} with {count} records runs past the end of the file ({file_len} bytes)"
        )));
    }

    r.seek(SeekFrom::Start(list_offset))?;
    let mut buf = vec![0u8; list_len as usize];
    r.read_exact(&mut buf)?;
    let mut cursor = Cursor::new(buf);
    let records = (0..count)
        .map(|_| Record::read_from(&mut cursor))
        .collect::<std::io::Result<Vec<_>>>()?;

    let index = parse(records, file_len)?;
    debug!(
        records = count,
        entries = index.entry_count(),
        folders = index.folder_count(),
        "parsed entry list"
    );
    Ok((header, index))
}

/// Rebuilds the folder and entry sets from a record stream. Every entry must
/// end within `file_len`.
pub fn parse(records: impl IntoIterator<Item = Record>, file_len: u64) -> Result<Index> {
    let mut index = Index::new();
    let mut stack: Vec<FolderPath> = Vec::new();
    let mut current = FolderPath::root();

    for record in records {
        if record.is_pop() {
            current = stack.pop().unwrap_or_default();
        } else if record.is_marker() {
            let child = current.append(&record.name);
            index.insert_folder(child.clone());
            stack.push(std::mem::replace(&mut current, child));
        } else {
            let entry = Entry::new(
                current.clone(),
                &record.name,
                record.offset,
                record.size,
                record.timestamp,
            );
            if entry.end() > file_len {
                return Err(PackError::format(format!(
                    "entry {entry} at {} with {} bytes runs past the end of the file ({file_len} bytes)",
                    entry.offset(),
                    entry.size()
                )));
            }
            if !index.insert(entry) {
                debug!(name = %record.name, folder = %current, "dropping duplicate entry");
            }
        }
    }
    Ok(index)
}

/// Flattens the index into records, the inverse of [`parse`].
pub fn serialize(index: &Index) -> Vec<Record> {
    let mut records = Vec::with_capacity(index.entry_count() + index.folder_count() * 2);
    let mut current = FolderPath::root();

    for folder in index.folders() {
        let shared = current.common_depth(folder);
        for _ in shared..current.depth() {
            records.push(Record::pop());
        }
        for name in folder.components().skip(shared) {
            if !fits_name(name) {
                warn!(%folder, "folder name will be truncated on write");
            }
            records.push(Record::push(name));
        }
        for entry in index.entries_in(folder) {
            if !fits_name(entry.name()) {
                warn!(%entry, "entry name will be truncated on write");
            }
            records.push(Record {
                offset: entry.offset(),
                size: entry.size(),
                name: entry.name().to_string(),
                timestamp: entry.timestamp(),
            });
        }
        current = folder.clone();
    }
    for _ in 0..current.depth() {
        records.push(Record::pop());
    }
    records
}
