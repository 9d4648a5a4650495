pub mod archive;
pub mod entry;
pub mod error;
pub mod extract;
pub mod filter;
pub mod folder;
pub mod index;
pub mod record;
pub mod tree;

pub use archive::{Archive, Direction, OpenMode, Storage};
pub use entry::{Entry, EntryReader, EntryWriter};
pub use error::{PackError, Result};
pub use extract::{ExtractSummary, Extraction};
pub use filter::PathFilter;
pub use folder::FolderPath;
pub use index::Index;

const MAGIC_NUMBER: [u8; 4] = *b"PACK";
const FORMAT_VERSION: u32 = 2;

/// Byte length of the fixed header at the start of every archive.
pub const HEADER_LEN: u64 = 16;
/// Byte length of one record in the entry list.
pub const RECORD_LEN: u64 = 44;
