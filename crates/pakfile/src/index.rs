//! In-memory folder and entry sets of an archive.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    entry::Entry,
    error::PackError,
    filter::PathFilter,
    folder::FolderPath,
    Result,
};

/// Sorted folder set plus sorted entry set. The root folder is always
/// present and every entry's folder is in the folder set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    folders: BTreeSet<FolderPath>,
    entries: BTreeSet<Entry>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            folders: BTreeSet::from([FolderPath::root()]),
            entries: BTreeSet::new(),
        }
    }
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folders(&self) -> impl Iterator<Item = &FolderPath> {
        self.folders.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.entries.contains(entry)
    }

    /// The stored entry with the same identity as `entry`.
    pub fn get(&self, entry: &Entry) -> Option<&Entry> {
        self.entries.get(entry)
    }

    pub fn contains_folder(&self, folder: &FolderPath) -> bool {
        self.folders.contains(folder)
    }

    pub fn list_entries(&self, filter: &PathFilter) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| filter.matches(&e.path()))
            .cloned()
            .collect()
    }

    pub fn list_folders(&self, filter: &PathFilter) -> Vec<FolderPath> {
        self.folders
            .iter()
            .filter(|f| filter.matches(f.path()))
            .cloned()
            .collect()
    }

    /// Entries owned directly by `folder`, in entry order.
    pub fn entries_in<'a>(&'a self, folder: &'a FolderPath) -> impl Iterator<Item = &'a Entry> {
        self.entries
            .range(Entry::lower_bound(folder.clone(), "")..)
            .take_while(move |e| e.folder() == folder)
    }

    /// First entry (in entry order) whose full path equals `path`, ignoring case.
    pub fn find(&self, path: &str) -> Result<&Entry> {
        let full = FolderPath::new(path);
        if full.is_root() {
            return Err(PackError::NotFound(path.to_string()));
        }
        let (folder, name) = (full.parent(), full.name());
        self.entries
            .range(Entry::lower_bound(folder.clone(), name)..)
            .next()
            .filter(|e| e.has_path(&folder, name))
            .ok_or_else(|| PackError::NotFound(path.to_string()))
    }

    /// Adds `folder` together with any missing ancestors. Returns true if
    /// anything was added.
    pub fn insert_folder(&mut self, folder: FolderPath) -> bool {
        let mut added = false;
        for ancestor in folder.ancestors() {
            added |= self.folders.insert(ancestor);
        }
        added | self.folders.insert(folder)
    }

    /// Adds an entry, creating its folder if needed. Returns false if an
    /// entry with the same identity was already present.
    pub fn insert(&mut self, entry: Entry) -> bool {
        self.insert_folder(entry.folder().clone());
        self.entries.insert(entry)
    }

    pub fn remove(&mut self, entry: &Entry) -> Result<Entry> {
        self.entries
            .take(entry)
            .ok_or_else(|| PackError::NotFound(entry.path()))
    }

    /// Returns the replacement entry, or `None` when the rename changes
    /// nothing.
    pub fn rename(&mut self, entry: &Entry, new_name: &str) -> Result<Option<Entry>> {
        self.replace(entry, |current| current.renamed(new_name))
    }

    /// Moves `entry` under `destination`, which is added to the folder set
    /// on success.
    pub fn move_entry(&mut self, entry: &Entry, destination: &FolderPath) -> Result<Option<Entry>> {
        let replaced = self.replace(entry, |current| current.moved_to(destination.clone()))?;
        if replaced.is_some() {
            self.insert_folder(destination.clone());
        }
        Ok(replaced)
    }

    /// The candidate is built from the stored entry so its offset is kept
    /// even if the caller's copy is stale.
    fn replace(
        &mut self,
        entry: &Entry,
        change: impl FnOnce(&Entry) -> Entry,
    ) -> Result<Option<Entry>> {
        let Some(current) = self.entries.get(entry) else {
            return Err(PackError::NotFound(entry.path()));
        };
        let candidate = change(current);
        if candidate == *current {
            return Ok(None);
        }
        if self.entries.contains(&candidate) {
            return Err(PackError::AlreadyExists(candidate.path()));
        }
        let current = current.clone();
        self.entries.remove(&current);
        debug!(from = %current, to = %candidate, "replacing entry");
        self.entries.insert(candidate.clone());
        Ok(Some(candidate))
    }

    /// Removes every non-root folder that owns no entry and has nothing below
    /// it. Runs to a fixed point: a chain of empty folders goes in one call.
    /// Returns the number of folders removed.
    pub fn delete_empty_folders(&mut self) -> usize {
        let mut keep = BTreeSet::from([FolderPath::root()]);
        for entry in &self.entries {
            let folder = entry.folder();
            if keep.insert(folder.clone()) {
                keep.extend(folder.ancestors());
            }
        }
        let before = self.folders.len();
        self.folders.retain(|folder| {
            let retained = keep.contains(folder);
            if !retained {
                debug!(%folder, "pruning empty folder");
            }
            retained
        });
        before - self.folders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(path: &str, size: u32, timestamp: i32) -> Entry {
        let full = FolderPath::new(path);
        Entry::new(full.parent(), full.name(), 16, size, timestamp)
    }

    fn index(entries: &[Entry]) -> Index {
        let mut index = Index::new();
        for e in entries {
            index.insert(e.clone());
        }
        index
    }

    fn folder_paths(index: &Index) -> Vec<String> {
        index.folders().map(|f| f.path().to_string()).collect()
    }

    #[test]
    fn root_is_always_present() {
        assert_eq!(folder_paths(&Index::new()), vec![""]);
    }

    #[test]
    fn insert_adds_missing_ancestors() {
        let index = index(&[entry("a\\b\\c\\x.bin", 1, 0)]);
        assert_eq!(folder_paths(&index), vec!["a", "a\\b", "a\\b\\c", ""]);
    }

    #[test]
    fn find_ignores_case() {
        let index = index(&[entry("data\\sub\\x.bin", 4, 0), entry("root.txt", 5, 1000)]);
        assert_eq!(index.find("DATA/SUB/X.BIN").unwrap().size(), 4);
        assert_eq!(index.find("root.txt").unwrap().timestamp(), 1000);
        assert!(matches!(index.find("missing"), Err(PackError::NotFound(_))));
        assert!(matches!(index.find(""), Err(PackError::NotFound(_))));
        assert!(matches!(index.find("data\\sub"), Err(PackError::NotFound(_))));
    }

    #[test]
    fn find_returns_first_of_same_path() {
        let index = index(&[entry("a.txt", 9, 20), entry("A.TXT", 3, 10)]);
        assert_eq!(index.find("a.txt").unwrap().timestamp(), 10);
    }

    #[test]
    fn entries_in_lists_direct_children_only() {
        let index = index(&[
            entry("a\\one", 1, 0),
            entry("a\\two", 1, 0),
            entry("a\\b\\deep", 1, 0),
            entry("top", 1, 0),
        ]);
        let folder_a = FolderPath::new("a");
        let names: Vec<_> = index
            .entries_in(&folder_a)
            .map(Entry::name)
            .collect();
        assert_eq!(names, vec!["one", "two"]);
        let root = FolderPath::root();
        let names: Vec<_> = index
            .entries_in(&root)
            .map(Entry::name)
            .collect();
        assert_eq!(names, vec!["top"]);
    }

    #[test]
    fn rename_to_same_name_is_noop() {
        let e = entry("a\\x.bin", 1, 0);
        let mut index = index(&[e.clone()]);
        let before = index.clone();
        assert!(index.rename(&e, "x.bin").unwrap().is_none());
        assert!(index.rename(&e, "X.BIN").unwrap().is_none());
        assert_eq!(index, before);
    }

    #[test]
    fn rename_replaces_entry() {
        let e = entry("a\\x.bin", 1, 0);
        let mut index = index(&[e.clone()]);
        let renamed = index.rename(&e, "y.bin").unwrap().unwrap();
        assert_eq!(renamed.path(), "a\\y.bin");
        assert_eq!(renamed.offset(), e.offset());
        assert!(index.find("a\\x.bin").is_err());
        assert_eq!(index.find("a\\y.bin").unwrap(), &renamed);
    }

    #[test]
    fn rename_conflict_leaves_index_unchanged() {
        let x = entry("a\\x.bin", 1, 0);
        let y = entry("a\\y.bin", 1, 0);
        let mut index = index(&[x.clone(), y]);
        let before = index.clone();
        assert!(matches!(
            index.rename(&x, "Y.bin"),
            Err(PackError::AlreadyExists(_))
        ));
        assert_eq!(index, before);
    }

    #[test]
    fn rename_missing_entry_fails() {
        let mut index = Index::new();
        assert!(matches!(
            index.rename(&entry("x", 1, 0), "y"),
            Err(PackError::NotFound(_))
        ));
    }

    #[test]
    fn move_inserts_destination() {
        let e = entry("x.bin", 1, 0);
        let mut index = index(&[e.clone()]);
        let moved = index
            .move_entry(&e, &FolderPath::new("new\\place"))
            .unwrap()
            .unwrap();
        assert_eq!(moved.path(), "new\\place\\x.bin");
        assert_eq!(folder_paths(&index), vec!["new", "new\\place", ""]);
    }

    #[test]
    fn move_conflict_does_not_add_folder() {
        let x = entry("x.bin", 1, 0);
        let mut index = index(&[x.clone(), entry("d\\x.bin", 1, 0)]);
        assert!(matches!(
            index.move_entry(&x, &FolderPath::new("D")),
            Err(PackError::AlreadyExists(_))
        ));
        let mut index2 = Index::new();
        index2.insert(x.clone());
        assert!(index2.move_entry(&x, &FolderPath::root()).unwrap().is_none());
        assert_eq!(folder_paths(&index2), vec![""]);
    }

    #[test]
    fn prune_keeps_ancestors_of_entries() {
        let mut index = index(&[entry("keep\\a\\b\\c\\deep.bin", 1, 0)]);
        index.insert_folder(FolderPath::new("empty\\chain\\leaf"));
        index.insert_folder(FolderPath::new("keep\\sibling"));
        assert_eq!(index.delete_empty_folders(), 4);
        assert_eq!(
            folder_paths(&index),
            vec!["keep", "keep\\a", "keep\\a\\b", "keep\\a\\b\\c", ""]
        );
        assert_eq!(index.delete_empty_folders(), 0);
    }

    #[test]
    fn remove_drops_entry_but_keeps_folder() {
        let e = entry("d\\x.bin", 1, 0);
        let mut index = index(&[e.clone()]);
        index.remove(&e).unwrap();
        assert_eq!(index.entry_count(), 0);
        assert!(index.contains_folder(&FolderPath::new("d")));
        assert!(matches!(index.remove(&e), Err(PackError::NotFound(_))));
    }
}
