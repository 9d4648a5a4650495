//! Normalized, case-insensitive folder paths.
//!
//! Folders are stored backslash-joined. The ordering defined here is what the
//! entry list writer depends on: walking folders in order visits a parent
//! before anything below it, siblings in name order, and the root last.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Serialize, Serializer};

pub const SEPARATOR: char = '\\';

#[derive(Debug, Clone, Default)]
pub struct FolderPath {
    path: String,
    folded: String,
}

impl FolderPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Accepts `/` and `\`, drops leading, trailing and repeated separators.
    pub fn new(raw: &str) -> Self {
        let path = raw
            .split(['/', SEPARATOR])
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\\");
        let folded = path.to_lowercase();
        Self { path, folded }
    }

    pub fn append(&self, name: &str) -> Self {
        if self.is_root() {
            Self::new(name)
        } else {
            Self::new(&format!("{}{SEPARATOR}{name}", self.path))
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Self {
        match self.path.rsplit_once(SEPARATOR) {
            Some((parent, _)) => Self::new(parent),
            None => Self::root(),
        }
    }

    /// Last component, empty for the root.
    pub fn name(&self) -> &str {
        match self.path.rsplit_once(SEPARATOR) {
            Some((_, name)) => name,
            None => &self.path,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.split(SEPARATOR).filter(|part| !part.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// True when `other` lies strictly below this folder.
    pub fn is_ancestor_of(&self, other: &FolderPath) -> bool {
        if other.is_root() {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.folded.len() > self.folded.len()
            && other.folded.starts_with(&self.folded)
            && other.folded[self.folded.len()..].starts_with(SEPARATOR)
    }

    /// Every strict ancestor, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = FolderPath> {
        let mut next = (!self.is_root()).then(|| self.parent());
        std::iter::from_fn(move || {
            let current = next.take()?;
            if !current.is_root() {
                next = Some(current.parent());
            }
            Some(current)
        })
    }

    /// Number of leading components shared with `other`, compared without case.
    pub fn common_depth(&self, other: &FolderPath) -> usize {
        self.folded
            .split(SEPARATOR)
            .zip(other.folded.split(SEPARATOR))
            .take_while(|(a, b)| !a.is_empty() && a == b)
            .count()
    }

    pub(crate) fn folded(&self) -> &str {
        &self.folded
    }
}

impl From<&str> for FolderPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl Serialize for FolderPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

impl PartialEq for FolderPath {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for FolderPath {}

impl Hash for FolderPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl Ord for FolderPath {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_root(), other.is_root()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        for (a, b) in self.folded.chars().zip(other.folded.chars()) {
            if a == b {
                continue;
            }
            return match (a == SEPARATOR, b == SEPARATOR) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => a.cmp(&b),
            };
        }
        self.folded
            .chars()
            .count()
            .cmp(&other.folded.chars().count())
    }
}

impl PartialOrd for FolderPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn normalizes_separators() {
        let folder = FolderPath::new("/Data//Textures/");
        assert_eq!(folder.path(), "Data\\Textures");
        assert_eq!(FolderPath::new("\\"), FolderPath::root());
        assert_eq!(folder.name(), "Textures");
        assert_eq!(folder.depth(), 2);
    }

    #[test]
    fn equality_ignores_case() {
        assert_eq!(FolderPath::new("DATA\\Sub"), FolderPath::new("data/sub"));
        assert_eq!(FolderPath::new("DATA\\Sub").path(), "DATA\\Sub");
    }

    #[test]
    fn parent_of_single_component_is_root() {
        assert!(FolderPath::new("data").parent().is_root());
        assert!(FolderPath::root().parent().is_root());
        assert_eq!(FolderPath::new("a\\b\\c").parent(), FolderPath::new("a\\b"));
    }

    #[test]
    fn append_builds_child() {
        let child = FolderPath::root().append("data").append("sub");
        assert_eq!(child.path(), "data\\sub");
        assert_eq!(child.parent().path(), "data");
    }

    #[test]
    fn ancestors_end_at_root() {
        let ancestors: Vec<_> = FolderPath::new("a\\b\\c").ancestors().collect();
        assert_eq!(
            ancestors,
            vec![FolderPath::new("a\\b"), FolderPath::new("a"), FolderPath::root()]
        );
        assert_eq!(FolderPath::root().ancestors().count(), 0);
    }

    #[test]
    fn ancestor_requires_component_boundary() {
        let data = FolderPath::new("data");
        assert!(data.is_ancestor_of(&FolderPath::new("DATA\\x")));
        assert!(!data.is_ancestor_of(&FolderPath::new("database")));
        assert!(!data.is_ancestor_of(&data));
        assert!(FolderPath::root().is_ancestor_of(&data));
    }

    #[test]
    fn common_depth_counts_shared_components() {
        let a = FolderPath::new("a\\b\\c");
        assert_eq!(a.common_depth(&FolderPath::new("A\\B\\d")), 2);
        assert_eq!(a.common_depth(&FolderPath::new("ab")), 0);
        assert_eq!(a.common_depth(&FolderPath::root()), 0);
    }

    #[test]
    fn order_is_preorder_with_root_last() {
        let folders: BTreeSet<FolderPath> = ["", "a b", "a", "a\\z", "a\\b\\c", "a\\b", "B"]
            .into_iter()
            .map(FolderPath::new)
            .collect();
        let order: Vec<_> = folders.iter().map(FolderPath::path).collect();
        assert_eq!(order, vec!["a", "a\\b", "a\\b\\c", "a\\z", "a b", "B", ""]);
    }

    fn folder_strategy() -> impl Strategy<Value = FolderPath> {
        proptest::collection::vec("[a-cA-C _.]{1,3}", 0..4)
            .prop_map(|parts| FolderPath::new(&parts.join("\\")))
    }

    proptest! {
        #[test]
        fn parent_sorts_before_descendant(folder in folder_strategy()) {
            for ancestor in folder.ancestors().filter(|a| !a.is_root()) {
                prop_assert!(ancestor < folder);
            }
        }

        #[test]
        fn order_is_total_and_transitive(
            a in folder_strategy(),
            b in folder_strategy(),
            c in folder_strategy(),
        ) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }

        #[test]
        fn descendants_stay_inside_their_subtree(
            a in folder_strategy(),
            b in folder_strategy(),
        ) {
            // Anything below `a` sorts between `a` and the next non-descendant.
            if a < b && !a.is_ancestor_of(&b) && !a.is_root() {
                let child = a.append("zz");
                prop_assert!(child < b);
            }
        }
    }
}
