//! Directory tree and path handling shared by both directory layouts.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::{ArgumentError, Result};

/// Deepest directory nesting accepted when reading or writing
pub const MAX_DEPTH: usize = 64;

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Joins a directory path and an entry name with `/`
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}

/// Lookup key for a relative path: separators unified, leading separators dropped, ASCII lowercased.
pub fn index_key(path: &str) -> Box<str> {
    path.trim_start_matches(is_separator)
        .replace('\\', "/")
        .to_ascii_lowercase()
        .into_boxed_str()
}

/// Splits a relative path into its components, accepting both `/` and `\`.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_start_matches(is_separator);
    if trimmed.trim().is_empty() {
        return Err(ArgumentError::EmptyPath.into());
    }

    let components: Vec<&str> = trimmed.split(is_separator).collect();
    let invalid = components
        .iter()
        .any(|c| c.is_empty() || *c == "." || *c == ".." || c.contains('\0'));

    if invalid || components.len() > MAX_DEPTH {
        return Err(ArgumentError::InvalidPath(path.to_owned()).into());
    }

    Ok(components)
}

/// A file inside a [`DirectoryNode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLeaf {
    /// Name as it will be stored
    pub name: String,

    /// Position of the file in the list the tree was built from
    pub entry: usize,
}

/// Owned directory tree assembled from a flat list of relative paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Name as it will be stored, empty for the root
    pub name: String,

    /// Child directories keyed by their lowercased name, in first-seen order
    pub subdirectories: IndexMap<Box<str>, DirectoryNode>,

    /// Files directly inside this directory
    pub files: Vec<FileLeaf>,
}

impl DirectoryNode {
    /// Builds the tree, rejecting empty, malformed and duplicate paths.
    ///
    /// Duplicates are detected case-insensitively. Directories differing only by
    /// case are merged under the first spelling seen.
    pub fn build<'a>(paths: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut root = Self::default();
        let mut seen = HashSet::new();

        for (entry, path) in paths.into_iter().enumerate() {
            let components = split_path(path)?;
            if !seen.insert(index_key(path)) {
                return Err(ArgumentError::DuplicatePath(path.to_owned()).into());
            }

            let Some((file_name, directories)) = components.split_last() else {
                return Err(ArgumentError::EmptyPath.into());
            };

            let mut node = &mut root;
            for directory in directories {
                node = node
                    .subdirectories
                    .entry(index_key(directory))
                    .or_insert_with(|| DirectoryNode {
                        name: (*directory).to_owned(),
                        ..Default::default()
                    });
            }

            node.files.push(FileLeaf {
                name: (*file_name).to_owned(),
                entry,
            });
        }

        Ok(root)
    }

    /// Number of entries (directories and files) directly inside this node
    pub fn entry_count(&self) -> usize {
        self.subdirectories.len() + self.files.len()
    }

    /// Number of files in this node and every node below it
    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .subdirectories
                .values()
                .map(DirectoryNode::file_count)
                .sum::<usize>()
    }
}

/// Deduplicated block of null terminated names
#[derive(Debug, Clone, Default)]
pub struct NamePool {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl NamePool {
    /// An empty pool, the first name lands at offset zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool whose first byte is a lone terminator, so offset zero never names anything
    pub fn with_leading_null() -> Self {
        Self {
            bytes: vec![0],
            ..Default::default()
        }
    }

    /// Offset of `name` within the pool, appending it on first use
    pub fn intern(&mut self, name: &str) -> Result<u32> {
        if let Some(offset) = self.offsets.get(name) {
            return Ok(*offset);
        }

        let offset =
            u32::try_from(self.bytes.len()).map_err(|_| ArgumentError::ArchiveTooLarge)?;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(name.to_owned(), offset);

        Ok(offset)
    }

    /// Size of the pool in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written to the pool
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The pool as it is stored
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{index_key, join, split_path, DirectoryNode, FileLeaf, NamePool};
    use crate::error::{ArgumentError, Error, Result};

    #[test]
    fn join_paths() {
        assert_eq!(join("", "units"), "units");
        assert_eq!(join("units", "armcom.fbi"), "units/armcom.fbi");
    }

    #[test]
    fn index_keys_ignore_case_and_separators() {
        assert_eq!(&*index_key("Units\\ARMCOM.fbi"), "units/armcom.fbi");
        assert_eq!(&*index_key("/units/armcom.fbi"), "units/armcom.fbi");
        assert_eq!(index_key("a/B"), index_key("A\\b"));
    }

    #[test]
    fn split_accepts_both_separators() -> Result<()> {
        assert_eq!(split_path("anims\\armcom/walk.gaf")?, ["anims", "armcom", "walk.gaf"]);
        assert_eq!(split_path("/readme.txt")?, ["readme.txt"]);

        Ok(())
    }

    #[test]
    fn split_rejects_bad_paths() {
        assert!(matches!(
            split_path(""),
            Err(Error::InvalidArgument(ArgumentError::EmptyPath))
        ));
        assert!(matches!(
            split_path("   "),
            Err(Error::InvalidArgument(ArgumentError::EmptyPath))
        ));

        for path in ["units//a.fbi", "units/", "../a.fbi", "units/./a", "a\0b"] {
            assert!(
                matches!(
                    split_path(path),
                    Err(Error::InvalidArgument(ArgumentError::InvalidPath(_)))
                ),
                "{path:?} should be rejected"
            );
        }

        let deep = vec!["d"; super::MAX_DEPTH + 1].join("/");
        assert!(split_path(&deep).is_err());
    }

    #[test]
    fn build_groups_files_by_directory() -> Result<()> {
        let tree = DirectoryNode::build([
            "units/armcom.fbi",
            "readme.txt",
            "Units\\corcom.fbi",
            "units/weapons/laser.tdf",
        ])?;

        assert_eq!(tree.name, "");
        assert_eq!(tree.entry_count(), 2);
        assert_eq!(tree.file_count(), 4);
        assert_eq!(
            tree.files,
            [FileLeaf {
                name: "readme.txt".into(),
                entry: 1
            }]
        );

        let units = &tree.subdirectories["units"];
        assert_eq!(units.name, "units");
        assert_eq!(
            units.files.iter().map(|f| f.entry).collect::<Vec<_>>(),
            [0, 2]
        );
        assert_eq!(units.subdirectories["weapons"].files[0].name, "laser.tdf");

        Ok(())
    }

    #[test]
    fn build_rejects_duplicates_ignoring_case() {
        let result = DirectoryNode::build(["units/a.fbi", "UNITS\\A.FBI"]);

        assert!(matches!(
            result,
            Err(Error::InvalidArgument(ArgumentError::DuplicatePath(path))) if path == "UNITS\\A.FBI"
        ));
    }

    #[test]
    fn name_pool_deduplicates() -> Result<()> {
        let mut pool = NamePool::new();
        assert!(pool.is_empty());

        assert_eq!(pool.intern("units")?, 0);
        assert_eq!(pool.intern("a.fbi")?, 6);
        assert_eq!(pool.intern("units")?, 0);
        assert_eq!(pool.as_bytes(), b"units\0a.fbi\0");

        let mut pool = NamePool::with_leading_null();
        assert_eq!(pool.intern("units")?, 1);
        assert_eq!(pool.len(), 7);

        Ok(())
    }
}
