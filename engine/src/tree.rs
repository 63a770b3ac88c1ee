//! In-memory model of a directory subtree.
//!
//! A tree is made of two entry variants:
//! - FileEntry: a leaf carrying modification time and size
//! - Folder: named children plus a registry of children deleted since the
//!   last reconciliation
//!
//! The same types describe a live scan, a persisted snapshot and a delta.
//!
//! Names are kept as `OsString` so entries that are not valid UTF-8 still
//! map back to the exact path on disk.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single node of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    File(FileEntry),
    Folder(Folder),
}

impl Entry {
    pub fn name(&self) -> &OsStr {
        match self {
            Entry::File(file) => &file.name,
            Entry::Folder(folder) => &folder.name,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::File(_) => EntryKind::File,
            Entry::Folder(_) => EntryKind::Folder,
        }
    }

    /// Size in bytes; folders sum their children on demand.
    pub fn size(&self) -> u64 {
        match self {
            Entry::File(file) => file.size,
            Entry::Folder(folder) => folder.size(),
        }
    }
}

/// Tag recorded in a folder's deletion registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Folder => write!(f, "Folder"),
            EntryKind::File => write!(f, "File"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(with = "name_serde")]
    pub name: OsString,
    pub modified_time: DateTime<Utc>,
    pub size: u64,
}

impl FileEntry {
    pub fn new(name: impl Into<OsString>, modified_time: DateTime<Utc>, size: u64) -> Self {
        FileEntry {
            name: name.into(),
            modified_time,
            size,
        }
    }
}

/// A directory and its immediate children.
///
/// Invariant: a name is never present in both `contents` and `deleted`.
/// The fields are private so every mutation goes through the methods that
/// keep it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    #[serde(with = "name_serde")]
    pub name: OsString,
    #[serde(with = "contents_serde")]
    contents: BTreeMap<OsString, Entry>,
    #[serde(with = "deleted_serde")]
    deleted: BTreeMap<OsString, EntryKind>,
}

impl Folder {
    pub fn new(name: impl Into<OsString>) -> Self {
        Folder {
            name: name.into(),
            contents: BTreeMap::new(),
            deleted: BTreeMap::new(),
        }
    }

    pub fn contents(&self) -> &BTreeMap<OsString, Entry> {
        &self.contents
    }

    pub fn deleted(&self) -> &BTreeMap<OsString, EntryKind> {
        &self.deleted
    }

    pub fn get(&self, name: impl AsRef<OsStr>) -> Option<&Entry> {
        self.contents.get(name.as_ref())
    }

    /// Kind recorded for `name` in the deletion registry, if any.
    pub fn deletion_of(&self, name: impl AsRef<OsStr>) -> Option<EntryKind> {
        self.deleted.get(name.as_ref()).copied()
    }

    /// Insert a child, replacing any same-named one and clearing a stale
    /// deletion record for that name.
    pub fn insert(&mut self, entry: Entry) {
        let name = entry.name().to_os_string();
        self.deleted.remove(&name);
        self.contents.insert(name, entry);
    }

    pub fn add_file(&mut self, file: FileEntry) {
        self.insert(Entry::File(file));
    }

    pub fn add_folder(&mut self, folder: Folder) {
        self.insert(Entry::Folder(folder));
    }

    pub fn remove(&mut self, name: impl AsRef<OsStr>) -> Option<Entry> {
        self.contents.remove(name.as_ref())
    }

    /// Record that `name` disappeared from this folder.
    pub fn record_deletion(&mut self, name: impl Into<OsString>, kind: EntryKind) {
        let name = name.into();
        self.contents.remove(&name);
        self.deleted.insert(name, kind);
    }

    /// Move every deletion record out, leaving the registry empty.
    pub fn take_deleted(&mut self) -> BTreeMap<OsString, EntryKind> {
        std::mem::take(&mut self.deleted)
    }

    /// Return the child folder `name`, creating an empty one if it is missing
    /// or currently a file.
    pub fn folder_entry(&mut self, name: impl AsRef<OsStr>) -> &mut Folder {
        let name = name.as_ref();
        let needs_folder = !matches!(self.contents.get(name), Some(Entry::Folder(_)));
        if needs_folder {
            self.insert(Entry::Folder(Folder::new(name)));
        }
        match self.contents.get_mut(name) {
            Some(Entry::Folder(folder)) => folder,
            _ => unreachable!("folder entry was just inserted"),
        }
    }

    pub fn folder_mut(&mut self, name: impl AsRef<OsStr>) -> Option<&mut Folder> {
        match self.contents.get_mut(name.as_ref()) {
            Some(Entry::Folder(folder)) => Some(folder),
            _ => None,
        }
    }

    /// Names of child folders, collected so callers can mutate while walking.
    pub fn folder_names(&self) -> Vec<OsString> {
        self.contents
            .values()
            .filter(|entry| matches!(entry, Entry::Folder(_)))
            .map(|entry| entry.name().to_os_string())
            .collect()
    }

    /// Names of child files, collected so callers can mutate while walking.
    pub fn file_names(&self) -> Vec<OsString> {
        self.contents
            .values()
            .filter(|entry| matches!(entry, Entry::File(_)))
            .map(|entry| entry.name().to_os_string())
            .collect()
    }

    pub fn size(&self) -> u64 {
        self.contents.values().map(Entry::size).sum()
    }

    /// True when this level holds neither children nor deletion records.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.deleted.is_empty()
    }

    /// Number of files, folders and deletion records in the whole subtree.
    pub fn pending_count(&self) -> usize {
        let children: usize = self
            .contents
            .values()
            .map(|entry| match entry {
                Entry::File(_) => 1,
                Entry::Folder(folder) => 1 + folder.pending_count(),
            })
            .sum();
        children + self.deleted.len()
    }

    /// Number of deletion records in the whole subtree.
    pub fn deletion_count(&self) -> usize {
        let nested: usize = self
            .contents
            .values()
            .map(|entry| match entry {
                Entry::File(_) => 0,
                Entry::Folder(folder) => folder.deletion_count(),
            })
            .sum();
        nested + self.deleted.len()
    }

    /// Number of files in the whole subtree.
    pub fn file_count(&self) -> usize {
        self.contents
            .values()
            .map(|entry| match entry {
                Entry::File(_) => 1,
                Entry::Folder(folder) => folder.file_count(),
            })
            .sum()
    }
}

/// Names that are valid UTF-8 are written as plain strings; anything else
/// keeps its raw platform encoding.
mod name_serde {
    use std::ffi::{OsStr, OsString};

    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Bytes { bytes: Vec<u8> },
        Wide { wide: Vec<u16> },
    }

    pub fn serialize<N, S>(name: &N, serializer: S) -> Result<S::Ok, S::Error>
    where
        N: AsRef<OsStr> + ?Sized,
        S: Serializer,
    {
        encode(name.as_ref()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OsString, D::Error>
    where
        D: Deserializer<'de>,
    {
        decode(Repr::deserialize(deserializer)?).map_err(de::Error::custom)
    }

    fn encode(name: &OsStr) -> Repr {
        match name.to_str() {
            Some(text) => Repr::Text(text.to_owned()),
            None => raw(name),
        }
    }

    #[cfg(unix)]
    fn raw(name: &OsStr) -> Repr {
        use std::os::unix::ffi::OsStrExt;
        Repr::Bytes {
            bytes: name.as_bytes().to_vec(),
        }
    }

    #[cfg(windows)]
    fn raw(name: &OsStr) -> Repr {
        use std::os::windows::ffi::OsStrExt;
        Repr::Wide {
            wide: name.encode_wide().collect(),
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn raw(name: &OsStr) -> Repr {
        Repr::Text(name.to_string_lossy().into_owned())
    }

    fn decode(repr: Repr) -> Result<OsString, &'static str> {
        match repr {
            Repr::Text(text) => Ok(OsString::from(text)),
            #[cfg(unix)]
            Repr::Bytes { bytes } => {
                use std::os::unix::ffi::OsStringExt;
                Ok(OsString::from_vec(bytes))
            }
            #[cfg(windows)]
            Repr::Wide { wide } => {
                use std::os::windows::ffi::OsStringExt;
                Ok(OsString::from_wide(&wide))
            }
            _ => Err("entry name was recorded on another platform"),
        }
    }
}

/// Children are written as a list; each entry carries its own name.
mod contents_serde {
    use std::collections::BTreeMap;
    use std::ffi::OsString;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::Entry;

    pub fn serialize<S>(
        contents: &BTreeMap<OsString, Entry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(contents.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<OsString, Entry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut contents = BTreeMap::new();
        for entry in Vec::<Entry>::deserialize(deserializer)? {
            let name = entry.name().to_os_string();
            if contents.insert(name, entry).is_some() {
                return Err(de::Error::custom("duplicate entry name in folder"));
            }
        }
        Ok(contents)
    }
}

mod deleted_serde {
    use std::collections::BTreeMap;
    use std::ffi::OsString;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{name_serde, EntryKind};

    #[derive(Serialize)]
    struct RecordRef<'a> {
        #[serde(serialize_with = "name_serde::serialize")]
        name: &'a OsString,
        kind: EntryKind,
    }

    #[derive(Deserialize)]
    struct Record {
        #[serde(deserialize_with = "name_serde::deserialize")]
        name: OsString,
        kind: EntryKind,
    }

    pub fn serialize<S>(
        deleted: &BTreeMap<OsString, EntryKind>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(deleted.iter().map(|(name, kind)| RecordRef {
            name,
            kind: *kind,
        }))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<OsString, EntryKind>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let records = Vec::<Record>::deserialize(deserializer)?;
        Ok(records.into_iter().map(|record| (record.name, record.kind)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_folder_size_sums_recursively() {
        let mut inner = Folder::new("inner");
        inner.add_file(FileEntry::new("b.bin", at(1), 30));
        inner.record_deletion("old.bin", EntryKind::File);
        let mut root = Folder::new("root");
        root.add_file(FileEntry::new("a.bin", at(1), 12));
        root.add_folder(inner);

        assert_eq!(root.size(), 42);
        assert_eq!(root.file_count(), 2);
        assert_eq!(root.deletion_count(), 1);
        assert_eq!(root.pending_count(), 4);
    }

    #[test]
    fn test_insert_clears_stale_deletion() {
        let mut root = Folder::new("root");
        root.record_deletion("a.txt", EntryKind::File);
        assert_eq!(root.deletion_of("a.txt"), Some(EntryKind::File));

        root.add_file(FileEntry::new("a.txt", at(5), 1));
        assert!(root.deleted().is_empty());
        assert!(root.get("a.txt").is_some());
    }

    #[test]
    fn test_record_deletion_removes_from_contents() {
        let mut root = Folder::new("root");
        root.add_folder(Folder::new("docs"));
        root.record_deletion("docs", EntryKind::Folder);

        assert!(root.get("docs").is_none());
        assert_eq!(root.deletion_of("docs"), Some(EntryKind::Folder));
        assert!(!root.is_empty());
    }

    #[test]
    fn test_folder_entry_replaces_file_of_same_name() {
        let mut root = Folder::new("root");
        root.add_file(FileEntry::new("x", at(1), 3));

        root.folder_entry("x").add_file(FileEntry::new("y", at(1), 4));

        assert!(matches!(root.get("x"), Some(Entry::Folder(_))));
        assert_eq!(root.size(), 4);
    }

    #[test]
    fn test_name_lists_split_by_kind() {
        let mut root = Folder::new("root");
        root.add_file(FileEntry::new("f1", at(1), 1));
        root.add_folder(Folder::new("d1"));
        root.add_file(FileEntry::new("f2", at(1), 1));

        assert_eq!(
            root.file_names(),
            vec![OsString::from("f1"), OsString::from("f2")]
        );
        assert_eq!(root.folder_names(), vec![OsString::from("d1")]);
    }

    #[test]
    fn test_tree_serializes_lists_with_names() {
        let mut root = Folder::new("root");
        root.add_file(FileEntry::new("a.txt", at(1), 2));
        root.record_deletion("old", EntryKind::Folder);

        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["name"], "root");
        assert_eq!(json["contents"][0]["name"], "a.txt");
        assert_eq!(json["contents"][0]["kind"], "file");
        assert_eq!(json["deleted"][0]["name"], "old");
        assert_eq!(json["deleted"][0]["kind"], "folder");

        let back: Folder = serde_json::from_value(json).unwrap();
        assert_eq!(back, root);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_survive_serialization() {
        use std::os::unix::ffi::OsStrExt;

        let latin1 = OsStr::from_bytes(b"caf\xe9.txt");
        let stray = OsStr::from_bytes(b"caf\xff.txt");
        let mut root = Folder::new("root");
        root.add_file(FileEntry::new(latin1, at(1), 1));
        root.add_file(FileEntry::new(stray, at(1), 2));
        root.record_deletion(OsStr::from_bytes(b"gone\xfe"), EntryKind::File);

        let json = serde_json::to_string(&root).unwrap();
        let back: Folder = serde_json::from_str(&json).unwrap();

        assert_eq!(back.file_names().len(), 2);
        assert_eq!(back.get(latin1).map(Entry::size), Some(1));
        assert_eq!(back.get(stray).map(Entry::size), Some(2));
        assert_eq!(
            back.deletion_of(OsStr::from_bytes(b"gone\xfe")),
            Some(EntryKind::File)
        );
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let json = r#"{"name":"root","contents":[
            {"kind":"file","name":"a","modified_time":"2024-01-01T00:00:00Z","size":1},
            {"kind":"file","name":"a","modified_time":"2024-01-01T00:00:00Z","size":2}
        ],"deleted":[]}"#;
        assert!(serde_json::from_str::<Folder>(json).is_err());
    }
}
