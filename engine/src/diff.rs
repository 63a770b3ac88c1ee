//! Diff engine.
//!
//! `delta(new, old)` computes the additions, modifications and deletions
//! that turn `old` into `new`, as a folder tree of its own:
//! - new folders are copied wholesale
//! - files are re-copied when new or strictly newer by modification time
//! - names that vanished are recorded in `deleted` at the level they
//!   vanished from, without descending into them
//!
//! Content is never compared. A size change with an unchanged or older
//! modification time goes unnoticed.

use crate::tree::{Entry, Folder};

/// Compute the delta of `new` against `old`. The result is named after `new`.
pub fn delta(new: &Folder, old: &Folder) -> Folder {
    let mut result = Folder::new(new.name.clone());

    for (name, entry) in new.contents() {
        match (entry, old.get(name)) {
            (Entry::Folder(new_folder), Some(Entry::Folder(old_folder))) => {
                let partial = delta(new_folder, old_folder);
                if !partial.is_empty() {
                    result.add_folder(partial);
                }
            }
            (Entry::Folder(_), _) => result.insert(entry.clone()),
            (Entry::File(new_file), Some(Entry::File(old_file))) => {
                if new_file.modified_time > old_file.modified_time {
                    result.insert(entry.clone());
                }
            }
            (Entry::File(_), _) => result.insert(entry.clone()),
        }
    }

    for (name, entry) in old.contents() {
        if new.get(name).is_none() {
            result.record_deletion(name.clone(), entry.kind());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{EntryKind, FileEntry};
    use chrono::{DateTime, TimeZone, Utc};
    use std::ffi::OsString;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn file(name: &str, secs: i64, size: u64) -> FileEntry {
        FileEntry::new(name, at(secs), size)
    }

    fn sample_tree() -> Folder {
        let mut nested = Folder::new("nested");
        nested.add_file(file("deep.txt", 10, 4));
        let mut docs = Folder::new("docs");
        docs.add_file(file("readme.md", 10, 100));
        docs.add_folder(nested);
        let mut root = Folder::new("root");
        root.add_file(file("top.txt", 10, 7));
        root.add_folder(docs);
        root
    }

    fn assert_no_changes(folder: &Folder) {
        assert!(folder.is_empty(), "expected no changes in {:?}", folder);
    }

    #[test]
    fn test_identical_trees_produce_empty_delta() {
        let tree = sample_tree();
        let result = delta(&tree, &tree);

        assert_eq!(result.name, "root");
        assert_no_changes(&result);
    }

    #[test]
    fn test_disjoint_trees() {
        let mut new = Folder::new("root");
        new.add_file(file("a.txt", 1, 1));
        new.add_folder(Folder::new("pics"));
        let mut old = Folder::new("root");
        old.add_file(file("b.txt", 1, 1));
        old.add_folder(Folder::new("music"));

        let result = delta(&new, &old);

        assert_eq!(result.contents(), new.contents());
        assert_eq!(result.deleted().len(), 2);
        assert_eq!(result.deletion_of("b.txt"), Some(EntryKind::File));
        assert_eq!(result.deletion_of("music"), Some(EntryKind::Folder));
    }

    #[test]
    fn test_modification_detected_only_for_newer_mtime() {
        let mut old = Folder::new("root");
        old.add_file(file("newer.txt", 5, 10));
        old.add_file(file("same.txt", 5, 10));
        old.add_file(file("older.txt", 5, 10));
        let mut new = Folder::new("root");
        new.add_file(file("newer.txt", 6, 10));
        new.add_file(file("same.txt", 5, 999));
        new.add_file(file("older.txt", 4, 1));

        let result = delta(&new, &old);

        assert_eq!(result.file_names(), vec![OsString::from("newer.txt")]);
        assert!(result.deleted().is_empty());
    }

    #[test]
    fn test_nested_change_keeps_only_changed_path() {
        let old = sample_tree();
        let mut new = sample_tree();
        let docs = new.folder_mut("docs").unwrap();
        docs.folder_mut("nested")
            .unwrap()
            .add_file(file("deep.txt", 20, 4));

        let result = delta(&new, &old);

        assert!(result.file_names().is_empty());
        let docs_delta = match result.get("docs") {
            Some(Entry::Folder(folder)) => folder,
            other => panic!("expected docs delta, got {:?}", other),
        };
        assert!(docs_delta.get("readme.md").is_none());
        match docs_delta.get("nested") {
            Some(Entry::Folder(nested)) => {
                assert_eq!(nested.file_names(), vec![OsString::from("deep.txt")])
            }
            other => panic!("expected nested delta, got {:?}", other),
        }
    }

    #[test]
    fn test_deletion_recorded_at_its_level_without_recursion() {
        let old = sample_tree();
        let mut new = sample_tree();
        new.folder_mut("docs").unwrap().remove("nested");

        let result = delta(&new, &old);

        let docs_delta = match result.get("docs") {
            Some(Entry::Folder(folder)) => folder,
            other => panic!("expected docs delta, got {:?}", other),
        };
        assert!(docs_delta.contents().is_empty());
        assert_eq!(docs_delta.deleted().len(), 1);
        assert_eq!(docs_delta.deletion_of("nested"), Some(EntryKind::Folder));
        assert!(result.deleted().is_empty());
    }

    #[test]
    fn test_new_folder_copied_wholesale() {
        let old = Folder::new("root");
        let new = sample_tree();

        let result = delta(&new, &old);

        assert_eq!(result.get("docs"), new.get("docs"));
        assert_eq!(result.file_count(), 3);
    }

    #[test]
    fn test_type_change_is_an_addition() {
        let mut old = Folder::new("root");
        old.add_file(file("thing", 1, 1));
        let mut new = Folder::new("root");
        let mut thing = Folder::new("thing");
        thing.add_file(file("inside.txt", 1, 1));
        new.add_folder(thing);

        let result = delta(&new, &old);

        assert!(matches!(result.get("thing"), Some(Entry::Folder(_))));
        assert!(result.deleted().is_empty());
    }

    #[test]
    fn test_scenario_delete_modify_add() {
        let mut old = Folder::new("root");
        old.add_file(file("a.txt", 1, 1));
        old.add_file(file("b.txt", 1, 1));
        let mut new = Folder::new("root");
        new.add_file(file("b.txt", 2, 1));
        new.add_file(file("c.txt", 3, 1));

        let result = delta(&new, &old);

        assert_eq!(
            result.file_names(),
            vec![OsString::from("b.txt"), OsString::from("c.txt")]
        );
        assert_eq!(result.deleted().len(), 1);
        assert_eq!(result.deletion_of("a.txt"), Some(EntryKind::File));
    }
}
