use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::utils::normalize;

/// Remembered-file set of an incremental concatenation task.
///
/// Maps a normalized source path to its last transformed content, so that a
/// run which only sees the changed files can still emit the whole bundle.
/// Entries are only ever changed through [`put`](Self::put) and
/// [`evict`](Self::evict); nothing expires on its own.
///
/// Iteration follows the sorted order of the normalized paths, which is the
/// same order a fresh glob over the sources would produce.
#[derive(Debug, Default)]
pub struct Remembered {
    entries: Mutex<BTreeMap<Utf8PathBuf, String>>,
}

impl Remembered {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Utf8PathBuf, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the transformed content of `path`, returning the previous one.
    pub fn put(&self, path: &Utf8Path, content: String) -> Option<String> {
        self.lock().insert(normalize(path), content)
    }

    /// Forgets `path`. Returns `true` if it was remembered.
    pub fn evict(&self, path: &Utf8Path) -> bool {
        self.lock().remove(&normalize(path)).is_some()
    }

    pub fn get(&self, path: &Utf8Path) -> Option<String> {
        self.lock().get(&normalize(path)).cloned()
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.lock().contains_key(&normalize(path))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of every entry, in iteration order.
    pub fn snapshot(&self) -> Vec<(Utf8PathBuf, String)> {
        self.lock()
            .iter()
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn put_replaces_in_place() {
        let (_dir, root) = scratch();
        let cache = Remembered::new();

        assert_eq!(cache.put(&root.join("b.css"), "b1".into()), None);
        assert_eq!(cache.put(&root.join("a.css"), "a1".into()), None);
        assert_eq!(cache.put(&root.join("b.css"), "b2".into()), Some("b1".into()));

        let contents: Vec<_> = cache.snapshot().into_iter().map(|(_, c)| c).collect();
        assert_eq!(contents, vec!["a1", "b2"]);
    }

    #[test]
    fn evict_is_idempotent() {
        let (_dir, root) = scratch();
        let cache = Remembered::new();
        let path = root.join("a.css");

        cache.put(&path, "a".into());
        assert!(cache.evict(&path));
        assert!(!cache.evict(&path));
        assert!(cache.is_empty());
    }

    #[test]
    fn equivalent_paths_share_an_entry() {
        let (_dir, root) = scratch();
        let cache = Remembered::new();

        cache.put(&root.join("./a.css"), "a".into());
        assert!(cache.contains(&root.join("a.css")));
        assert_eq!(cache.get(&root.join("a.css")).as_deref(), Some("a"));
        assert_eq!(cache.len(), 1);
    }
}
