//! Filesystem watching shared by the `watch` and `server` tasks.
//!
//! Globs are split into a static root, which is watched recursively, and a
//! compiled absolute pattern, which filters the events coming from that
//! root. A root that doesn't exist yet is watched through its nearest
//! existing ancestor. Roots nested inside other roots are collapsed, so a
//! single debounced watcher covers any number of globs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, new_debouncer};

use crate::error::WatchError;

pub(crate) const DEBOUNCE: Duration = Duration::from_millis(250);

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Directory a glob is watched through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchRoot {
    pub path: Utf8PathBuf,
    /// Only direct children matter when the glob names a single missing
    /// file or directory.
    pub recursive: bool,
}

impl WatchRoot {
    fn mode(&self) -> RecursiveMode {
        match self.recursive {
            true => RecursiveMode::Recursive,
            false => RecursiveMode::NonRecursive,
        }
    }
}

/// A set of resolved globs.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    roots: Vec<WatchRoot>,
    patterns: Vec<Pattern>,
}

impl WatchSet {
    /// Resolves every glob against the filesystem as it is now. Globs that
    /// can't be resolved at all are skipped with an error log.
    pub fn new<I>(globs: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut set = Self::default();

        for glob in globs {
            let glob = glob.as_ref();
            match resolve_watch_path(glob) {
                Ok((root, pattern)) => {
                    set.roots.push(root);
                    set.patterns.push(pattern);
                }
                Err(e) => tracing::error!("failed to resolve path {glob}: {e}"),
            }
        }

        set
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn roots(&self) -> &[WatchRoot] {
        &self.roots
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH))
    }
}

/// A debounced watcher over the collapsed roots of some [`WatchSet`]s,
/// together with the receiving end of its events.
pub(crate) struct Watcher {
    // Dropping the debouncer stops the watch.
    _debouncer: Box<dyn Send>,
    events: Receiver<DebounceEventResult>,
}

impl Watcher {
    pub fn new<'a, I>(sets: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = &'a WatchSet>,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

        let roots: HashSet<WatchRoot> = sets
            .into_iter()
            .flat_map(|set| set.roots.iter().cloned())
            .collect();

        for root in collapse_watch_roots(roots) {
            tracing::info!("watching {}", root.path);
            debouncer.watch(root.path.as_std_path(), root.mode())?;
        }

        Ok(Self {
            _debouncer: Box::new(debouncer),
            events: rx,
        })
    }

    pub fn events(&self) -> &Receiver<DebounceEventResult> {
        &self.events
    }
}

/// Every distinct path touched by a batch of debounced events, in the order
/// they first appear.
pub(crate) fn changed_paths(events: &[DebouncedEvent]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for de in events {
        for path in &de.event.paths {
            if seen.insert(path.clone()) {
                paths.push(path.clone());
            }
        }
    }

    paths
}

/// Splits a glob string into a canonicalized static root (for watching)
/// and a compiled absolute Pattern (for matching).
///
/// The static root doesn't have to exist. Its nearest existing ancestor is
/// watched instead, and the pattern is kept as is, so files show up once
/// the directory is created.
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> Result<(WatchRoot, Pattern), WatchError> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let (existing, missing) = split_existing(&root_part);
    let existing = existing.canonicalize_utf8()?;
    let absolute_root = existing.join(&missing);
    let concrete = suffix_part.as_str().is_empty();

    let (watch_root, match_pattern) = if !missing.as_str().is_empty() {
        let recursive = !concrete || missing.components().count() > 1;
        let root = WatchRoot {
            path: existing,
            recursive,
        };
        (root, absolute_root.join(&suffix_part))
    } else if concrete && absolute_root.is_file() {
        // A concrete file is watched through its parent, so atomic writes
        // (write to temp, rename over) are still caught.
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        let root = WatchRoot {
            path: parent,
            recursive: true,
        };
        (root, absolute_root)
    } else {
        let pattern = absolute_root.join(&suffix_part);
        let root = WatchRoot {
            path: absolute_root,
            recursive: true,
        };
        (root, pattern)
    };

    let pattern = Pattern::new(match_pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Splits `path` into its longest existing prefix and the missing rest.
fn split_existing(path: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        if existing.as_str().is_empty() {
            existing = Utf8Path::new(".");
        }
        if existing.exists() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let missing = missing.into_iter().rev().collect();
    (existing.to_path_buf(), missing)
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

/// Collapses the recursive roots, then keeps the shallow ones that none of
/// them already cover.
fn collapse_watch_roots(roots: HashSet<WatchRoot>) -> Vec<WatchRoot> {
    let (recursive, shallow): (HashSet<_>, HashSet<_>) =
        roots.into_iter().partition(|root| root.recursive);

    let recursive = collapse_watch_paths(recursive.into_iter().map(|root| root.path).collect());

    let mut shallow: Vec<_> = shallow
        .into_iter()
        .map(|root| root.path)
        .filter(|path| !recursive.iter().any(|root| path.starts_with(root)))
        .collect();
    shallow.sort();
    shallow.dedup();

    let recursive = recursive.into_iter().map(|path| WatchRoot {
        path,
        recursive: true,
    });
    let shallow = shallow.into_iter().map(|path| WatchRoot {
        path,
        recursive: false,
    });

    recursive.chain(shallow).collect()
}
