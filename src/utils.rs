use std::fmt::Display;
use std::fs;
use std::sync::LazyLock;
use std::time::{Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;

use crate::error::SelectError;

const ANSI_BLUE: Style = Style::new().blue();

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

/// Spinner style used for every running task span.
pub(crate) fn style_task() -> ProgressStyle {
    STYLE_TASK.clone()
}

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Collects every regular file matching `pattern`, in glob order.
pub(crate) fn glob_files(pattern: &str) -> Result<Vec<Utf8PathBuf>, SelectError> {
    let mut files = Vec::new();

    for entry in glob::glob(pattern)? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            files.push(path);
        }
    }

    Ok(files)
}

pub(crate) fn modified(path: &Utf8Path) -> Result<SystemTime, SelectError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| SelectError::Metadata(path.to_path_buf(), e))
}

/// `true` if the file was modified after `since`, or if there is no `since`.
pub(crate) fn modified_since(
    path: &Utf8Path,
    since: Option<SystemTime>,
) -> Result<bool, SelectError> {
    match since {
        Some(since) => Ok(modified(path)? > since),
        None => Ok(true),
    }
}

/// Stable identity of a file path, used as the key of incremental caches.
///
/// The parent directory is canonicalized rather than the file itself, so a
/// path still normalizes the same way after the file has been deleted.
pub(crate) fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };

    match (parent.canonicalize_utf8(), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_survives_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let file = root.join("a.css");
        fs::write(&file, "").unwrap();

        let before = normalize(&root.join("./a.css"));
        fs::remove_file(&file).unwrap();
        let after = normalize(&file);

        assert_eq!(before, after);
        assert_eq!(after.file_name(), Some("a.css"));
    }

    #[test]
    fn glob_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("nested.css")).unwrap();
        fs::write(root.join("b.css"), "").unwrap();
        fs::write(root.join("a.css"), "").unwrap();

        let files = glob_files(root.join("*.css").as_str()).unwrap();
        assert_eq!(files, vec![root.join("a.css"), root.join("b.css")]);
    }
}
