use std::fs;
use std::io::ErrorKind;
use std::time::Instant;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::engine::{Completion, TaskBody, TaskContext};
use crate::utils::as_overhead;
use crate::Config;

/// Error while clearing the output directory.
#[derive(Debug, Error)]
#[error("Couldn't remove '{path}'.\n{source}")]
pub struct CleanError {
    path: Utf8PathBuf,
    #[source]
    source: std::io::Error,
}

/// Deletes the output directory.
pub struct Clean {
    dist: Utf8PathBuf,
}

impl Clean {
    pub fn new(config: &Config) -> Self {
        Self {
            dist: config.dist_dir(),
        }
    }

    /// Removes the directory recursively. Returns `false` if there was
    /// nothing to remove.
    pub fn clean(&self) -> Result<bool, CleanError> {
        match fs::remove_dir_all(&self.dist) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CleanError {
                path: self.dist.clone(),
                source,
            }),
        }
    }
}

impl TaskBody for Clean {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Completion> {
        let s = Instant::now();

        if self.clean()? {
            tracing::info!("cleaned {} {}", self.dist, as_overhead(s));
        } else {
            tracing::debug!("nothing to clean at {}", self.dist);
        }

        Ok(Completion::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &std::path::Path) -> Config {
        Config {
            root: Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap(),
            ..Config::default()
        }
    }

    #[test]
    fn removes_output_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.dist_dir().join("styles")).unwrap();
        fs::write(config.styles_output(), "a{}").unwrap();

        assert!(Clean::new(&config).clean().unwrap());
        assert!(!config.dist_dir().exists());
    }

    #[test]
    fn missing_output_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Clean::new(&config(dir.path())).clean().unwrap());
    }

    #[test]
    fn leaves_sources_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.src_dir()).unwrap();
        fs::create_dir_all(config.dist_dir()).unwrap();

        Clean::new(&config).clean().unwrap();
        assert!(config.src_dir().exists());
    }
}
