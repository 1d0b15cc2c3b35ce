use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::time::{Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::engine::{Completion, TaskBody, TaskContext};
use crate::error::SelectError;
use crate::utils::{as_overhead, glob_files, modified, modified_since};
use crate::Config;

/// Errors that can occur while copying assets.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("Couldn't copy '{from}' to '{to}'.\n{source}")]
    Copy {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Copies markup and static assets into the output directory.
///
/// A file is copied only if it changed since the last run *and* is strictly
/// newer than its existing copy in the output directory.
pub struct Assets {
    config: Config,
}

impl Assets {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn sources(&self) -> Result<BTreeSet<Utf8PathBuf>, SelectError> {
        let mut sources = BTreeSet::new();
        for pattern in [self.config.markup_glob(), self.config.assets_glob()] {
            sources.extend(glob_files(&pattern)?);
        }
        Ok(sources)
    }

    /// Runs both filters and copies the survivors. Returns the destination
    /// of every file copied.
    pub fn copy(&self, since: Option<SystemTime>) -> Result<Vec<Utf8PathBuf>, AssetError> {
        let src = self.config.src_dir();
        let dist = self.config.dist_dir();
        let mut copied = Vec::new();

        for path in self.sources()? {
            if !modified_since(&path, since)? {
                continue;
            }

            let Ok(relative) = path.strip_prefix(&src) else {
                continue;
            };
            let target = dist.join(relative);

            if !is_newer(&path, &target)? {
                continue;
            }

            copy_file(&path, &target)?;
            tracing::debug!("copied {path} -> {target}");
            copied.push(target);
        }

        Ok(copied)
    }
}

/// `true` if `source` is strictly newer than `target`, or `target` is
/// missing.
fn is_newer(source: &Utf8Path, target: &Utf8Path) -> Result<bool, SelectError> {
    let target_time = match fs::metadata(target).and_then(|meta| meta.modified()) {
        Ok(time) => time,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(SelectError::Metadata(target.to_path_buf(), e)),
    };

    Ok(modified(source)? > target_time)
}

fn copy_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), AssetError> {
    let error = |source| AssetError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(error)?;
    }
    fs::copy(from, to).map_err(error)?;
    Ok(())
}

impl TaskBody for Assets {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Completion> {
        let s = Instant::now();
        let copied = self.copy(ctx.last_run())?;

        tracing::info!("copied {} file(s) {}", copied.len(), as_overhead(s));
        Ok(Completion::Finished)
    }
}
