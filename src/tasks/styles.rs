use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::{SourceMap, SourceMapError};
use thiserror::Error;

use crate::cache::Remembered;
use crate::engine::{Completion, TaskBody, TaskContext};
use crate::error::SelectError;
use crate::tasks::sourcemap::Concat;
use crate::utils::{as_overhead, glob_files, modified_since, normalize};
use crate::Config;

/// Errors that can occur when building the stylesheet.
#[derive(Debug, Error)]
pub enum StyleError {
    /// Couldn't select the source files.
    #[error(transparent)]
    Select(#[from] SelectError),

    /// An I/O error occurred.
    #[error("IO error at '{0}': {1}")]
    Io(Utf8PathBuf, std::io::Error),

    /// The CSS transformer rejected a file.
    #[error("Couldn't transform '{path}': {message}")]
    Transform { path: Utf8PathBuf, message: String },

    /// The per-file source maps couldn't be merged.
    #[error("Couldn't build the source map: {0}")]
    SourceMap(#[from] SourceMapError),
}

/// Vendor prefixes are added for these browsers and anything newer.
fn legacy_targets() -> Targets {
    Targets::from(Browsers {
        chrome: Some(49 << 16),
        edge: Some(15 << 16),
        firefox: Some(52 << 16),
        safari: Some(9 << 16),
        ios_saf: Some(9 << 16),
        ..Browsers::default()
    })
}

/// A stylesheet after prefixing, with its source map in development.
struct Transformed {
    css: String,
    map: Option<SourceMap>,
}

/// Prefixes (and in production, minifies) a single stylesheet.
///
/// With `map_dir` set, also maps the output back to `filename`, listed
/// relative to `map_dir` and with its content embedded.
fn transform(
    code: &str,
    filename: &str,
    map_dir: Option<&str>,
    minify: bool,
) -> Result<Transformed, String> {
    let targets = legacy_targets();

    let mut map = map_dir.map(SourceMap::new);
    let mut source_index = 0;
    if let Some(map) = &mut map {
        source_index = map.add_source(filename);
        map.set_source_content(source_index as usize, code)
            .map_err(|e| e.to_string())?;
    }

    let mut sheet = StyleSheet::parse(
        code,
        ParserOptions {
            filename: filename.to_string(),
            source_index,
            ..ParserOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let output = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            source_map: map.as_mut(),
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    Ok(Transformed {
        css: output.code,
        map,
    })
}

/// Incrementally transforms and concatenates every style source into a
/// single stylesheet.
///
/// Only files modified since the last run are transformed again; the rest
/// come from the [`Remembered`] set shared with the watcher, which is also
/// what drops deleted files from the output.
pub struct Styles {
    config: Config,
    remembered: Arc<Remembered>,
    /// Per-file source maps in development, keyed like `remembered`.
    maps: Mutex<HashMap<Utf8PathBuf, SourceMap>>,
}

impl Styles {
    pub fn new(config: &Config, remembered: Arc<Remembered>) -> Self {
        Self {
            config: config.clone(),
            remembered,
            maps: Mutex::default(),
        }
    }

    fn maps(&self) -> MutexGuard<'_, HashMap<Utf8PathBuf, SourceMap>> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the output directory and returns its canonical path.
    fn output_dir(&self) -> Result<Utf8PathBuf, StyleError> {
        let output = self.config.styles_output();
        let dir = match output.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };

        fs::create_dir_all(dir).map_err(|e| StyleError::Io(dir.to_path_buf(), e))?;
        dir.canonicalize_utf8()
            .map_err(|e| StyleError::Io(dir.to_path_buf(), e))
    }

    /// Transforms files modified after `since` and writes the concatenated
    /// output. Returns the number of files transformed.
    pub fn compile(&self, since: Option<SystemTime>) -> Result<usize, StyleError> {
        let output_dir = self.output_dir()?;
        let map_dir = self.config.development.then_some(output_dir.as_str());
        let mut transformed = 0;

        for path in glob_files(&self.config.styles_glob())? {
            if !modified_since(&path, since)? {
                continue;
            }

            let source = normalize(&path);
            let code = fs::read_to_string(&path).map_err(|e| StyleError::Io(path.clone(), e))?;
            let output = transform(&code, source.as_str(), map_dir, !self.config.development)
                .map_err(|message| StyleError::Transform {
                    path: path.clone(),
                    message,
                })?;

            tracing::debug!("transformed {path}");
            self.remembered.put(&source, output.css);
            match output.map {
                Some(map) => self.maps().insert(source, map),
                None => self.maps().remove(&source),
            };
            transformed += 1;
        }

        self.write(&output_dir)?;
        Ok(transformed)
    }

    fn write(&self, output_dir: &Utf8Path) -> Result<(), StyleError> {
        let output = self.config.styles_output();
        let entries = self.remembered.snapshot();

        let mut maps = self.maps();
        maps.retain(|path, _| entries.iter().any(|(p, _)| p == path));

        let mut concat = Concat::new(output_dir.as_str());
        for (path, css) in &entries {
            concat.push(css, maps.get(path))?;
        }
        drop(maps);

        let mut code = concat.code();

        if self.config.development {
            let file = output.file_name().unwrap_or("main.css");
            let map_name = format!("{file}.map");
            let map_path = output.with_file_name(&map_name);

            let map = concat.source_map(file)?.to_string();
            fs::write(&map_path, map).map_err(|e| StyleError::Io(map_path.clone(), e))?;
            code.push_str(&format!("/*# sourceMappingURL={map_name} */\n"));
        }

        fs::write(&output, code).map_err(|e| StyleError::Io(output.clone(), e))?;
        Ok(())
    }
}

impl TaskBody for Styles {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Completion> {
        let s = Instant::now();
        let transformed = self.compile(ctx.last_run())?;

        tracing::info!(
            "wrote {} ({} changed, {} total) {}",
            style(self.config.styles_output()).cyan(),
            transformed,
            self.remembered.len(),
            as_overhead(s)
        );

        Ok(Completion::Finished)
    }
}
