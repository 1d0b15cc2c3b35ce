use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Instant;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::Config;
use crate::engine::{Completion, POLL, Service, Shutdown, TaskBody, TaskContext};
use crate::error::SelectError;
use crate::report::notification;
use crate::utils::{as_overhead, glob_files};

/// Errors that can occur when bundling scripts.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error(transparent)]
    Select(#[from] SelectError),

    /// The bundler executable couldn't be started.
    #[error("Couldn't start bundler '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The bundler ran and reported errors.
    #[error("Bundler failed: {0}")]
    Failed(String),
}

/// Bundles every top-level script entry point with an external bundler
/// (esbuild-compatible command line).
///
/// In development the first pass runs to completion, then a second bundler
/// process is left running in watch mode as a background service.
pub struct Bundle {
    config: Config,
}

impl Bundle {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Entry points, one output file per entry named after its stem.
    pub fn entries(&self) -> Result<Vec<Utf8PathBuf>, SelectError> {
        glob_files(&self.config.scripts_glob())
    }

    /// Command line arguments for a bundler invocation.
    pub fn args(&self, entries: &[Utf8PathBuf], watch: bool) -> Vec<String> {
        let mut args: Vec<String> = entries.iter().map(|e| e.to_string()).collect();

        args.push(String::from("--bundle"));
        args.push(format!("--outdir={}", self.config.dist_dir()));
        args.push(String::from("--public-path=/"));
        args.push(String::from("--log-level=warning"));

        if self.config.development {
            args.push(String::from("--sourcemap=inline"));
        } else {
            args.push(String::from("--minify"));
        }

        if watch {
            args.push(String::from("--watch=forever"));
        }

        args
    }

    fn command(&self, entries: &[Utf8PathBuf], watch: bool) -> Command {
        let mut command = Command::new(&self.config.bundler);
        command.args(self.args(entries, watch));
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> BundleError {
        BundleError::Spawn {
            program: self.config.bundler.clone(),
            source,
        }
    }

    /// Runs a single bundling pass.
    pub fn build(&self, entries: &[Utf8PathBuf]) -> Result<(), BundleError> {
        let output = self
            .command(entries, false)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(BundleError::Failed(failure_message(
                &output.stdout,
                &output.stderr,
            )));
        }

        Ok(())
    }

    /// Starts the bundler in watch mode on a background service.
    fn watch(&self, entries: &[Utf8PathBuf]) -> anyhow::Result<Service> {
        let mut child = self
            .command(entries, true)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let reporter = match child.stderr.take() {
            Some(stderr) => Some(
                std::thread::Builder::new()
                    .name(String::from("webpack-errors"))
                    .spawn(move || {
                        error_blocks(BufReader::new(stderr), |block| {
                            notification("JS", &anyhow::anyhow!(block))
                        })
                    })?,
            ),
            None => None,
        };

        Ok(Service::spawn("webpack", move |shutdown| {
            supervise(child, reporter, &shutdown)
        })?)
    }
}

/// What a failed bundler run printed, preferring its error output.
fn failure_message(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    match stderr.trim() {
        "" => String::from_utf8_lossy(stdout).trim().to_string(),
        stderr => stderr.to_string(),
    }
}

/// Splits bundler output into blank-line separated blocks.
fn error_blocks(reader: impl BufRead, mut report: impl FnMut(String)) {
    let mut block: Vec<String> = Vec::new();

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if !line.trim().is_empty() {
            block.push(line);
        } else if !block.is_empty() {
            report(block.join("\n"));
            block.clear();
        }
    }

    if !block.is_empty() {
        report(block.join("\n"));
    }
}

/// Waits for the watching bundler to exit, killing it on shutdown.
fn supervise(
    mut child: Child,
    reporter: Option<JoinHandle<()>>,
    shutdown: &Shutdown,
) -> anyhow::Result<()> {
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }

        if shutdown.is_triggered() {
            child.kill()?;
            child.wait()?;
            break None;
        }

        std::thread::sleep(POLL);
    };

    // The pipe is closed once the child is gone.
    if let Some(reporter) = reporter {
        let _ = reporter.join();
    }

    match status {
        Some(status) if !status.success() => anyhow::bail!("bundler exited with {status}"),
        _ => Ok(()),
    }
}

impl TaskBody for Bundle {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Completion> {
        let s = Instant::now();
        let entries = self.entries()?;

        if entries.is_empty() {
            tracing::info!("no script entry points in {}", self.config.src_dir());
            return Ok(Completion::Finished);
        }

        match self.build(&entries) {
            Ok(()) => {
                tracing::info!("bundled {} entry point(s) {}", entries.len(), as_overhead(s));
            }
            Err(err @ BundleError::Failed(_)) if self.config.development => {
                // The watching bundler below picks up the fix.
                notification("JS", &err.into());
            }
            Err(err) => {
                let err = anyhow::Error::from(err);
                notification("JS", &err);
                return Err(err);
            }
        }

        if self.config.development {
            let service = self.watch(&entries)?;
            return Ok(Completion::Running(service));
        }

        Ok(Completion::Finished)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::Blueprint;

    fn project(development: bool, bundler: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root: Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            bundler: bundler.to_string(),
            development,
            ..Config::default()
        };
        (dir, config)
    }

    #[test]
    fn only_top_level_scripts_are_entries() {
        let (_dir, config) = project(false, "esbuild");
        let src = config.src_dir();
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("main.js"), "").unwrap();
        fs::write(src.join("admin.js"), "").unwrap();
        fs::write(src.join("lib/util.js"), "").unwrap();

        let entries = Bundle::new(&config).entries().unwrap();
        assert_eq!(entries, vec![src.join("admin.js"), src.join("main.js")]);
    }

    #[test]
    fn production_args_minify_without_source_maps() {
        let (_dir, config) = project(false, "esbuild");
        let entry = config.src_dir().join("main.js");

        let args = Bundle::new(&config).args(&[entry.clone()], false);

        assert_eq!(args[0], entry.as_str());
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&format!("--outdir={}", config.dist_dir())));
        assert!(args.contains(&"--public-path=/".to_string()));
        assert!(args.contains(&"--minify".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--sourcemap")));
        assert!(!args.iter().any(|a| a.starts_with("--watch")));
    }

    #[test]
    fn development_args_use_inline_source_maps() {
        let (_dir, config) = project(true, "esbuild");
        let args = Bundle::new(&config).args(&[], true);

        assert!(args.contains(&"--sourcemap=inline".to_string()));
        assert!(args.contains(&"--watch=forever".to_string()));
        assert!(!args.contains(&"--minify".to_string()));
    }

    #[test]
    fn no_entries_is_a_no_op() {
        let (_dir, config) = project(false, "tsumugi-missing-bundler");
        fs::create_dir_all(config.src_dir()).unwrap();

        let mut blueprint = Blueprint::new();
        blueprint.task("webpack").run(Bundle::new(&config)).unwrap();

        let session = blueprint.finish().unwrap().run("webpack").unwrap();
        assert!(session.is_idle());
    }

    #[test]
    fn missing_bundler_is_a_spawn_error() {
        let (_dir, config) = project(false, "tsumugi-missing-bundler");
        let err = Bundle::new(&config).build(&[]).unwrap_err();
        assert!(matches!(err, BundleError::Spawn { .. }));
    }

    #[test]
    fn production_failure_does_not_stop_the_graph() {
        let (_dir, config) = project(false, "tsumugi-missing-bundler");
        fs::create_dir_all(config.src_dir()).unwrap();
        fs::write(config.src_dir().join("main.js"), "").unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let mut blueprint = Blueprint::new();
        blueprint
            .task("webpack")
            .continue_on_error(true)
            .run(Bundle::new(&config))
            .unwrap();
        blueprint
            .task("after")
            .action({
                let ran = ran.clone();
                move |_| {
                    ran.store(true, Ordering::SeqCst);
                    Ok(Completion::Finished)
                }
            })
            .unwrap();
        blueprint
            .compose("all", crate::series(["webpack", "after"]))
            .unwrap();

        let session = blueprint.finish().unwrap().run("all").unwrap();
        assert!(session.is_idle());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn development_failure_is_lenient() {
        let (_dir, config) = project(true, "tsumugi-missing-bundler");
        fs::create_dir_all(config.src_dir()).unwrap();
        fs::write(config.src_dir().join("main.js"), "").unwrap();

        let mut blueprint = Blueprint::new();
        blueprint
            .task("webpack")
            .continue_on_error(true)
            .run(Bundle::new(&config))
            .unwrap();

        let session = blueprint.finish().unwrap().run("webpack").unwrap();
        assert!(session.is_idle());
    }

    /// Runs `src/main.js` itself as the bundler, through `sh`.
    #[cfg(unix)]
    fn scripted(script: &str) -> (tempfile::TempDir, Config, Vec<Utf8PathBuf>) {
        let (dir, config) = project(false, "sh");
        fs::create_dir_all(config.src_dir()).unwrap();
        fs::write(config.src_dir().join("main.js"), script).unwrap();
        let entries = Bundle::new(&config).entries().unwrap();
        (dir, config, entries)
    }

    #[cfg(unix)]
    #[test]
    fn failure_reports_stdout_when_stderr_is_silent() {
        let (_dir, config, entries) = scripted("echo 'main.js:1: unexpected token'\nexit 1\n");

        let err = Bundle::new(&config).build(&entries).unwrap_err();
        match err {
            BundleError::Failed(message) => assert_eq!(message, "main.js:1: unexpected token"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failure_prefers_stderr() {
        let (_dir, config, entries) =
            scripted("echo 'building'\necho 'main.js:1: unexpected token' >&2\nexit 1\n");

        let err = Bundle::new(&config).build(&entries).unwrap_err();
        assert_eq!(err.to_string(), "Bundler failed: main.js:1: unexpected token");
    }

    #[test]
    fn empty_failure_output_is_empty() {
        assert_eq!(failure_message(b"  \n", b"\n"), "");
        assert_eq!(failure_message(b"out\n", b""), "out");
        assert_eq!(failure_message(b"out", b"err\n"), "err");
    }

    #[test]
    fn watch_output_is_split_into_error_blocks() {
        let output = "\
✘ [ERROR] Expected \";\" but found \"}\"

    src/main.js:3:0:
      3 │ }

✘ [ERROR] Could not resolve \"./missing\"


";
        let mut blocks = Vec::new();
        error_blocks(std::io::Cursor::new(output), |block| blocks.push(block));

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], "✘ [ERROR] Expected \";\" but found \"}\"");
        assert!(blocks[1].starts_with("    src/main.js:3:0:"));
        assert_eq!(blocks[2], "✘ [ERROR] Could not resolve \"./missing\"");
    }

    #[cfg(unix)]
    #[test]
    fn watching_bundler_stops_on_shutdown() {
        let (_dir, mut config, entries) = scripted("echo 'oops' >&2\nexec sleep 30\n");
        config.development = true;

        let service = Bundle::new(&config).watch(&entries).unwrap();
        assert!(!service.is_finished());

        service.stop();
        service.join().unwrap();
    }
}
