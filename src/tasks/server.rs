mod http;
mod reload;

use std::fs;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;

use camino::Utf8PathBuf;
use console::style;
use thiserror::Error;

use crate::engine::{Completion, POLL, Service, Shutdown, TaskBody, TaskContext};
use crate::error::WatchError;
use crate::watch::{Watcher, changed_paths};
use crate::{Config, WatchSet};

use self::reload::{Reloader, client_script};

/// Errors that can occur when starting the development server.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind HTTP server to port {port}.\n{source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Static file server over the output directory with live reload.
///
/// Any change to the output tree, or to the root `index.html`, makes every
/// connected browser reload.
pub struct Serve {
    config: Config,
}

impl Serve {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn start(&self) -> Result<Running, ServeError> {
        let dist = self.config.dist_dir();
        fs::create_dir_all(&dist)?;

        let reloader = Reloader::start(self.config.reload_port)?;
        let listener = http::bind(self.config.port)?;
        let port = listener.local_addr()?.port();

        let reload = WatchSet::new(self.config.reload_globs());
        let watcher = Watcher::new([&reload])?;

        tracing::info!(
            url = %style(format!("http://localhost:{port}/")).yellow(),
            "starting a HTTP server"
        );
        tracing::debug!("live reload on port {}", reloader.port());

        Ok(Running {
            script: Arc::from(client_script(reloader.port())),
            listener,
            dist,
            reloader,
            reload,
            watcher,
        })
    }
}

/// Everything the server needs once it has been set up.
struct Running {
    listener: std::net::TcpListener,
    dist: Utf8PathBuf,
    script: Arc<str>,
    reloader: Reloader,
    reload: WatchSet,
    watcher: Watcher,
}

impl Running {
    fn run(self, shutdown: Shutdown) -> anyhow::Result<()> {
        let http = {
            let shutdown = shutdown.clone();
            let (listener, dist, script) = (self.listener, self.dist, self.script);
            std::thread::Builder::new()
                .name(String::from("http"))
                .spawn(move || http::serve(listener, dist, script, shutdown))?
        };

        while !shutdown.is_triggered() && !http.is_finished() {
            match self.watcher.events().recv_timeout(POLL) {
                Ok(Ok(events)) => {
                    let paths = changed_paths(&events);
                    if paths.iter().any(|path| self.reload.matches(path)) {
                        tracing::info!("output changed, reloading browsers");
                        self.reloader.reload();
                    }
                }
                Ok(Err(errors)) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        shutdown.trigger();
        match http.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("HTTP server panicked")),
        }
    }
}

impl TaskBody for Serve {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Completion> {
        let running = self.start()?;
        let service = Service::spawn(ctx.name(), move |shutdown| running.run(shutdown))?;
        Ok(Completion::Running(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blueprint;

    fn config(root: &std::path::Path, port: u16) -> Config {
        Config {
            root: Utf8PathBuf::from_path_buf(root.canonicalize().unwrap()).unwrap(),
            port,
            reload_port: 0,
            development: true,
            ..Config::default()
        }
    }

    #[test]
    fn server_runs_as_a_service_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 0);

        let mut blueprint = Blueprint::new();
        blueprint.task("server").run(Serve::new(&config)).unwrap();

        let session = blueprint.finish().unwrap().run("server").unwrap();
        assert_eq!(session.services().collect::<Vec<_>>(), ["server"]);
        assert!(config.dist_dir().is_dir());

        session.shutdown().unwrap();
    }

    #[test]
    fn taken_port_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = config(dir.path(), taken.local_addr().unwrap().port());

        let mut blueprint = Blueprint::new();
        blueprint.task("server").run(Serve::new(&config)).unwrap();

        let err = blueprint.finish().unwrap().run("server").unwrap_err();
        assert_eq!(err.task(), "server");
        assert!(err.to_string().contains("Couldn't bind"));
    }
}
