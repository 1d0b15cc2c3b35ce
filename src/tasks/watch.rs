use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;

use camino::Utf8Path;

use crate::cache::Remembered;
use crate::engine::{Completion, POLL, Runner, Service, Shutdown, TaskBody, TaskContext};
use crate::watch::{Watcher, changed_paths};
use crate::{Config, WatchSet};

/// Links a set of globs to the task re-run when they change.
#[derive(Debug, Clone)]
pub struct Subscription {
    globs: Vec<String>,
    task: String,
    evict_removed: bool,
}

impl Subscription {
    pub fn new(globs: &[String], task: impl Into<String>) -> Self {
        Self {
            globs: globs.to_vec(),
            task: task.into(),
            evict_removed: false,
        }
    }

    /// Deleted files matching this subscription are dropped from the
    /// remembered set before the task re-runs.
    pub fn evicting(mut self) -> Self {
        self.evict_removed = true;
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Resolves the globs against the filesystem as it is now.
    fn resolve(&self) -> Resolved {
        Resolved {
            set: WatchSet::new(&self.globs),
            task: self.task.clone(),
            evict_removed: self.evict_removed,
        }
    }
}

/// A [`Subscription`] whose globs have been resolved.
pub(crate) struct Resolved {
    set: WatchSet,
    task: String,
    evict_removed: bool,
}

/// Re-runs tasks when their sources change.
pub struct Watch {
    subscriptions: Vec<Subscription>,
    remembered: Arc<Remembered>,
}

impl Watch {
    pub fn new(config: &Config, remembered: Arc<Remembered>) -> Self {
        let subscriptions = vec![
            Subscription::new(&[config.styles_glob()], "styles").evicting(),
            Subscription::new(&[config.assets_glob()], "assets"),
            Subscription::new(&[config.markup_glob()], "assets"),
        ];

        Self::with_subscriptions(subscriptions, remembered)
    }

    pub fn with_subscriptions(subscriptions: Vec<Subscription>, remembered: Arc<Remembered>) -> Self {
        Self {
            subscriptions,
            remembered,
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    fn resolve(&self) -> Vec<Resolved> {
        self.subscriptions.iter().map(Subscription::resolve).collect()
    }
}

/// Tasks to re-run for a batch of changed paths, each named once, in
/// subscription order. Removed files are evicted along the way.
pub(crate) fn dispatch<'a>(
    subscriptions: &'a [Resolved],
    remembered: &Remembered,
    paths: &[PathBuf],
) -> Vec<&'a str> {
    let mut tasks: Vec<&str> = Vec::new();

    for subscription in subscriptions {
        let matched: Vec<&Path> = paths
            .iter()
            .map(PathBuf::as_path)
            .filter(|path| subscription.set.matches(path))
            .collect();

        if matched.is_empty() {
            continue;
        }

        if subscription.evict_removed {
            for path in matched.iter().filter(|path| !path.exists()) {
                if let Some(path) = Utf8Path::from_path(path)
                    && remembered.evict(path)
                {
                    tracing::debug!("forgot {path}");
                }
            }
        }

        if !tasks.contains(&subscription.task.as_str()) {
            tasks.push(&subscription.task);
        }
    }

    tasks
}

fn rerun(runner: &Runner, tasks: &[&str]) {
    for task in tasks {
        tracing::info!("change detected, re-running '{task}'");
        match runner.run(task) {
            Ok(session) => {
                if let Err(e) = session.wait() {
                    tracing::error!("'{task}' stopped with an error: {e:#}");
                }
            }
            Err(e) => tracing::error!("{e}"),
        }
    }
}

fn listen(
    watcher: Watcher,
    runner: Runner,
    subscriptions: Vec<Resolved>,
    remembered: Arc<Remembered>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    while !shutdown.is_triggered() {
        match watcher.events().recv_timeout(POLL) {
            Ok(Ok(events)) => {
                let paths = changed_paths(&events);
                let tasks = dispatch(&subscriptions, &remembered, &paths);
                rerun(&runner, &tasks);
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

    Ok(())
}

impl TaskBody for Watch {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Completion> {
        // Resolved per run, so directories created since the last one count.
        let subscriptions = self.resolve();
        let watcher = Watcher::new(subscriptions.iter().map(|s| &s.set))?;

        let runner = ctx.runner().clone();
        let remembered = self.remembered.clone();

        let service = Service::spawn(ctx.name(), move |shutdown| {
            listen(watcher, runner, subscriptions, remembered, shutdown)
        })?;

        Ok(Completion::Running(service))
    }
}
