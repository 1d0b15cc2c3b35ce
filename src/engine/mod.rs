//! Execution primitives shared by every task.
//!
//! A task body runs once per invocation and reports how it ended through a
//! [`Completion`]. Most tasks simply finish. Long-running ones (watchers,
//! servers, a bundler in watch mode) finish their first pass, hand the rest
//! of their work to a background [`Service`], and return
//! [`Completion::Running`]. The graph only ever waits for the body to
//! return, which is the "started" half of the two-phase lifecycle; the
//! service thread ending is the "stopped" half.

mod runner;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

pub use crate::engine::runner::{Diagnostics, Runner, Session, TaskExecution};

/// How often background loops check for shutdown.
pub(crate) const POLL: Duration = Duration::from_millis(200);

/// The work performed by a leaf task.
///
/// Implemented for the built-in tasks and for any closure taking a
/// [`TaskContext`].
pub trait TaskBody: Send + Sync {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Completion>;
}

impl<F> TaskBody for F
where
    F: Fn(&TaskContext) -> anyhow::Result<Completion> + Send + Sync,
{
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Completion> {
        self(ctx)
    }
}

/// How a task body ended.
pub enum Completion {
    /// All work is done.
    Finished,
    /// The first pass is done, the rest keeps running in the background.
    Running(Service),
}

/// Everything a task body can see while it runs.
pub struct TaskContext {
    pub(crate) name: String,
    pub(crate) runner: Runner,
    pub(crate) last_run: Option<SystemTime>,
    pub(crate) span: tracing::Span,
}

impl TaskContext {
    /// Name the task was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The runner executing this task, for tasks that trigger other tasks.
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Start time of the last successful run of this task, if any.
    pub fn last_run(&self) -> Option<SystemTime> {
        self.last_run
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Cooperative stop signal handed to a background service.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Background half of a long-running task.
pub struct Service {
    name: String,
    shutdown: Shutdown,
    thread: JoinHandle<anyhow::Result<()>>,
}

impl Service {
    /// Spawns `work` on a dedicated thread. The closure should return soon
    /// after its [`Shutdown`] is triggered.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> std::io::Result<Self>
    where
        F: FnOnce(Shutdown) -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let shutdown = Shutdown::default();
        let token = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || work(token))?;

        Ok(Self {
            name,
            shutdown,
            thread,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` once the background thread has ended.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Asks the service to stop without waiting for it.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Blocks until the service has stopped.
    pub fn join(self) -> anyhow::Result<()> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("service '{}' panicked", self.name)),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_stops_on_request() {
        let service = Service::spawn("idle", |shutdown| {
            while !shutdown.is_triggered() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(service.name(), "idle");
        assert!(!service.is_finished());

        service.stop();
        service.join().unwrap();
    }

    #[test]
    fn service_panic_becomes_error() {
        let service = Service::spawn("boom", |_| panic!("boom")).unwrap();
        let err = service.join().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
