mod diagnostics;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Completion, Service, TaskContext};
use crate::error::RunError;
use crate::graph::{Kind, Leaf, Node, Step};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Executes a validated task graph.
///
/// Cloning is cheap; all clones share the graph and the last-run table, which
/// lets long-running tasks (the watcher) re-run other tasks later on.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<Inner>,
}

struct Inner {
    graph: Graph<Node, ()>,
    names: HashMap<String, NodeIndex>,
    last_run: Mutex<HashMap<NodeIndex, SystemTime>>,
}

impl Runner {
    pub(crate) fn new(graph: Graph<Node, ()>, names: HashMap<String, NodeIndex>) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph,
                names,
                last_run: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.names.contains_key(name)
    }

    /// Names of every registered task, in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.inner.graph.node_weights().map(|node| node.name.as_str())
    }

    /// Start time of the last successful run of `name`.
    pub fn last_run(&self, name: &str) -> Option<SystemTime> {
        let index = self.inner.names.get(name)?;
        self.last_run_of(*index)
    }

    /// Runs `name` and everything it references.
    ///
    /// Returns once every task has either finished or started its background
    /// service. The returned [`Session`] owns those services. If any task
    /// fails, services started during this run are shut down before the
    /// error is returned.
    pub fn run(&self, name: &str) -> Result<Session, RunError> {
        let index = self.index(name)?;
        let mut session = Session::default();

        match self.execute_node(index, &mut session) {
            Ok(()) => Ok(session),
            Err(err) => {
                if !session.is_idle() {
                    tracing::warn!("stopping background services after failure");
                    if let Err(e) = session.shutdown() {
                        tracing::error!("failed to stop services: {e:#}");
                    }
                }
                Err(err)
            }
        }
    }

    fn index(&self, name: &str) -> Result<NodeIndex, RunError> {
        self.inner
            .names
            .get(name)
            .copied()
            .ok_or_else(|| RunError::UnknownTask(name.to_string()))
    }

    fn last_run_of(&self, index: NodeIndex) -> Option<SystemTime> {
        self.inner
            .last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .copied()
    }

    fn record_run(&self, index: NodeIndex, started: SystemTime) {
        self.inner
            .last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, started);
    }

    fn execute_node(&self, index: NodeIndex, session: &mut Session) -> Result<(), RunError> {
        let node = &self.inner.graph[index];

        match &node.kind {
            Kind::Composite(step) => {
                tracing::debug!(task = %node.name, "running composite");
                self.execute_step(step, session)
            }
            Kind::Leaf(leaf) => {
                for prerequisite in &leaf.prerequisites {
                    self.execute_node(self.index(prerequisite)?, session)?;
                }
                self.execute_leaf(index, node, leaf, session)
            }
        }
    }

    fn execute_step(&self, step: &Step, session: &mut Session) -> Result<(), RunError> {
        match step {
            Step::Task(name) => self.execute_node(self.index(name)?, session),
            Step::Series(steps) => {
                for step in steps {
                    self.execute_step(step, session)?;
                }
                Ok(())
            }
            Step::Parallel(steps) => self.execute_parallel(steps, session),
        }
    }

    /// Starts every step on the rayon pool and waits for all of them. A
    /// failing branch does not cancel its siblings; the first error to
    /// arrive is the one reported.
    fn execute_parallel(&self, steps: &[Step], session: &mut Session) -> Result<(), RunError> {
        let (sender, receiver) = channel::<(Session, Result<(), RunError>)>();

        rayon::scope(|s| {
            for step in steps {
                let sender = sender.clone();
                s.spawn(move |_| {
                    let mut branch = Session::default();
                    let result = self.execute_step(step, &mut branch);
                    // The receiver outlives the scope.
                    let _ = sender.send((branch, result));
                });
            }
        });
        drop(sender);

        let mut first_error = None;
        for (branch, result) in receiver {
            session.merge(branch);
            if let Err(err) = result
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn execute_leaf(
        &self,
        index: NodeIndex,
        node: &Node,
        leaf: &Leaf,
        session: &mut Session,
    ) -> Result<(), RunError> {
        let span = tracing::span!(Level::INFO, "task", name = %node.name);
        span.pb_set_style(&crate::utils::style_task());
        span.pb_set_message(&format!("Running {}", node.name));
        let _enter = span.enter();

        let context = TaskContext {
            name: node.name.clone(),
            runner: self.clone(),
            last_run: self.last_run_of(index),
            span: span.clone(),
        };

        let started = SystemTime::now();
        let start = Instant::now();

        let result = match catch_unwind(AssertUnwindSafe(|| leaf.body.run(&context))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Task panicked: {s}")
                } else {
                    String::from("Task panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };

        let duration = start.elapsed();
        session
            .diagnostics
            .executions
            .push((node.name.clone(), TaskExecution { start, duration }));

        match result {
            Ok(Completion::Finished) => {
                self.record_run(index, started);
                tracing::info!("finished '{}' after {:.2?}", node.name, duration);
                Ok(())
            }
            Ok(Completion::Running(service)) => {
                self.record_run(index, started);
                tracing::info!("started '{}' after {:.2?}", node.name, duration);
                session.services.push(service);
                Ok(())
            }
            Err(err) if leaf.continue_on_error => {
                tracing::warn!("'{}' failed, continuing: {err:#}", node.name);
                Ok(())
            }
            Err(err) => Err(RunError::Task {
                name: node.name.clone(),
                source: err,
            }),
        }
    }
}

/// The outcome of a successful [`Runner::run`].
///
/// Holds the background services started during the run. Dropping a session
/// detaches them; call [`wait`](Self::wait) or [`shutdown`](Self::shutdown)
/// to keep control over them.
#[derive(Debug, Default)]
pub struct Session {
    services: Vec<Service>,
    diagnostics: Diagnostics,
}

impl Session {
    /// `true` if nothing is running in the background.
    pub fn is_idle(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of the background services, in start order.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(Service::name)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Blocks until every background service has stopped. Returns the first
    /// service error, after all of them have been joined.
    pub fn wait(self) -> anyhow::Result<()> {
        let mut first_error = None;

        for service in self.services {
            let name = service.name().to_string();
            if let Err(err) = service.join() {
                tracing::error!("service '{name}' stopped with an error: {err:#}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Asks every background service to stop, then waits for them.
    pub fn shutdown(self) -> anyhow::Result<()> {
        for service in &self.services {
            service.stop();
        }
        self.wait()
    }

    fn merge(&mut self, other: Session) {
        self.services.extend(other.services);
        self.diagnostics
            .executions
            .extend(other.diagnostics.executions);
    }
}
