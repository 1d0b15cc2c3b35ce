use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::algo::{has_path_connecting, toposort};

use crate::engine::{Completion, Runner, TaskBody, TaskContext};
use crate::error::ConfigError;
use crate::graph::{Kind, Leaf, Node, Step};

/// The blueprint of a build.
///
/// `Blueprint` is used to define the task graph. Leaf tasks are added with
/// [`task`](Self::task) (or [`register`](Self::register)), composite tasks
/// with [`compose`](Self::compose). Every referenced task must already be
/// registered, so mistakes in the graph are reported while it is being
/// built, never halfway through a run.
///
/// Once configured, [`finish`](Self::finish) turns it into a [`Runner`].
///
/// # Example
///
/// ```rust
/// use tsumugi::{Blueprint, Completion, parallel, series};
///
/// let mut blueprint = Blueprint::new();
/// blueprint.task("clean").action(|_| Ok(Completion::Finished))?;
/// blueprint.task("styles").action(|_| Ok(Completion::Finished))?;
/// blueprint.task("assets").action(|_| Ok(Completion::Finished))?;
/// blueprint.compose("build", series(["clean".into(), parallel(["styles", "assets"])]))?;
///
/// let runner = blueprint.finish()?;
/// runner.run("build")?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Blueprint {
    pub(crate) graph: Graph<Node, ()>,
    names: HashMap<String, petgraph::graph::NodeIndex>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            names: HashMap::new(),
        }
    }

    /// Starts the definition of a leaf task.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            prerequisites: Vec::new(),
            continue_on_error: false,
        }
    }

    /// Adds a leaf task whose `prerequisites` run, in order, before `body`.
    pub fn register<B>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        body: B,
        prerequisites: &[&str],
    ) -> Result<(), ConfigError>
    where
        B: TaskBody + 'static,
    {
        self.task(name)
            .depends_on(prerequisites.iter().copied())
            .run(body)
    }

    /// Adds a composite task that runs `step`.
    pub fn compose(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        step: impl Into<Step>,
    ) -> Result<(), ConfigError> {
        let step = step.into();
        let references = step.references().into_iter().map(String::from).collect();
        self.insert(name.into().into_owned(), Kind::Composite(step), references)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// `true` if running `from` would, directly or transitively, run `to`.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        match (self.names.get(from), self.names.get(to)) {
            // Edges point from a referenced task to the task referencing it.
            (Some(&from), Some(&to)) => has_path_connecting(&self.graph, to, from, None),
            _ => false,
        }
    }

    /// Validates the graph and produces a runner for it.
    pub fn finish(self) -> Result<Runner, ConfigError> {
        // Registration only accepts references to existing tasks, so a cycle
        // cannot be built through the public API. This guards the invariant.
        if let Err(cycle) = toposort(&self.graph, None) {
            let name = self.graph[cycle.node_id()].name.clone();
            return Err(ConfigError::Cycle(name));
        }

        Ok(Runner::new(self.graph, self.names))
    }

    fn insert(
        &mut self,
        name: String,
        kind: Kind,
        references: Vec<String>,
    ) -> Result<(), ConfigError> {
        if self.names.contains_key(&name) {
            return Err(ConfigError::DuplicateTask(name));
        }

        let mut edges = Vec::with_capacity(references.len());
        for reference in references {
            match self.names.get(&reference) {
                Some(&index) => edges.push(index),
                None => {
                    return Err(ConfigError::UnknownReference {
                        task: name,
                        missing: reference,
                    });
                }
            }
        }

        let index = self.graph.add_node(Node {
            name: name.clone(),
            kind,
        });

        for dependency in edges {
            self.graph.add_edge(dependency, index, ());
        }

        self.names.insert(name, index);
        Ok(())
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the task graph as a Mermaid diagram. Composite tasks are drawn
/// as rounded nodes.
impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node.name.replace('"', "\\\""); // Simple escape

            if node.is_composite() {
                writeln!(f, "    {}([\"{}\"])", index.index(), name)?;
            } else {
                writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
            }
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// Builder for a single leaf task, returned by [`Blueprint::task`].
pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: Cow<'static, str>,
    prerequisites: Vec<String>,
    continue_on_error: bool,
}

impl<'a> TaskDef<'a> {
    /// Tasks to run, in order, before this one.
    pub fn depends_on<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.prerequisites.extend(names.into_iter().map(Into::into));
        self
    }

    /// When set, an error from this task is logged and the graph carries on
    /// as if the task had finished.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Registers the task with `body`.
    pub fn run<B>(self, body: B) -> Result<(), ConfigError>
    where
        B: TaskBody + 'static,
    {
        let leaf = Leaf {
            body: Arc::new(body),
            prerequisites: self.prerequisites.clone(),
            continue_on_error: self.continue_on_error,
        };

        self.blueprint
            .insert(self.name.into_owned(), Kind::Leaf(leaf), self.prerequisites)
    }

    /// Registers the task with a closure body.
    pub fn action<F>(self, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<Completion> + Send + Sync + 'static,
    {
        self.run(f)
    }
}
