//! Shape of the task graph.
//!
//! A [`Step`] describes how a composite task runs the tasks it references:
//! one after another ([`series`]) or all at once ([`parallel`]). Steps nest
//! freely, so `series(["clean".into(), parallel(["styles", "assets"])])`
//! cleans first and then builds styles and assets side by side.

use std::borrow::Cow;
use std::sync::Arc;

use crate::engine::TaskBody;

/// A composition of registered tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a single registered task (leaf or composite).
    Task(Cow<'static, str>),
    /// Run every step in order, each one after the previous has signalled
    /// completion.
    Series(Vec<Step>),
    /// Start every step together and wait until all have signalled
    /// completion or readiness.
    Parallel(Vec<Step>),
}

impl Step {
    /// Every task name referenced anywhere inside this step.
    pub fn references(&self) -> Vec<&str> {
        let mut acc = Vec::new();
        self.collect_references(&mut acc);
        acc
    }

    fn collect_references<'a>(&'a self, acc: &mut Vec<&'a str>) {
        match self {
            Step::Task(name) => {
                let name: &str = name;
                if !acc.contains(&name) {
                    acc.push(name);
                }
            }
            Step::Series(steps) | Step::Parallel(steps) => {
                for step in steps {
                    step.collect_references(acc);
                }
            }
        }
    }
}

impl From<&'static str> for Step {
    fn from(name: &'static str) -> Self {
        Step::Task(Cow::Borrowed(name))
    }
}

impl From<String> for Step {
    fn from(name: String) -> Self {
        Step::Task(Cow::Owned(name))
    }
}

/// Runs `steps` strictly one after another.
pub fn series<I>(steps: I) -> Step
where
    I: IntoIterator,
    I::Item: Into<Step>,
{
    Step::Series(steps.into_iter().map(Into::into).collect())
}

/// Starts `steps` together; the group is done once all of them are.
pub fn parallel<I>(steps: I) -> Step
where
    I: IntoIterator,
    I::Item: Into<Step>,
{
    Step::Parallel(steps.into_iter().map(Into::into).collect())
}

/// A node of the task graph.
pub(crate) struct Node {
    pub name: String,
    pub kind: Kind,
}

pub(crate) enum Kind {
    Leaf(Leaf),
    Composite(Step),
}

pub(crate) struct Leaf {
    pub body: Arc<dyn TaskBody>,
    pub prerequisites: Vec<String>,
    pub continue_on_error: bool,
}

impl Node {
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, Kind::Composite(_))
    }
}
