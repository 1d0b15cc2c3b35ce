#![forbid(unsafe_code)]
//! A small front-end build runner.
//!
//! Builds are described as a graph of named tasks. Leaf tasks each drive one
//! collaborator (the CSS transformer, the script bundler, the file system,
//! the dev server), composite tasks sequence them with [`series`] and
//! [`parallel`]. [`pipeline::standard`] wires up the stock graph:
//!
//! ```text
//! clean -> { styles, assets, webpack } -> build
//! build -> { watch, server } -> dev -> default
//! ```
//!
//! Long-running tasks report readiness after their first pass and keep
//! working on a background [`Service`]; the graph moves on as soon as they
//! are ready.

mod blueprint;
mod cache;
mod config;
mod engine;
mod error;
mod graph;
pub mod pipeline;
mod report;
pub mod tasks;
mod utils;
mod watch;

pub use crate::blueprint::{Blueprint, TaskDef};
pub use crate::cache::Remembered;
pub use crate::config::{Config, DEFAULT_CONFIG_FILE};
pub use crate::engine::{
    Completion, Diagnostics, Runner, Service, Session, Shutdown, TaskBody, TaskContext,
    TaskExecution,
};
pub use crate::error::*;
pub use crate::graph::{Step, parallel, series};
pub use crate::watch::{WatchRoot, WatchSet, resolve_watch_path};
