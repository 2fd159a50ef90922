//! Caravan Flow - the concurrent workflow engine
//!
//! Parses a workflow document into stages, builds the dependency graph,
//! and drives every stage as its own worker: wait on predecessors, run
//! pre hooks, act on the resource, run post hooks, signal completion.

pub mod driver;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod render;
pub mod schema;

pub use driver::{connect, forward, lint, reverse, until};
pub use error::{FlowError, Result};
pub use graph::Depends;
pub use render::Renderer;
pub use schema::{Backends, Jobs, Resource, Stage, Stages, Workflow};
