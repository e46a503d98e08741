//! Dependency-aware setup orchestration.
//!
//! ## Contents
//! - [`Orchestrator`] registers tasks and runs a task with its dependencies, once each
//! - [`Task`] identifier, ordered dependencies, action
//! - [`Action`], [`ActionFn`], [`ActionRef`] the executable body of a task
//!
//! ```text
//! run("run")
//!   ├─ plan: DFS over deps, visiting-set → CircularDependency / UnknownTask
//!   └─ execute: DFS post-order
//!        reqs ──► deps ──► run          (each skipped if already executed)
//!        failure ─► abort, wrap as DependencyFailed up the chain
//! ```

mod action;
mod engine;
mod task;

pub use action::{Action, ActionFn, ActionRef};
pub use engine::Orchestrator;
pub use task::Task;
