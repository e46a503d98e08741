//! # Orchestrator: memoized, cycle-checked execution of setup tasks.
//!
//! `run(id)` works in two passes under one lock:
//! 1. **plan**: depth-first walk of every unexecuted task reachable from `id`,
//!    with a `path` stack (the visiting set). Reaching a task already on the
//!    stack is a cycle; reaching an unregistered identifier fails closed.
//!    Nothing executes if planning fails.
//! 2. **execute**: depth-first post-order. Dependencies run in declaration
//!    order, each at most once; the first failure aborts the walk and is
//!    wrapped with every task on the way back to `id`.
//!
//! `run` calls are serialized. An action must not call back into the same
//! orchestrator.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::Task;
use crate::error::{OrchestratorError, TaskError};
use crate::events::{Bus, Event, EventKind};

/// Registers setup tasks and runs them with their dependencies, once each.
///
/// # Example
/// ```
/// use devvisor::{ActionFn, Orchestrator, Task};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), devvisor::OrchestratorError> {
/// let orch = Orchestrator::new();
/// let noop = || ActionFn::arc(|_ctx: CancellationToken| async move { Ok(()) });
///
/// orch.register(Task::new("reqs", noop())).await?;
/// orch.register(Task::new("deps", noop()).with_deps(["reqs"])).await?;
///
/// orch.run("deps", &CancellationToken::new()).await?;
/// assert!(orch.is_executed("reqs").await);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    state: Mutex<State>,
    timeout: Option<Duration>,
    bus: Option<Bus>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    executed: HashSet<String>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Creates an empty orchestrator with unbounded actions and no event bus.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            timeout: None,
            bus: None,
        }
    }

    /// Bounds every action; `None` leaves actions unbounded.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publishes `TaskStarted` / `TaskCompleted` / `TaskFailed` on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Registers a task.
    ///
    /// # Errors
    /// - [`OrchestratorError::EmptyTaskId`] for an empty identifier
    /// - [`OrchestratorError::DuplicateTask`] if the identifier already exists
    ///
    /// Dependencies are resolved lazily by [`run`](Self::run), so tasks may be
    /// registered in any order.
    pub async fn register(&self, task: Task) -> Result<(), OrchestratorError> {
        if task.id.is_empty() {
            return Err(OrchestratorError::EmptyTaskId);
        }
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::DuplicateTask { id: task.id });
        }
        debug!(task = %task.id, deps = ?task.deps, "task registered");
        state.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Executes `id` and, transitively, every unexecuted dependency.
    ///
    /// Already executed tasks are skipped; running an executed task is a no-op.
    /// Cancelling `ctx` aborts the action in flight with [`TaskError::Canceled`].
    pub async fn run(&self, id: &str, ctx: &CancellationToken) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        state.plan(id)?;
        self.execute(&mut state, id, ctx).await
    }

    /// Clears every executed flag so the next `run` executes again.
    pub async fn reset(&self) {
        self.state.lock().await.executed.clear();
    }

    pub async fn is_executed(&self, id: &str) -> bool {
        self.state.lock().await.executed.contains(id)
    }

    /// Registered identifiers, sorted.
    pub async fn registered(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.tasks.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    fn execute<'a>(
        &'a self,
        state: &'a mut State,
        id: &'a str,
        ctx: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), OrchestratorError>> {
        async move {
            if state.executed.contains(id) {
                return Ok(());
            }
            let task = state
                .tasks
                .get(id)
                .cloned()
                .ok_or_else(|| OrchestratorError::UnknownTask {
                    id: id.to_string(),
                    required_by: None,
                })?;

            for dep in &task.deps {
                if let Err(e) = self.execute(state, dep, ctx).await {
                    return Err(OrchestratorError::DependencyFailed {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                        source: Box::new(e),
                    });
                }
            }

            self.invoke(&task, ctx)
                .await
                .map_err(|source| OrchestratorError::TaskFailed {
                    task: task.id.clone(),
                    source,
                })?;
            state.executed.insert(task.id);
            Ok(())
        }
        .boxed()
    }

    async fn invoke(&self, task: &Task, ctx: &CancellationToken) -> Result<(), TaskError> {
        if ctx.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        self.publish(Event::now(EventKind::TaskStarted).with_service(task.id.as_str()));
        info!(task = %task.id, "task started");

        let child = ctx.child_token();
        let attempt = async {
            match self.timeout {
                Some(limit) => time::timeout(limit, task.action.run(child.clone()))
                    .await
                    .unwrap_or(Err(TaskError::Timeout { timeout: limit })),
                None => task.action.run(child.clone()).await,
            }
        };
        let res = tokio::select! {
            res = attempt => res,
            _ = ctx.cancelled() => Err(TaskError::Canceled),
        };

        match &res {
            Ok(()) => {
                info!(task = %task.id, "task completed");
                self.publish(Event::now(EventKind::TaskCompleted).with_service(task.id.as_str()));
            }
            Err(e) => {
                child.cancel();
                if e.is_cancelled() {
                    debug!(task = %task.id, "task cancelled");
                } else {
                    warn!(task = %task.id, error = %e, label = e.as_label(), "task failed");
                }
                self.publish(
                    Event::now(EventKind::TaskFailed)
                        .with_service(task.id.as_str())
                        .with_reason(e.to_string()),
                );
            }
        }
        res
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

impl State {
    fn plan(&self, root: &str) -> Result<(), OrchestratorError> {
        let mut path = Vec::new();
        let mut done = HashSet::new();
        self.visit(root, None, &mut path, &mut done)
    }

    fn visit<'s>(
        &'s self,
        id: &str,
        required_by: Option<&str>,
        path: &mut Vec<&'s str>,
        done: &mut HashSet<&'s str>,
    ) -> Result<(), OrchestratorError> {
        if done.contains(id) || self.executed.contains(id) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|p| *p == id) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|p| p.to_string()).collect();
            cycle.push(id.to_string());
            return Err(OrchestratorError::CircularDependency { cycle });
        }
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| OrchestratorError::UnknownTask {
                id: id.to_string(),
                required_by: required_by.map(str::to_string),
            })?;

        path.push(task.id.as_str());
        for dep in &task.deps {
            self.visit(dep, Some(&task.id), path, done)?;
        }
        path.pop();
        done.insert(task.id.as_str());
        Ok(())
    }
}
