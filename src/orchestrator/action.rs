//! # Action abstraction and function-backed implementation.
//!
//! An [`Action`] is the executable body of an orchestrator [`Task`](super::Task).
//! It receives a [`CancellationToken`] that is cancelled when the run context is
//! cancelled or the action exceeds its timeout; implementors should check it at
//! their await points. The common handle type is [`ActionRef`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// # Asynchronous, cancelable setup step.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use devvisor::{Action, TaskError};
///
/// struct CheckToolchain;
///
/// #[async_trait]
/// impl Action for CheckToolchain {
///     async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync + 'static {
    /// Executes the step until completion or cancellation.
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError>;
}

/// Shared handle to an action.
pub type ActionRef = Arc<dyn Action>;

/// Function-backed [`Action`].
///
/// The closure is `Fn`, so the orchestrator may call it again after `reset()`.
///
/// # Example
/// ```
/// use devvisor::{ActionFn, ActionRef};
/// use tokio_util::sync::CancellationToken;
///
/// let action: ActionRef = ActionFn::arc(|_ctx: CancellationToken| async move { Ok(()) });
/// ```
pub struct ActionFn<F> {
    f: F,
}

impl<F> ActionFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Action for ActionFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}
