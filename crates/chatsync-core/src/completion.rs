//! The future handed back by every asynchronous operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chatsync_types::error::AccessError;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tracing::warn;

/// Resolves exactly once with the outcome of an operation.
///
/// Work started through [`Completion::spawn`] keeps running when the
/// completion is dropped, so optimistic state is always settled.
#[must_use = "a completion reports the operation's outcome"]
pub struct Completion<T, E> {
    inner: BoxFuture<'static, Result<T, E>>,
}

impl<T, E> Completion<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self { inner: fut.boxed() }
    }

    /// Already-settled completion.
    pub fn ready(result: Result<T, E>) -> Self {
        Self::new(std::future::ready(result))
    }
}

impl<T, E> Completion<T, E>
where
    T: Send + 'static,
    E: From<AccessError> + Send + 'static,
{
    /// Run `task` on `runtime`; a task that dies without answering resolves
    /// as `InvalidSession`.
    pub(crate) fn spawn<F>(runtime: &Handle, task: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let handle = runtime.spawn(task);
        Self::new(async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "operation task ended without a result");
                    Err(E::from(AccessError::InvalidSession))
                }
            }
        })
    }
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T, E> std::fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
