//! Thread affinity and liveness checks for every public entry point.

use std::future::Future;
use std::thread::{self, ThreadId};

use chatsync_types::error::AccessError;
use tokio_util::sync::CancellationToken;

/// Binds a session (or one of its trackers) to the thread that created it.
///
/// Destroying a gate cancels its token; gates made with [`SessionGate::child`]
/// are destroyed together with their parent.
#[derive(Debug, Clone)]
pub struct SessionGate {
    owner: ThreadId,
    token: CancellationToken,
}

impl SessionGate {
    /// A live gate owned by the calling thread.
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            token: CancellationToken::new(),
        }
    }

    /// Fail unless called on the owner thread of a live gate.
    pub fn check(&self) -> Result<(), AccessError> {
        if !self.is_owner_thread() {
            return Err(AccessError::InvalidThread);
        }
        if self.token.is_cancelled() {
            return Err(AccessError::InvalidSession);
        }
        Ok(())
    }

    /// Gate with the same owner that dies with this one (or on its own).
    pub fn child(&self) -> Self {
        Self {
            owner: self.owner,
            token: self.token.child_token(),
        }
    }

    pub fn destroy(&self) {
        self.token.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the gate is destroyed.
    pub async fn destroyed(&self) {
        self.token.cancelled().await
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Run `fut` until it finishes or the gate is destroyed, whichever comes first.
    pub fn guard<F>(&self, fut: F) -> impl Future<Output = Result<F::Output, AccessError>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let token = self.token.clone();
        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(AccessError::InvalidSession),
                out = fut => Ok(out),
            }
        }
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}
