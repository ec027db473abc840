//! Request-scoped context for audit calls
//!
//! `AuditContext` carries the namespace, an optional deadline and a
//! cancellation token. Contexts are cheap to clone; clones share the token.
//!
//! The broker derives a *detached* context for every log call: it keeps the
//! caller's namespace but not the caller's cancellation, so a client that
//! disconnects mid-request cannot truncate the audit write.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};
use crate::namespace::Namespace;

/// Context passed through every audit operation
#[derive(Debug, Clone)]
pub struct AuditContext {
    namespace: Option<Namespace>,
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Default for AuditContext {
    fn default() -> Self {
        Self::background()
    }
}

impl AuditContext {
    /// An empty context: no namespace, no deadline, never cancelled
    pub fn background() -> Self {
        Self {
            namespace: None,
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// A background context carrying the root namespace
    pub fn root() -> Self {
        Self::background().with_namespace(Namespace::root())
    }

    /// Attach a namespace
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Derive a child context that expires after `timeout`
    ///
    /// The child is cancelled when the parent is cancelled. An existing
    /// earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let proposed = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < proposed => existing,
            _ => proposed,
        };
        Self {
            namespace: self.namespace.clone(),
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    /// Derive a context that keeps only the namespace
    ///
    /// The returned context has its own token and no deadline; cancelling
    /// `self` has no effect on it.
    pub fn detached(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// The namespace, if one was attached
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    /// The deadline, if one applies
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token backing this context
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and every child derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Return the cancellation cause, if any
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(cancelled());
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(deadline_exceeded());
        }
        Ok(())
    }

    /// Run a future until it completes or the context is done
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let sleep = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            res = fut => res,
            _ = self.token.cancelled() => Err(cancelled()),
            _ = sleep => Err(deadline_exceeded()),
        }
    }
}

fn cancelled() -> Error {
    Error::new("", "", ErrorKind::Cancelled)
}

fn deadline_exceeded() -> Error {
    Error::new("", "", ErrorKind::DeadlineExceeded)
}
