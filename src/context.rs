use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DbError;

/// Caller-supplied deadline and cancellation signal for one database call.
///
/// Every public operation takes a `&QueryContext`; when it expires the in-flight
/// statement is abandoned and the call fails with [`DbError::DeadlineExceeded`] or
/// [`DbError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl QueryContext {
    /// A context that never expires unless cancelled explicitly.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Derive a context that is cancelled along with `self` and may tighten the deadline.
    #[must_use]
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(d), Some(t)) => Some(d.min(Instant::now() + t)),
            (None, Some(t)) => Some(Instant::now() + t),
            (d, None) => d,
        };
        Self {
            deadline,
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error this context reports right now, if it is already done.
    #[must_use]
    pub fn err(&self) -> Option<DbError> {
        if self.token.is_cancelled() {
            Some(DbError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(DbError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DbError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => DbError::Cancelled,
                () = tokio::time::sleep_until(deadline) => DbError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DbError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first, in which case `fut`
    /// is dropped.
    ///
    /// # Errors
    /// Returns the error of `fut`, or the context's cancellation error.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_deadline_short_circuits() {
        let ctx = QueryContext::with_timeout(Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(1)).await;
        let res: Result<(), DbError> = ctx.run(async { Ok(()) }).await;
        assert!(matches!(res, Err(DbError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn cancellation_propagates_to_children() {
        let parent = QueryContext::background();
        let child = parent.child(Some(Duration::from_secs(30)));
        parent.cancel();
        let res: Result<(), DbError> = child
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(DbError::Cancelled)));
    }

    #[tokio::test]
    async fn completes_when_not_expired() {
        let ctx = QueryContext::with_timeout(Duration::from_secs(5));
        let res = ctx.run(async { Ok::<_, DbError>(7) }).await;
        assert_eq!(res.ok(), Some(7));
    }
}
