//! Context - キャンセルシグナル
//!
//! すべてのブロッキング操作（`send_until`, `wait`, `send_and_wait`, `Task::run`）は
//! 「操作の完了」と「Context のキャンセル」を競合させる。
//!
//! # キャンセルの種類
//! - 明示的な `cancel()`
//! - deadline（`with_timeout` / `with_deadline`）
//! - 親からの伝播（子 Context は親のキャンセルを引き継ぐ）

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Cancelled, Error};

/// A cancellation signal with an associated reason.
///
/// Cloning shares the same signal. Use [`Context::with_cancel`] to derive a
/// child that can be cancelled on its own without affecting the parent.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    reason: Arc<OnceLock<Cancelled>>,
    parent: Option<Arc<Context>>,
}

impl Context {
    /// A root context that is never cancelled unless `cancel` is called.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            parent: None,
        }
    }

    /// Derive a child that fires when either it or `self` is cancelled.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Derive a child that fires after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child that fires at `deadline`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let child = self.with_cancel();
        if deadline <= Instant::now() {
            child.cancel_with(Cancelled::DeadlineExceeded);
            return child;
        }
        let timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    timer.cancel_with(Cancelled::DeadlineExceeded);
                }
            }
        });
        child
    }

    pub fn cancel(&self) {
        self.cancel_with(Cancelled::Canceled);
    }

    fn cancel_with(&self, reason: Cancelled) {
        // 最初のキャンセル理由を残す
        if !self.token.is_cancelled() {
            let _ = self.reason.set(reason);
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled. Cancel safe.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The reason this context fired, or `None` while it is still live.
    pub fn err(&self) -> Option<Cancelled> {
        if !self.token.is_cancelled() {
            return None;
        }
        if let Some(reason) = self.reason.get() {
            return Some(*reason);
        }
        match &self.parent {
            Some(parent) => parent.err(),
            None => Some(Cancelled::Canceled),
        }
    }

    /// [`Context::err`] as an [`Error`], for use once the context has fired.
    pub fn error(&self) -> Error {
        Error::Cancelled(self.err().unwrap_or(Cancelled::Canceled))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.err(), None);
    }

    #[test]
    fn cancel_reports_canceled() {
        let ctx = Context::background();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.err(), Some(Cancelled::Canceled));
        assert!(ctx.error().is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_deadline_propagates_to_child() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_cancel();

        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should observe the parent's deadline");
        assert_eq!(child.err(), Some(Cancelled::DeadlineExceeded));
        assert_eq!(parent.err(), Some(Cancelled::DeadlineExceeded));
    }

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let zero = Context::background().with_timeout(Duration::ZERO);
        assert!(zero.is_cancelled());
        assert_eq!(zero.err(), Some(Cancelled::DeadlineExceeded));

        let past = Context::background().with_deadline(Instant::now() - Duration::from_millis(5));
        assert!(past.is_cancelled());
        assert_eq!(past.err(), Some(Cancelled::DeadlineExceeded));
    }

    #[tokio::test]
    async fn explicit_cancel_beats_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(60));
        ctx.cancel();
        assert_eq!(ctx.err(), Some(Cancelled::Canceled));
    }

    #[tokio::test]
    async fn clones_share_the_signal() {
        let ctx = Context::background();
        let clone = ctx.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
