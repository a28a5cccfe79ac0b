//! Cooperative cancellation shared by every stage.
//!
//! Every stage needs the same "cancel once, observed by every clone"
//! broadcast shape, but some also need to synchronously check "has this
//! already fired" without awaiting (e.g. inside a tight fetch loop). A
//! `tokio::sync::watch<bool>` gives both: a cheap synchronous read via
//! `borrow`, and an async `changed()` to await for everyone else.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Derives a child token. For this pipeline a child and the root
    /// observe the same signal; the distinction exists so callers can
    /// pass in a token owned by an outer process (e.g. a parent signal
    /// handler) without the supervisor needing a different type.
    pub fn child_token(&self) -> Self {
        self.clone()
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires. Safe to race inside
    /// `tokio::select!` alongside queue sends/receives.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let child = token.child_token();

        let waiter = tokio::spawn(async move {
            child.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation should be observed")
            .unwrap();
    }

    #[test]
    fn is_cancelled_is_synchronous() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
