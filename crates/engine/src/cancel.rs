//! Cooperative cancellation for engine operations.
//!
//! A [`CancelToken`] is threaded through every storage call. It fires either
//! when [`CancelToken::cancel`] is called (on any clone) or when its
//! deadline passes. Storage futures are raced against it with
//! [`CancelToken::run`], so a call blocked on a row lock is abandoned as soon
//! as the token fires.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that only fires when cancelled explicitly.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
            deadline: None,
        }
    }

    /// A token that also fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// Same cancellation flag, with `deadline` (the earliest one wins).
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`EngineError::Cancelled`] if the token already fired.
    pub fn check(&self) -> ResultEngine<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once the token fires.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        let flagged = async move {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flagged => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flagged.await,
        }
    }

    /// Run a storage call unless the token fires first.
    ///
    /// The token is checked before polling `fut`; if it fires while `fut` is
    /// pending, `fut` is dropped and `Cancelled` is returned.
    pub async fn run<T, F>(&self, fut: F) -> ResultEngine<T>
    where
        F: Future<Output = ResultEngine<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(EngineError::Cancelled),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn fresh_token_runs_the_future() {
        let token = CancelToken::new();
        let res = token.run(async { Ok::<_, EngineError>(7) }).await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn cancelled_token_never_polls_the_future() {
        let token = CancelToken::new();
        token.clone().cancel();
        let polled = AtomicBool::new(false);
        let res = token
            .run(async {
                polled.store(true, Ordering::SeqCst);
                Ok::<_, EngineError>(())
            })
            .await;
        assert_eq!(res, Err(EngineError::Cancelled));
        assert!(!polled.load(Ordering::SeqCst));
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_a_pending_call() {
        let token = CancelToken::with_timeout(Duration::from_millis(50));
        let res: ResultEngine<()> = token.run(std::future::pending()).await;
        assert_eq!(res, Err(EngineError::Cancelled));
        assert_eq!(token.check(), Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_from_another_task_wakes_the_waiter() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            remote.cancel();
        });
        let res: ResultEngine<()> = token.run(std::future::pending()).await;
        assert_eq!(res, Err(EngineError::Cancelled));
        handle.await.unwrap();
    }

    #[test]
    fn earliest_deadline_wins() {
        let now = Instant::now();
        let token = CancelToken::new()
            .deadline_at(now + Duration::from_secs(10))
            .deadline_at(now + Duration::from_secs(1));
        assert_eq!(token.deadline(), Some(now + Duration::from_secs(1)));
    }
}
