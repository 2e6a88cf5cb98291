//! Utility functions and helper types for cancellation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::core::{Error, Result};

/// Fire `token` once `delay` has elapsed.
///
/// The timer stops early if the token is cancelled by someone else.
pub fn cancel_after(token: &CancellationToken, delay: Duration) -> JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                tracing::debug!(?delay, "cancelling token after delay");
                token.cancel();
            }
        }
    })
}

/// A future that loses the race against a cancellation token.
///
/// The token is checked before the inner future on every poll, so an
/// already-fired token wins even if the inner future is ready.
pub struct Cancellable<F> {
    future: Pin<Box<F>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<F> Cancellable<F> {
    /// Create a new cancellable future
    pub fn new(future: F, token: CancellationToken) -> Self {
        Self {
            future: Box::pin(future),
            cancelled: Box::pin(token.cancelled_owned()),
        }
    }
}

impl<F: Future> Future for Cancellable<F> {
    type Output = Result<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Error::Cancelled));
        }

        match self.future.as_mut().poll(cx) {
            Poll::Ready(output) => Poll::Ready(Ok(output)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Extension trait for making futures cancellable
pub trait CancellableExt: Future + Sized {
    /// Race this future against `token`
    fn cancellable(self, token: &CancellationToken) -> Cancellable<Self> {
        Cancellable::new(self, token.clone())
    }
}

impl<F: Future> CancellableExt for F {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_completes() {
        let token = CancellationToken::new();
        let out = async { 7 }.cancellable(&token).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_aborts_sleep() {
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(500));

        let started = tokio::time::Instant::now();
        let out = tokio::time::sleep(Duration::from_secs(10))
            .cancellable(&token)
            .await;

        assert!(matches!(out, Err(Error::Cancelled)));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fired_token_wins_over_ready_future() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            async { 1 }.cancellable(&token).await,
            Err(Error::Cancelled)
        ));
    }
}
