//! Asynchronous sequences.
//!
//! [`DelayedSequence`] is a restartable generator: every call to
//! [`DelayedSequence::produce`] hands out a fresh [`SequenceCursor`] that
//! yields a fixed number of items, waiting `step * index` before each one.
//! The cursor is an explicit state machine; between pulls it holds no task
//! or thread, only its state.

pub mod combinators;

pub use combinators::StreamSource;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Result, Source};
use crate::report::{NullReporter, Reporter, Stopwatch};
use crate::util::CancellableExt;

/// What a producing cursor does when its token fires during a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnCancel {
    /// Abort the sequence with [`Error::Cancelled`]
    #[default]
    Fail,
    /// Cut the pending delay short and keep producing
    SkipDelay,
}

/// Lifecycle of a [`SequenceCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// No item has been requested yet
    NotStarted,
    /// Working towards the next item (waiting on its delay)
    Producing,
    /// An item was yielded; the producer waits for the next pull
    Suspended,
    /// Every item was produced
    Completed,
    /// A fired token was observed; terminal
    Cancelled,
}

/// Context handed to the item factory for each produced item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Zero-based production index
    pub index: usize,
    /// Time since the generator's stopwatch started
    pub elapsed: Duration,
}

type Factory<T> = Arc<dyn Fn(Tick) -> T + Send + Sync>;

/// A restartable generator of `count` items with increasing latency.
pub struct DelayedSequence<T> {
    count: usize,
    step: Duration,
    on_cancel: OnCancel,
    reporter: Arc<dyn Reporter>,
    stopwatch: Stopwatch,
    factory: Factory<T>,
}

impl DelayedSequence<usize> {
    /// A generator yielding `0..count`
    pub fn counting(count: usize) -> Self {
        Self::new(count, |tick| tick.index)
    }
}

impl<T: Send + 'static> DelayedSequence<T> {
    /// A generator that builds each item from its [`Tick`]
    pub fn new<F>(count: usize, factory: F) -> Self
    where
        F: Fn(Tick) -> T + Send + Sync + 'static,
    {
        Self {
            count,
            step: Duration::from_secs(1),
            on_cancel: OnCancel::default(),
            reporter: Arc::new(NullReporter),
            stopwatch: Stopwatch::start(),
            factory: Arc::new(factory),
        }
    }

    /// Set the per-index delay step (item `i` waits `step * i`)
    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Set what a fired token does to a pending delay
    pub fn on_cancel(mut self, on_cancel: OnCancel) -> Self {
        self.on_cancel = on_cancel;
        self
    }

    /// Set where resume events are reported
    pub fn reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Set the stopwatch used to annotate output
    pub fn stopwatch(mut self, stopwatch: Stopwatch) -> Self {
        self.stopwatch = stopwatch;
        self
    }

    /// Start a fresh iteration
    pub fn produce(&self) -> SequenceCursor<T> {
        SequenceCursor {
            count: self.count,
            step: self.step,
            on_cancel: self.on_cancel,
            reporter: self.reporter.clone(),
            stopwatch: self.stopwatch,
            factory: self.factory.clone(),
            token: None,
            index: 0,
            state: SequenceState::NotStarted,
        }
    }
}

impl<T> fmt::Debug for DelayedSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedSequence")
            .field("count", &self.count)
            .field("step", &self.step)
            .field("on_cancel", &self.on_cancel)
            .finish()
    }
}

/// One iteration over a [`DelayedSequence`].
pub struct SequenceCursor<T> {
    count: usize,
    step: Duration,
    on_cancel: OnCancel,
    reporter: Arc<dyn Reporter>,
    stopwatch: Stopwatch,
    factory: Factory<T>,
    token: Option<CancellationToken>,
    index: usize,
    state: SequenceState,
}

impl<T> SequenceCursor<T> {
    /// Current lifecycle state
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Index of the next item to produce
    pub fn position(&self) -> usize {
        self.index
    }

    fn transition(&mut self, next: SequenceState) {
        tracing::trace!(from = ?self.state, to = ?next, index = self.index, "sequence transition");
        self.state = next;
    }

    fn cancel(&mut self) -> Error {
        tracing::debug!(index = self.index, "sequence cancelled");
        self.transition(SequenceState::Cancelled);
        Error::Cancelled
    }

    /// Wait out the delay for the current index, racing the token.
    async fn delay(&mut self) -> Result<()> {
        let delay = item_delay(self.step, self.index);
        let Some(token) = self.token.clone() else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };

        match tokio::time::sleep(delay).cancellable(&token).await {
            Ok(()) => Ok(()),
            Err(_) if self.on_cancel == OnCancel::SkipDelay => Ok(()),
            Err(_) => Err(self.cancel()),
        }
    }
}

/// `step * index`, saturating at [`Duration::MAX`].
fn item_delay(step: Duration, index: usize) -> Duration {
    u32::try_from(index)
        .ok()
        .and_then(|index| step.checked_mul(index))
        .unwrap_or(Duration::MAX)
}

#[async_trait]
impl<T: Send + 'static> Source for SequenceCursor<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>> {
        match self.state {
            SequenceState::Completed => return Ok(None),
            SequenceState::Cancelled => return Err(Error::Cancelled),
            SequenceState::Suspended => {
                self.reporter.report(&format!(
                    "Now we resume. {}...",
                    self.stopwatch.elapsed_secs()
                ));
                self.index += 1;
            }
            SequenceState::NotStarted | SequenceState::Producing => {}
        }

        if self.index >= self.count {
            self.transition(SequenceState::Completed);
            return Ok(None);
        }

        self.transition(SequenceState::Producing);
        self.delay().await?;

        let item = (self.factory)(Tick {
            index: self.index,
            elapsed: self.stopwatch.elapsed(),
        });
        self.transition(SequenceState::Suspended);
        Ok(Some(item))
    }

    fn attach_cancellation(&mut self, token: CancellationToken) -> Result<()> {
        if self.token.is_some() {
            return Err(Error::CancellationAlreadyAttached);
        }
        self.token = Some(token);
        Ok(())
    }
}
