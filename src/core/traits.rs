//! Core traits for sequences, processors and sinks.
//!
//! A [`Source`] is pulled one item at a time; a [`Processor`] turns each input
//! into zero or more outputs; a [`Sink`] consumes items for their side
//! effects. Pipeline stages are built on processors and sinks, while the
//! async sequences implement [`Source`].

use crate::core::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A pull-based asynchronous sequence.
///
/// Each call to [`Source::next`] resumes the producer, which may suspend
/// (waiting on a timer, checking a cancellation token) before yielding
/// exactly one item. The producer never runs ahead of the consumer.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use taskweld::core::{Result, Source};
///
/// struct CounterSource {
///     current: u64,
///     max: u64,
/// }
///
/// #[async_trait]
/// impl Source for CounterSource {
///     type Item = u64;
///
///     async fn next(&mut self) -> Result<Option<Self::Item>> {
///         if self.current < self.max {
///             self.current += 1;
///             Ok(Some(self.current))
///         } else {
///             Ok(None)
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Source {
    /// The type of items this source yields
    type Item: Send + 'static;

    /// Resume the producer and wait for the next item, or `None` once the
    /// sequence is exhausted.
    async fn next(&mut self) -> Result<Option<Self::Item>>;

    /// Attach the cancellation token observed at every suspend point.
    ///
    /// Only one token may be attached per iteration.
    fn attach_cancellation(&mut self, token: CancellationToken) -> Result<()> {
        let _ = token;
        Err(Error::CancellationUnsupported)
    }
}

/// A processor transforms each input into zero or more outputs.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use taskweld::core::{Processor, Result};
///
/// struct DoubleProcessor;
///
/// #[async_trait]
/// impl Processor for DoubleProcessor {
///     type Input = i32;
///     type Output = i32;
///
///     async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
///         Ok(vec![item * 2])
///     }
/// }
/// ```
#[async_trait]
pub trait Processor {
    /// The type of items this processor accepts
    type Input: Send + 'static;
    /// The type of items this processor produces
    type Output: Send + 'static;

    /// Process one input item.
    ///
    /// Returning an empty Vec means the item was consumed without output.
    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>>;

    /// Called once the input is drained, allowing final output generation.
    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(vec![])
    }
}

/// A sink consumes items for their side effects.
#[async_trait]
pub trait Sink {
    /// The type of items this sink accepts
    type Item: Send + 'static;

    /// Consume a single item.
    async fn write(&mut self, item: Self::Item) -> Result<()>;

    /// Called once the input is drained.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Extension trait for sources that provides adapter methods
pub trait SourceExt: Source {
    /// Only deliver items matching the predicate.
    ///
    /// Rejected items are still produced upstream, with all their side
    /// effects; they are just not handed to the consumer.
    fn filter<F>(self, predicate: F) -> crate::sources::combinators::Filter<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> bool + Send,
    {
        crate::sources::combinators::Filter::new(self, predicate)
    }

    /// Like [`SourceExt::filter`], but the predicate itself suspends.
    fn filter_async<F, Fut>(self, predicate: F) -> crate::sources::combinators::FilterAsync<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        crate::sources::combinators::FilterAsync::new(self, predicate)
    }

    /// Attach a cancellation token for this iteration.
    fn with_cancellation(mut self, token: CancellationToken) -> Result<Self>
    where
        Self: Sized,
    {
        self.attach_cancellation(token)?;
        Ok(self)
    }

    /// Turn the source into a stream that ends after the first error.
    fn into_stream(self) -> BoxStream<'static, Result<Self::Item>>
    where
        Self: Sized + Send + 'static,
    {
        stream::unfold(Some(self), |state| async move {
            let mut source = state?;
            match source.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(source))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

impl<S: Source> SourceExt for S {}
