//! Adapters over sources.
//!
//! The filtering adapters keep pulling upstream until an item passes, so
//! upstream side effects happen for every item, delivered or not.

use async_trait::async_trait;
use std::future::Future;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Result, Source};
use crate::util::CancellableExt;

/// Source adapter returned by [`crate::core::SourceExt::filter`].
pub struct Filter<S, F> {
    source: S,
    predicate: F,
}

impl<S, F> Filter<S, F> {
    pub fn new(source: S, predicate: F) -> Self {
        Self { source, predicate }
    }

    /// The wrapped source
    pub fn get_ref(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S, F> Source for Filter<S, F>
where
    S: Source + Send,
    F: FnMut(&S::Item) -> bool + Send,
{
    type Item = S::Item;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        while let Some(item) = self.source.next().await? {
            if (self.predicate)(&item) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn attach_cancellation(&mut self, token: CancellationToken) -> Result<()> {
        self.source.attach_cancellation(token)
    }
}

/// Source adapter returned by [`crate::core::SourceExt::filter_async`].
pub struct FilterAsync<S, F> {
    source: S,
    predicate: F,
}

impl<S, F> FilterAsync<S, F> {
    pub fn new(source: S, predicate: F) -> Self {
        Self { source, predicate }
    }

    /// The wrapped source
    pub fn get_ref(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S, F, Fut> Source for FilterAsync<S, F>
where
    S: Source + Send,
    F: FnMut(&S::Item) -> Fut + Send,
    Fut: Future<Output = bool> + Send,
{
    type Item = S::Item;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        while let Some(item) = self.source.next().await? {
            if (self.predicate)(&item).await {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn attach_cancellation(&mut self, token: CancellationToken) -> Result<()> {
        self.source.attach_cancellation(token)
    }
}

/// Pull-based view of any [`Stream`].
///
/// With a token attached, each pull races the stream against it.
pub struct StreamSource<S> {
    stream: S,
    token: Option<CancellationToken>,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            token: None,
        }
    }

    /// The wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

#[async_trait]
impl<S> Source for StreamSource<S>
where
    S: Stream + Unpin + Send,
    S::Item: Send + 'static,
{
    type Item = S::Item;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        match &self.token {
            Some(token) => StreamExt::next(&mut self.stream).cancellable(token).await,
            None => Ok(StreamExt::next(&mut self.stream).await),
        }
    }

    fn attach_cancellation(&mut self, token: CancellationToken) -> Result<()> {
        if self.token.is_some() {
            return Err(Error::CancellationAlreadyAttached);
        }
        self.token = Some(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::StreamSource;
    use crate::core::{Source, SourceExt};
    use crate::report::MemoryReporter;
    use crate::sources::{DelayedSequence, SequenceState};
    use std::time::Duration;
    use tokio_stream::Stream;

    #[tokio::test(start_paused = true)]
    async fn test_filter_combinator() {
        let mut filtered = DelayedSequence::counting(10)
            .step(Duration::ZERO)
            .produce()
            .filter(|x| x % 3 == 0);

        let mut results = Vec::new();
        while let Some(item) = filtered.next().await.unwrap() {
            results.push(item);
        }

        assert_eq!(results, vec![0, 3, 6, 9]);
        assert_eq!(filtered.get_ref().position(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_async_combinator() {
        let reporter = MemoryReporter::new();
        let mut filtered = DelayedSequence::counting(5)
            .step(Duration::ZERO)
            .reporter(reporter.clone())
            .produce()
            .filter_async(|x: &usize| {
                let odd = x % 2 == 1;
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    odd
                }
            });

        let mut results = Vec::new();
        while let Some(item) = filtered.next().await.unwrap() {
            results.push(item);
        }

        assert_eq!(results, vec![1, 3]);
        assert_eq!(reporter.count_prefixed("Now we resume."), 5);
        assert_eq!(filtered.get_ref().state(), SequenceState::Completed);
    }

    #[tokio::test]
    async fn test_stream_source_pulls_and_cancels() {
        let mut source = StreamSource::new(tokio_stream::iter(vec![1, 2]));
        assert_eq!(source.next().await.unwrap(), Some(1));
        assert_eq!(source.get_ref().size_hint(), (1, Some(1)));

        let token = tokio_util::sync::CancellationToken::new();
        source.attach_cancellation(token.clone()).unwrap();
        assert!(matches!(
            source.attach_cancellation(token.clone()),
            Err(crate::core::Error::CancellationAlreadyAttached)
        ));
        token.cancel();
        assert!(source.next().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_filter_forwards_cancellation() {
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let mut filtered = DelayedSequence::counting(3)
            .produce()
            .filter(|_| true)
            .with_cancellation(token)
            .unwrap();

        assert!(filtered.next().await.unwrap_err().is_cancelled());
    }
}
