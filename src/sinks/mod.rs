//! Sink implementations used by action stages.

use async_trait::async_trait;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::core::{Result, Sink};
use crate::report::Reporter;

/// A sink that calls a function for every item.
pub struct FnSink<F, T> {
    f: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FnSink<F, T> {
    /// Create a sink from a fallible function
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Sink for FnSink<F, T>
where
    F: FnMut(T) -> Result<()> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn write(&mut self, item: Self::Item) -> Result<()> {
        (self.f)(item)
    }
}

/// A sink that reports every item as a line.
pub struct ReportSink<R, T> {
    reporter: R,
    _phantom: PhantomData<fn(T)>,
}

impl<R, T> ReportSink<R, T> {
    /// Create a sink that reports through `reporter`
    pub fn new(reporter: R) -> Self {
        Self {
            reporter,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<R, T> Sink for ReportSink<R, T>
where
    R: Reporter + 'static,
    T: Display + Send + 'static,
{
    type Item = T;

    async fn write(&mut self, item: Self::Item) -> Result<()> {
        self.reporter.report(&item.to_string());
        Ok(())
    }
}

/// A sink that collects items into a vector.
///
/// Clones share the same buffer.
pub struct CollectSink<T> {
    items: Arc<TokioMutex<Vec<T>>>,
}

impl<T: Send + 'static + Clone> CollectSink<T> {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Get a copy of the collected items
    pub async fn snapshot(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    /// Get a clone of the items Arc for external access
    pub fn items(&self) -> Arc<TokioMutex<Vec<T>>> {
        self.items.clone()
    }
}

#[async_trait]
impl<T: Send + 'static + Clone> Sink for CollectSink<T> {
    type Item = T;

    async fn write(&mut self, item: Self::Item) -> Result<()> {
        self.items.lock().await.push(item);
        Ok(())
    }
}

impl<T: Send + 'static + Clone> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}
