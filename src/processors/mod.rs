//! Processor implementations used by transform stages.

use async_trait::async_trait;
use std::marker::PhantomData;

use crate::core::{Processor, Result};

/// A processor that maps items using a function.
pub struct MapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> MapProcessor<F, T, U> {
    /// Create a new map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Processor for MapProcessor<F, T, U>
where
    F: FnMut(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        Ok(vec![(self.f)(item)])
    }
}

/// A processor that maps items with a fallible function.
///
/// An `Err` faults the owning stage.
pub struct TryMapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> TryMapProcessor<F, T, U> {
    /// Create a new fallible map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Processor for TryMapProcessor<F, T, U>
where
    F: FnMut(T) -> Result<U> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        Ok(vec![(self.f)(item)?])
    }
}

/// A processor that only passes items satisfying the predicate.
pub struct FilterProcessor<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FilterProcessor<F, T> {
    /// Create a new filter processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Processor for FilterProcessor<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        if (self.predicate)(&item) {
            Ok(vec![item])
        } else {
            Ok(vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;

    #[tokio::test]
    async fn test_map_processor() {
        let mut double = MapProcessor::new(|x: i32| x * 2);
        assert_eq!(double.process(9).await.unwrap(), vec![18]);
        assert!(double.finish().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_try_map_processor_propagates() {
        let mut checked = TryMapProcessor::new(|x: i32| {
            if x < 0 {
                Err(Error::custom("negative"))
            } else {
                Ok(x)
            }
        });
        assert_eq!(checked.process(3).await.unwrap(), vec![3]);
        assert!(checked.process(-1).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_processor() {
        let mut evens = FilterProcessor::new(|x: &i32| x % 2 == 0);
        assert_eq!(evens.process(4).await.unwrap(), vec![4]);
        assert!(evens.process(5).await.unwrap().is_empty());
    }
}
