//! Structured parallel loops.
//!
//! The synchronous drivers run on the rayon pool. Items are claimed in
//! index order from a shared cursor, and a worker checks the stop flag
//! before each claim, so an item claimed before [`LoopState::stop`] always
//! runs while later ones are skipped. Work already running is never
//! interrupted.
//!
//! [`for_each_async`] runs on Tokio and races every item against a
//! cancellation token instead.

mod tree;

pub use tree::{traverse, NodeId, Traversal, Tree};

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Result};
use crate::util::CancellableExt;

/// Options shared by every parallel driver
#[derive(Debug, Clone, Default)]
pub struct ParallelOptions {
    /// Upper bound on concurrently running items; defaults to the pool size
    pub max_degree_of_parallelism: Option<usize>,
    /// Token observed before each claim and at every async suspend point
    pub cancellation_token: Option<CancellationToken>,
}

impl ParallelOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of concurrently running items
    pub fn max_degree_of_parallelism(mut self, max: usize) -> Self {
        self.max_degree_of_parallelism = Some(max.max(1));
        self
    }

    /// Observe `token` for cancellation
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    fn degree(&self) -> usize {
        self.max_degree_of_parallelism
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    fn workers_for(&self, items: usize) -> usize {
        self.degree().min(items).max(1)
    }
}

/// Shared best-effort stop signal for one loop.
#[derive(Debug, Default)]
pub struct LoopState {
    stopped: AtomicBool,
}

impl LoopState {
    /// Ask the loop to start no further items.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("parallel loop stop requested");
        }
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Outcome of a synchronous parallel loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopResult {
    completed: bool,
}

impl LoopResult {
    /// True when every item ran, false when the loop was stopped
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Hands items out in index order until exhausted, stopped or cancelled.
struct Dispatch<'a, T> {
    items: &'a [T],
    next: AtomicUsize,
    state: LoopState,
    token: Option<&'a CancellationToken>,
    cancelled: AtomicBool,
}

impl<'a, T> Dispatch<'a, T> {
    fn new(items: &'a [T], options: &'a ParallelOptions) -> Self {
        Self {
            items,
            next: AtomicUsize::new(0),
            state: LoopState::default(),
            token: options.cancellation_token.as_ref(),
            cancelled: AtomicBool::new(false),
        }
    }

    fn claim(&self) -> Option<&'a T> {
        if self.state.is_stopped() {
            return None;
        }
        if self.token.is_some_and(CancellationToken::is_cancelled) {
            self.cancelled.store(true, Ordering::SeqCst);
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.items.get(index)
    }

    fn finish(self) -> Result<LoopResult> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        Ok(LoopResult {
            completed: !self.state.is_stopped(),
        })
    }
}

fn run_workers<T, W>(dispatch: &Dispatch<'_, T>, workers: usize, worker: W)
where
    T: Sync,
    W: Fn(&Dispatch<'_, T>) + Sync,
{
    tracing::trace!(workers, items = dispatch.items.len(), "starting parallel loop");
    let worker = &worker;
    rayon::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(move |_| worker(dispatch));
        }
    });
}

/// Run `body` for every item on the rayon pool.
///
/// `body` may call [`LoopState::stop`]; items not yet claimed are then
/// skipped, and the result reports the loop as not completed. Fails with
/// [`Error::Cancelled`] if the options' token fired before every item was
/// claimed.
pub fn for_each<T, F>(items: &[T], options: &ParallelOptions, body: F) -> Result<LoopResult>
where
    T: Sync,
    F: Fn(&T, &LoopState) + Sync,
{
    try_for_each(items, options, |item, state| {
        body(item, state);
        Ok(())
    })
}

/// Like [`for_each`], but a failing item stops the loop.
///
/// Every failure is returned; several come back as [`Error::Multiple`].
/// No item is retried.
pub fn try_for_each<T, F>(items: &[T], options: &ParallelOptions, body: F) -> Result<LoopResult>
where
    T: Sync,
    F: Fn(&T, &LoopState) -> Result<()> + Sync,
{
    let dispatch = Dispatch::new(items, options);
    let errors = Mutex::new(Vec::new());

    run_workers(&dispatch, options.workers_for(items.len()), |dispatch| {
        while let Some(item) = dispatch.claim() {
            if let Err(error) = body(item, &dispatch.state) {
                tracing::debug!(%error, "parallel loop item failed");
                dispatch.state.stop();
                errors.lock().push(error);
            }
        }
    });

    if let Some(error) = Error::collect(errors.into_inner()) {
        return Err(error);
    }
    dispatch.finish()
}

/// Fold items in parallel with one private accumulator per worker.
///
/// Each worker seeds its accumulator with `init`, folds every item it
/// claims into it, then merges it into `total` exactly once. The lock on
/// the total is only held for the merge. For an associative, commutative
/// fold the result equals the sequential fold.
pub fn aggregate<T, L, A, I, F, M>(
    items: &[T],
    options: &ParallelOptions,
    total: A,
    init: I,
    fold: F,
    merge: M,
) -> Result<A>
where
    T: Sync,
    A: Send,
    I: Fn() -> L + Sync,
    F: Fn(L, &T, &LoopState) -> L + Sync,
    M: Fn(&mut A, L) + Sync,
{
    let dispatch = Dispatch::new(items, options);
    let total = Mutex::new(total);

    run_workers(&dispatch, options.workers_for(items.len()), |dispatch| {
        let mut local = init();
        while let Some(item) = dispatch.claim() {
            local = fold(local, item, &dispatch.state);
        }
        let mut total = total.lock();
        merge(&mut *total, local);
        tracing::trace!("worker merged local accumulator");
    });

    dispatch.finish()?;
    Ok(total.into_inner())
}

/// Run an async `body` for every item with cooperative cancellation.
///
/// At most `max_degree_of_parallelism` items run at once, each as its own
/// Tokio task. Every body receives a token and is raced against it, so
/// running and waiting items abort at their next suspend point.
///
/// If the options' token fires, the call fails with [`Error::Cancelled`].
/// A body that fails with its own cancellation fails the call the same
/// way. If a body fails otherwise, the remaining items are cancelled and
/// the failure is returned.
pub async fn for_each_async<T, F, Fut>(
    items: impl IntoIterator<Item = T>,
    options: &ParallelOptions,
    body: F,
) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let outer = options.cancellation_token.clone().unwrap_or_default();
    let token = outer.child_token();
    // set when this loop cancelled its own items after a real failure
    let aborted = Arc::new(AtomicBool::new(false));
    let permits = Arc::new(Semaphore::new(options.degree()));
    let body = Arc::new(body);
    let mut tasks = JoinSet::new();

    for item in items {
        let permit = match permits.clone().acquire_owned().cancellable(&token).await {
            Ok(Ok(permit)) => permit,
            _ => break,
        };
        let body = body.clone();
        let token = token.clone();
        let aborted = aborted.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = body(item, token.clone())
                .cancellable(&token)
                .await
                .and_then(|result| result);
            if let Err(error) = &result {
                if !error.is_cancelled() {
                    tracing::debug!(%error, "async loop item failed; cancelling siblings");
                    aborted.store(true, Ordering::SeqCst);
                    token.cancel();
                }
            }
            result
        });
    }

    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => errors.push(error),
            Err(join_error) => {
                aborted.store(true, Ordering::SeqCst);
                token.cancel();
                errors.push(join_error.into());
            }
        }
    }

    if outer.is_cancelled() {
        tracing::debug!("async parallel loop cancelled");
        return Err(Error::Cancelled);
    }
    // cancellations caused by a sibling's failure are not failures of their own
    let failures = if aborted.load(Ordering::SeqCst) {
        errors.into_iter().filter(|e| !e.is_cancelled()).collect()
    } else {
        errors
    };
    match Error::collect(failures) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workers_capped_by_items() {
        let options = ParallelOptions::new().max_degree_of_parallelism(8);
        assert_eq!(options.workers_for(3), 3);
        assert_eq!(options.workers_for(0), 1);
        assert_eq!(ParallelOptions::new().max_degree_of_parallelism(0).degree(), 1);
    }

    #[test]
    fn test_claims_in_index_order() {
        let items = [10, 20, 30];
        let options = ParallelOptions::new();
        let dispatch = Dispatch::new(&items, &options);
        assert_eq!(dispatch.claim(), Some(&10));
        assert_eq!(dispatch.claim(), Some(&20));
        dispatch.state.stop();
        assert_eq!(dispatch.claim(), None);
        assert!(!dispatch.finish().unwrap().is_completed());
    }

    #[test]
    fn test_fired_token_refuses_claims() {
        let token = CancellationToken::new();
        token.cancel();
        let items = [1];
        let options = ParallelOptions::new().cancellation_token(token);
        let dispatch = Dispatch::new(&items, &options);
        assert_eq!(dispatch.claim(), None);
        assert!(matches!(dispatch.finish(), Err(Error::Cancelled)));
    }
}
