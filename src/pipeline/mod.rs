//! Dataflow stages with linked completion.
//!
//! A [`TransformStage`] runs a [`Processor`] over its input queue and hands
//! outputs to its linked targets; an [`ActionStage`] feeds a [`Sink`]. Each
//! stage owns one worker task, so items leave a stage in the order they
//! entered it.
//!
//! ```rust
//! use taskweld::pipeline::{ActionStage, LinkOptions, Stage, TransformStage};
//!
//! # #[tokio::main]
//! # async fn main() -> taskweld::Result<()> {
//! let multiply = TransformStage::map(|x: i32| x * 2);
//! let subtract = TransformStage::map(|x: i32| x - 2);
//! let print = ActionStage::from_fn(|x: i32| println!("{}", x));
//!
//! let options = LinkOptions::default().propagate_completion(true);
//! multiply.link_to(&subtract, options);
//! subtract.link_to(&print, options);
//!
//! multiply.post(9)?;
//! multiply.complete();
//! print.completion().await
//! # }
//! ```

mod inlet;

pub use inlet::Inlet;

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;

use crate::core::{Error, Processor, Result, Sink};
use crate::processors::{MapProcessor, TryMapProcessor};
use crate::sinks::FnSink;
use inlet::{Links, Receiver, WorkerInlet};

/// Configuration for a single stage
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Name used in errors and log events
    pub name: String,
    /// Maximum number of queued items, unbounded when `None`
    pub bounded_capacity: Option<usize>,
}

impl StageConfig {
    /// Create a config for a named, unbounded stage
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bounded_capacity: None,
        }
    }

    /// Set the stage name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bound the input queue
    pub fn bounded_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = Some(capacity);
        self
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new("stage")
    }
}

/// Options for a link between two stages
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Complete (or fault) the target once the source has finished
    pub propagate_completion: bool,
}

impl LinkOptions {
    /// Set whether completion propagates across the link
    pub fn propagate_completion(mut self, propagate: bool) -> Self {
        self.propagate_completion = propagate;
        self
    }
}

/// Observes a stage's final outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    outcome: watch::Receiver<Option<Result<()>>>,
}

impl Completion {
    fn channel() -> (watch::Sender<Option<Result<()>>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { outcome: rx })
    }

    /// Wait until the stage has drained and finished.
    ///
    /// Resolves to the fault if the stage faulted.
    pub async fn wait(&self) -> Result<()> {
        let mut outcome = self.outcome.clone();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::TaskFailed("stage worker stopped before completing".into()))?;
        (*finished).clone().unwrap_or(Ok(()))
    }

    /// Whether the stage has finished
    pub fn is_completed(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

/// Common surface of every stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The type of items this stage accepts
    type Input: Send + 'static;

    /// The stage's input queue
    fn inlet(&self) -> &Arc<Inlet<Self::Input>>;

    /// Handle on the stage's completion
    fn completion_handle(&self) -> &Completion;

    /// Stage name
    fn name(&self) -> &str {
        self.inlet().name()
    }

    /// Queue an item without waiting; fails with `QueueFull` or `Declined`.
    fn post(&self, item: Self::Input) -> Result<()> {
        self.inlet().post(item)
    }

    /// Queue an item, waiting for room in a bounded queue.
    async fn send(&self, item: Self::Input) -> Result<()> {
        self.inlet().send(item).await
    }

    /// Stop accepting input; already queued items are still processed.
    fn complete(&self) {
        self.inlet().complete()
    }

    /// Fault the stage; queued items are dropped.
    fn fault(&self, error: Error) {
        self.inlet().fault(error)
    }

    /// Wait for the stage to drain and finish.
    async fn completion(&self) -> Result<()> {
        self.completion_handle().wait().await
    }

    /// Whether the stage has finished
    fn is_completed(&self) -> bool {
        self.completion_handle().is_completed()
    }
}

/// A stage that transforms items and passes them to linked targets.
///
/// Must be created inside a Tokio runtime.
pub struct TransformStage<I, O> {
    inlet: Arc<Inlet<I>>,
    links: Arc<Links<O>>,
    completion: Completion,
}

impl<I, O> TransformStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Spawn a stage running `processor`
    pub fn new<P>(processor: P, config: StageConfig) -> Self
    where
        P: Processor<Input = I, Output = O> + Send + 'static,
    {
        let (inlet, worker, receiver) = Inlet::new(config.name, config.bounded_capacity);
        let links = Arc::new(Links::new());
        let (done, completion) = Completion::channel();

        tokio::spawn(run_transform(
            processor,
            worker,
            receiver,
            links.clone(),
            done,
        ));

        Self {
            inlet,
            links,
            completion,
        }
    }

    /// Spawn an unbounded stage applying `f` to every item
    pub fn map<F>(f: F) -> Self
    where
        F: FnMut(I) -> O + Send + 'static,
    {
        Self::new(MapProcessor::new(f), StageConfig::new("map"))
    }

    /// Spawn an unbounded stage applying a fallible `f`; an error faults it
    pub fn try_map<F>(f: F) -> Self
    where
        F: FnMut(I) -> Result<O> + Send + 'static,
    {
        Self::new(TryMapProcessor::new(f), StageConfig::new("try_map"))
    }

    /// Feed this stage's outputs into `target`.
    ///
    /// With several links, each output goes to the first target that
    /// accepts it, in link order.
    pub fn link_to<S>(&self, target: &S, options: LinkOptions)
    where
        S: Stage<Input = O>,
    {
        tracing::debug!(
            from = %self.inlet.name(),
            to = %target.name(),
            propagate = options.propagate_completion,
            "linking stages"
        );
        self.links
            .add(target.inlet().clone(), options.propagate_completion);
    }
}

#[async_trait]
impl<I, O> Stage for TransformStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;

    fn inlet(&self) -> &Arc<Inlet<I>> {
        &self.inlet
    }

    fn completion_handle(&self) -> &Completion {
        &self.completion
    }
}

/// A stage that consumes items for their side effects.
///
/// Must be created inside a Tokio runtime.
pub struct ActionStage<I> {
    inlet: Arc<Inlet<I>>,
    completion: Completion,
}

impl<I: Send + 'static> ActionStage<I> {
    /// Spawn a stage feeding `sink`
    pub fn new<K>(sink: K, config: StageConfig) -> Self
    where
        K: Sink<Item = I> + Send + 'static,
    {
        let (inlet, worker, receiver) = Inlet::new(config.name, config.bounded_capacity);
        let (done, completion) = Completion::channel();

        tokio::spawn(run_action(sink, worker, receiver, done));

        Self { inlet, completion }
    }

    /// Spawn an unbounded stage calling `f` for every item
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(I) + Send + 'static,
    {
        let sink = FnSink::new(move |item| {
            f(item);
            Ok(())
        });
        Self::new(sink, StageConfig::new("action"))
    }

    /// Spawn an unbounded stage calling a fallible `f`; an error faults it
    pub fn try_from_fn<F>(f: F) -> Self
    where
        F: FnMut(I) -> Result<()> + Send + 'static,
    {
        Self::new(FnSink::new(f), StageConfig::new("action"))
    }
}

#[async_trait]
impl<I: Send + 'static> Stage for ActionStage<I> {
    type Input = I;

    fn inlet(&self) -> &Arc<Inlet<I>> {
        &self.inlet
    }

    fn completion_handle(&self) -> &Completion {
        &self.completion
    }
}

async fn run_transform<P>(
    mut processor: P,
    inlet: WorkerInlet<P::Input>,
    mut receiver: Receiver<P::Input>,
    links: Arc<Links<P::Output>>,
    done: watch::Sender<Option<Result<()>>>,
) where
    P: Processor + Send + 'static,
{
    let outcome = AssertUnwindSafe(drain_transform(
        &mut processor,
        &inlet,
        &mut receiver,
        &links,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(panicked(inlet.name(), panic)));
    inlet.settle(&outcome);
    links.finish(&outcome);
    done.send_replace(Some(outcome));
}

async fn drain_transform<P>(
    processor: &mut P,
    inlet: &WorkerInlet<P::Input>,
    receiver: &mut Receiver<P::Input>,
    links: &Links<P::Output>,
) -> Result<()>
where
    P: Processor + Send + 'static,
{
    while let Some(item) = receiver.recv().await {
        inlet.check_fault()?;
        for output in processor.process(item).await? {
            links.deliver(output, inlet.name()).await;
        }
    }
    inlet.check_fault()?;
    for output in processor.finish().await? {
        links.deliver(output, inlet.name()).await;
    }
    Ok(())
}

async fn run_action<K>(
    mut sink: K,
    inlet: WorkerInlet<K::Item>,
    mut receiver: Receiver<K::Item>,
    done: watch::Sender<Option<Result<()>>>,
) where
    K: Sink + Send + 'static,
{
    let outcome = AssertUnwindSafe(drain_action(&mut sink, &inlet, &mut receiver))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked(inlet.name(), panic)));
    inlet.settle(&outcome);
    done.send_replace(Some(outcome));
}

async fn drain_action<K>(
    sink: &mut K,
    inlet: &WorkerInlet<K::Item>,
    receiver: &mut Receiver<K::Item>,
) -> Result<()>
where
    K: Sink + Send + 'static,
{
    while let Some(item) = receiver.recv().await {
        inlet.check_fault()?;
        sink.write(item).await?;
    }
    inlet.check_fault()?;
    sink.finish().await
}

/// Turn a panic caught in a stage worker into a fault.
fn panicked(stage: &str, panic: Box<dyn Any + Send>) -> Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::TaskFailed(format!("stage {} panicked: {}", stage, message))
}
