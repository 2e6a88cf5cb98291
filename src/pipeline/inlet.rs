//! Stage input queues and output links.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};

use crate::core::{Error, Result};

/// Outcome of a non-blocking offer.
pub(crate) enum Offer<T> {
    Accepted,
    Full(T),
    Declined(T),
}

enum Sender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        match self {
            Sender::Bounded(tx) => Sender::Bounded(tx.clone()),
            Sender::Unbounded(tx) => Sender::Unbounded(tx.clone()),
        }
    }
}

pub(crate) enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Receiver<T> {
    pub(crate) async fn recv(&mut self) -> Option<T> {
        match self {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

type FaultSlot = Arc<Mutex<Option<Error>>>;

/// Record `error` unless a fault is already recorded.
fn record_fault(slot: &FaultSlot, error: Error) {
    let mut fault = slot.lock();
    if fault.is_none() {
        *fault = Some(error);
    }
}

/// The input side of a stage.
///
/// Dropping the sender is how a stage stops accepting input: queued items
/// still drain, then the worker sees the end of its queue. The inlet owns
/// the only sender, so dropping every handle on it closes the queue too.
pub struct Inlet<T> {
    name: String,
    capacity: Option<usize>,
    sender: Mutex<Option<Sender<T>>>,
    fault: FaultSlot,
}

impl<T: Send + 'static> Inlet<T> {
    pub(crate) fn new(
        name: String,
        capacity: Option<usize>,
    ) -> (Arc<Self>, WorkerInlet<T>, Receiver<T>) {
        let (sender, receiver) = match capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Sender::Bounded(tx), Receiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Sender::Unbounded(tx), Receiver::Unbounded(rx))
            }
        };
        let fault = FaultSlot::default();
        let inlet = Arc::new(Self {
            name: name.clone(),
            capacity,
            sender: Mutex::new(Some(sender)),
            fault: fault.clone(),
        });
        let worker = WorkerInlet {
            name,
            fault,
            inlet: Arc::downgrade(&inlet),
        };
        (inlet, worker, receiver)
    }

    /// Name of the owning stage
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether new items are still accepted
    pub fn is_accepting(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub(crate) fn offer(&self, item: T) -> Offer<T> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Offer::Declined(item);
        };
        match sender {
            Sender::Bounded(tx) => match tx.try_send(item) {
                Ok(()) => Offer::Accepted,
                Err(mpsc::error::TrySendError::Full(item)) => Offer::Full(item),
                Err(mpsc::error::TrySendError::Closed(item)) => Offer::Declined(item),
            },
            Sender::Unbounded(tx) => match tx.send(item) {
                Ok(()) => Offer::Accepted,
                Err(mpsc::error::SendError(item)) => Offer::Declined(item),
            },
        }
    }

    /// Queue an item without waiting.
    pub fn post(&self, item: T) -> Result<()> {
        match self.offer(item) {
            Offer::Accepted => Ok(()),
            Offer::Full(_) => Err(Error::QueueFull {
                stage: self.name.clone(),
                capacity: self.capacity.unwrap_or_default(),
            }),
            Offer::Declined(_) => Err(self.declined()),
        }
    }

    /// Queue an item, waiting for room in a bounded queue.
    ///
    /// Fails with `Declined` if the stage stopped accepting input while
    /// waiting.
    pub async fn send(&self, item: T) -> Result<()> {
        let sender = self.sender.lock().clone();
        let Some(Sender::Bounded(tx)) = sender else {
            return self.post(item);
        };
        let permit = tx.reserve().await.map_err(|_| self.declined())?;
        let accepting = self.sender.lock();
        if accepting.is_none() {
            return Err(self.declined());
        }
        permit.send(item);
        Ok(())
    }

    /// Stop accepting input; queued items still drain.
    pub fn complete(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!(stage = %self.name, "stage stopped accepting input");
        }
    }

    /// Record a fault and stop accepting input.
    ///
    /// The first recorded fault wins.
    pub fn fault(&self, error: Error) {
        record_fault(&self.fault, error);
        self.sender.lock().take();
    }

    fn declined(&self) -> Error {
        Error::Declined {
            stage: self.name.clone(),
        }
    }
}

/// The worker's view of its stage inlet.
///
/// Holds the inlet weakly so the worker never keeps its own queue open.
pub(crate) struct WorkerInlet<T> {
    name: String,
    fault: FaultSlot,
    inlet: Weak<Inlet<T>>,
}

impl<T: Send + 'static> WorkerInlet<T> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn check_fault(&self) -> Result<()> {
        match self.fault.lock().as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Close the inlet with the worker's outcome.
    pub(crate) fn settle(&self, outcome: &Result<()>) {
        let inlet = self.inlet.upgrade();
        match outcome {
            Ok(()) => {
                if let Some(inlet) = inlet {
                    inlet.complete();
                }
                tracing::debug!(stage = %self.name, "stage completed");
            }
            Err(error) => {
                record_fault(&self.fault, error.clone());
                if let Some(inlet) = inlet {
                    inlet.fault(error.clone());
                }
                tracing::warn!(stage = %self.name, %error, "stage faulted");
            }
        }
    }
}

struct Link<T> {
    target: Arc<Inlet<T>>,
    propagate: bool,
}

impl<T: Send + 'static> Link<T> {
    fn signal(&self, outcome: &Result<()>) {
        if !self.propagate {
            return;
        }
        match outcome {
            Ok(()) => self.target.complete(),
            Err(error) => self.target.fault(error.clone()),
        }
    }
}

struct LinkTable<T> {
    links: Vec<Link<T>>,
    finished: Option<Result<()>>,
}

/// Downstream targets of a stage, in link order.
pub(crate) struct Links<T> {
    table: Mutex<LinkTable<T>>,
    linked: Notify,
}

impl<T: Send + 'static> Links<T> {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(LinkTable {
                links: Vec::new(),
                finished: None,
            }),
            linked: Notify::new(),
        }
    }

    /// Add a target. A stage that already finished signals it right away.
    pub(crate) fn add(&self, target: Arc<Inlet<T>>, propagate: bool) {
        let link = Link { target, propagate };
        let mut table = self.table.lock();
        if let Some(outcome) = &table.finished {
            link.signal(outcome);
        }
        table.links.push(link);
        drop(table);
        self.linked.notify_waiters();
    }

    /// Hand one output to the first target that accepts it.
    ///
    /// Outputs are held until at least one link exists. When every target
    /// is full, waits on the first one with room to come.
    pub(crate) async fn deliver(&self, mut item: T, stage: &str) {
        loop {
            let notified = self.linked.notified();
            let targets: Vec<Arc<Inlet<T>>> = self
                .table
                .lock()
                .links
                .iter()
                .map(|link| link.target.clone())
                .collect();

            if targets.is_empty() {
                tracing::trace!(stage, "holding output until a link is made");
                notified.await;
                continue;
            }

            let mut first_full = None;
            for target in &targets {
                match target.offer(item) {
                    Offer::Accepted => return,
                    Offer::Full(back) => {
                        item = back;
                        first_full.get_or_insert_with(|| target.clone());
                    }
                    Offer::Declined(back) => item = back,
                }
            }

            match first_full {
                Some(target) => {
                    if let Err(e) = target.send(item).await {
                        tracing::warn!(stage, error = %e, "linked target closed while waiting; item dropped");
                    }
                }
                None => {
                    tracing::warn!(stage, "every linked target declined the item; item dropped");
                }
            }
            return;
        }
    }

    /// Signal every propagating link with the stage outcome.
    pub(crate) fn finish(&self, outcome: &Result<()>) {
        let mut table = self.table.lock();
        for link in &table.links {
            link.signal(outcome);
        }
        table.finished = Some(outcome.clone());
    }
}
