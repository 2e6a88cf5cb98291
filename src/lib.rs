//! # Async sequences, dataflow stages and structured parallel loops
//!
//! This crate provides three independent concurrency building blocks, all
//! sharing one error type and one cancellation signal
//! ([`tokio_util::sync::CancellationToken`]).
//!
//! ## Core Concepts
//!
//! - **Sequence**: a pull-based async [`Source`](core::Source); each pull resumes the
//!   producer, which may wait on a cancellable delay before yielding one item
//! - **Stage**: a dataflow block with an input queue; stages link together
//!   and propagate completion once drained
//! - **Parallel loop**: fan work out over a pool with best-effort stop,
//!   cooperative cancellation, per-worker accumulation, or tree fan-out
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use taskweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut evens = DelayedSequence::counting(5)
//!         .step(Duration::from_millis(1))
//!         .produce()
//!         .filter(|x| x % 2 == 0);
//!
//!     while let Some(n) = evens.next().await? {
//!         println!("{}", n);
//!     }
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod parallel;
pub mod pipeline;
pub mod processors;
pub mod report;
pub mod sinks;
pub mod sources;
pub mod util;

// Re-export commonly used items
pub mod prelude {
    pub use crate::core::{Error, Processor, Result, Sink, Source, SourceExt};
    pub use crate::parallel::{
        aggregate, for_each, for_each_async, traverse, try_for_each, LoopResult, LoopState,
        NodeId, ParallelOptions, Traversal, Tree,
    };
    pub use crate::pipeline::{ActionStage, LinkOptions, Stage, StageConfig, TransformStage};
    pub use crate::processors::{FilterProcessor, MapProcessor, TryMapProcessor};
    pub use crate::report::{MemoryReporter, NullReporter, Reporter, Stopwatch, TracingReporter};
    pub use crate::sinks::{CollectSink, FnSink, ReportSink};
    pub use crate::sources::{
        DelayedSequence, OnCancel, SequenceCursor, SequenceState, StreamSource, Tick,
    };
    pub use crate::util::{cancel_after, CancellableExt};
    pub use tokio_util::sync::CancellationToken;
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
