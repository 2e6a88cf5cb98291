//! Core traits and types for the taskweld library.
//!
//! This module contains the fundamental traits and error types shared by
//! the sequence, pipeline and parallel components.

pub mod error;
pub mod traits;

// Re-export core items
pub use error::{Error, IntoError, Result};
pub use traits::{Processor, Sink, Source, SourceExt};
