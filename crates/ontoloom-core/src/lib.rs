//! # ontoloom-core
//!
//! Core types, traits, and abstractions for the ontoloom library.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other ontoloom crates depend on:
//!
//! - relation and relation-set specifications
//! - response shapes and their parsers
//! - gateway, repository, and status traits
//! - cancellation and progress reporting shared by long-running tasks

pub mod cancel;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod progress;
pub mod shape;
pub mod traits;

// Re-export commonly used types at crate root
pub use cancel::CancellationFlag;
pub use error::{Error, Result};
pub use models::*;
pub use progress::{eta_rounded, ListProgressReporter};
pub use shape::{ResponseMap, ResponseShape, ShapeField};
pub use traits::*;
