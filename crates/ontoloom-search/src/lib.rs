//! # ontoloom-search
//!
//! Vector candidate matching for ontoloom.
//!
//! This crate provides:
//! - Named query parameters compiled to positional binds
//! - Per-source left/right vector subqueries
//! - The ranking query (cross join, minimum cosine distance per code, cutoff, top-K)
//! - The matching engine that persists ranked matches per left item
//!
//! ## Example
//!
//! ```ignore
//! use ontoloom_search::{MatchingEngine, CancellationFlag};
//!
//! let engine = MatchingEngine::new(Arc::new(db.matches.clone()));
//! let report = engine.run(&spec, &CancellationFlag::new()).await?;
//! ```

pub mod engine;
pub mod params;
pub mod ranking;
pub mod subqueries;

// Re-export core types
pub use ontoloom_core::*;

pub use engine::{MatchReport, MatchingConfig, MatchingEngine};
pub use params::{compile, NamedParams};
pub use ranking::{check_ranked, ranking_sql, unmatched_sql, RankingQuery};
pub use subqueries::{Subquery, SubquerySet, ROW_PARAM};
