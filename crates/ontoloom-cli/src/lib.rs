//! # ontoloom-cli
//!
//! Command-line runner for ontoloom.
//!
//! This crate provides:
//! - YAML populator, expansion, code summary, matcher and relation-set loading
//! - Tracing subscriber setup (text or JSON, console or rolling file)
//! - Commands for full population runs, test runs over literal terms,
//!   expansion and code summary runs, matching runs, migrations and prompt
//!   inspection
//!
//! ## Example
//!
//! ```ignore
//! ontoloom show-prompt --relation-set relation_sets/causes.yaml
//! ontoloom test-terms --relation-set relation_sets/causes.yaml --terms "fever
//! cough"
//! ontoloom populate --config populators/causes_v1.yaml
//! ontoloom expand --config expansions/causes_v1_simple.yaml
//! ontoloom match --config matchers/causes_to_conditions.yaml
//! ```

pub mod commands;
pub mod config;
pub mod logging;

pub use config::{
    CodeSummaryConfig, DatabaseSettings, ExpansionConfig, MatcherConfig, PopulatorConfig,
    RelationSetConfig,
};
pub use logging::LogSettings;
