//! Graph memory and its consolidation tiers.
//!
//! - [`graph`] – node/edge model, recall queries
//! - [`store`] – the SQLite-backed store with the three memory verbs
//! - [`consolidation`] – tiered time-series roll-ups with orphan
//!   diagnostics

pub mod consolidation;
pub mod graph;
pub mod store;

pub use consolidation::{
    CleanupReport, ConsolidationLevel, ConsolidationOutcome, ConsolidationSchedule, Consolidator,
    Orphan, OrphanReport, SUMMARY_NODE_TYPE, TIMESERIES_TYPES,
};
pub use graph::{GraphEdge, GraphNode, GraphNodeSpec, RecallQuery, SUMMARIZES};
pub use store::{GraphStore, MemoryError};
