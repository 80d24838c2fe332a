//! # Praxis: Governance Core for Autonomous Agents
//!
//! Praxis turns an inbound stimulus — a message, a timer, a resumed task —
//! into a safe, auditable, bounded action. Every stimulus becomes a durable
//! *task*; every task seeds *thoughts*; every thought runs through a fixed
//! pipeline of concurrent decision evaluations, a second-stage action
//! selection, irreversible epistemic guardrails, and handler dispatch, with
//! each transition recorded on a hash-linked, signed audit chain.
//!
//! ## Core Concepts
//!
//! - **Tasks & Thoughts**: Durable units of work with strict status machines
//! - **DMAs**: Three concurrent first-stage evaluators (ethical,
//!   common-sense, domain-specific)
//! - **Action Selection**: A second-stage decision producing one typed
//!   handler action
//! - **Guardrails**: Epistemic checks (entropy, coherence, optimization
//!   veto, humility) that convert unsafe actions into deferrals
//! - **Audit Chain**: Append-only, hash-chained, Ed25519-signed log
//! - **Graph Memory**: Scoped nodes/edges with tiered time-series
//!   consolidation
//! - **Adaptation**: Self-configuration bounded by variance from an
//!   identity baseline
//!
//! ## Pipeline
//!
//! ```text
//! Transport ─► Task ─► seed Thought ─► Scheduler round
//!                                         │
//!                              secrets filter (px-aegis)
//!                                         │
//!                          ┌── ethical ──┼── common-sense ──┐
//!                          │         domain-specific        │
//!                          └───────────┬────────────────────┘
//!                                      ▼
//!                              Action Selector
//!                                      ▼
//!                              Guardrail Stack ──fail──► Defer
//!                                      ▼
//!                             Handler Dispatch
//!                                      ▼
//!                          Audit Chain (hash + sign)
//! ```
//!
//! The reasoning pipeline is single-threaded cooperative per agent: at most
//! one thought is in flight, while the DMA triple and guardrail faculties
//! within that thought are dispatched concurrently. Consolidation and
//! adaptation run as independent timed tasks.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod action;
pub mod adaptation;
pub mod audit;
pub mod auth;
pub mod config;
pub mod dma;
pub mod guardrails;
pub mod handlers;
pub mod llm;
pub mod memory;
pub mod message;
pub mod runtime;
pub mod selector;
pub mod signals;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod types;
