//! # px-aegis
//!
//! **Secrets detection and encrypted custody for praxis agents.**
//!
//! `px-aegis` keeps sensitive material out of an agent's reasoning surfaces
//! while preserving its ability to *use* that material deliberately. Inbound
//! text is scanned against a pattern library; every match is encrypted with
//! AES-256-GCM under a per-secret derived key and replaced in-line with an
//! opaque reference token of the form `{SECRET:<uuid>:<description>}`.
//! Outbound action parameters are walked recursively and references are
//! substituted back **only** when the secret's sensitivity admits the action
//! being taken.
//!
//! ## Pipeline position
//!
//! ```text
//! inbound text ──► SecretsFilter ──► reference tokens ──► agent reasoning
//!                        │
//!                        ▼
//!                  SecretsStore (AES-256-GCM, access log, rate limits)
//!                        ▲
//!                        │
//! outbound params ──► decapsulate ──► plaintext only for permitted actions
//! ```
//!
//! ## Modules
//!
//! - [`patterns`] – builtin and custom detection patterns with sensitivity levels
//! - [`filter`] – regex-driven detection and in-line reference substitution
//! - [`encryption`] – AES-256-GCM with PBKDF2-derived per-secret keys
//! - [`store`] – encrypted SQLite store, access audit log, rate limiting
//! - [`decapsulate`] – recursive reference substitution on action parameters
//! - [`service`] – the facade the engine talks to
//!
//! Plaintext never leaves this crate except through an explicit, logged
//! decapsulation or recall.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod decapsulate;
pub mod encryption;
pub mod filter;
pub mod patterns;
pub mod service;
pub mod store;

pub use decapsulate::{DecapsulationReport, auto_decapsulate_actions, decapsulate_value};
pub use encryption::{CryptoError, EncryptedPayload, MASTER_KEY_LEN, SecretCipher};
pub use filter::{DetectedSecret, FilterConfig, FilterStats, SecretsFilter, UpdateFilterOp};
pub use patterns::{CustomPattern, Sensitivity, builtin_patterns};
pub use service::{SecretRecallResult, SecretsService, ServiceError};
pub use store::{SecretAccessKind, SecretRecord, SecretReference, SecretsStore, StoreError};
