//! `ptledger-audit`: Session-ledger reconciliation and anomaly classification.
//!
//! Pure engine crate: receives pre-loaded ledger rows and reference data,
//! returns ordered, classified cases. The `ingest` module carries the CSV
//! adapters for the canonical input layouts; file IO stays with callers.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod invariant;
pub mod model;
pub mod period;
pub mod resolve;
pub mod secondary;
pub mod series;

pub use config::AuditConfig;
pub use engine::{run, AuditEngine};
pub use error::AuditError;
pub use model::{AuditCase, AuditInput, AuditResult, Category, Flag, RawLedgerRow, ReferenceData};
pub use period::Period;
