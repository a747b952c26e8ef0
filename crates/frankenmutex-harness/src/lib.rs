//! Conformance tooling for FrankenMutex.
//!
//! - Contract matrix: replay the clean-room transition model against the real
//!   mutex and report divergences.
//! - Fairness probe: measure how evenly contending threads acquire a mutex.
//! - Structured JSONL logs and SHA-256 artifact indexes for both.

#![forbid(unsafe_code)]

pub mod contract_matrix;
pub mod error;
pub mod fairness_probe;
pub mod structured_log;

pub use contract_matrix::{ContractMatrixReport, MatrixTiming, build_contract_matrix};
pub use error::HarnessError;
pub use fairness_probe::{FairnessConfig, FairnessReport, run_fairness_probe};
