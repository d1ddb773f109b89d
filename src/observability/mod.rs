//! Observability
//!
//! Structured audit events and the kernel diagnostic sink. Purely
//! observational: nothing here participates in the functional
//! contract, and every sink failure is swallowed.

pub mod audit;
pub mod diag;
