//! Configuration and shared types
//!
//! Error taxonomy, closed enums, and runtime settings.

pub mod settings;
pub mod types;
