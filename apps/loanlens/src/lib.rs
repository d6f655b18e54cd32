//! # LoanLens Library
//!
//! This library exposes the LoanLens app modules for testing and integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod api;
pub mod cli;
pub mod config;

// Re-export loanlens_core for convenience
pub use loanlens_core;
