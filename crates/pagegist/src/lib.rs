//! Public facade crate for `pagegist`.
//!
//! This crate contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `pagegist-core`.

pub use pagegist_core::*;
