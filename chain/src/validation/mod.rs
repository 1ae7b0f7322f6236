//! Block validity predicates.
//!
//! Validators plug into the processor via
//! [`crate::consensus::validator::BlockValidator`] and run after the
//! proof engine accepted a block. [`base::BaseValidity`] enforces the
//! block limits and the per-transaction structural rules.

pub mod base;

pub use base::BaseValidity;
