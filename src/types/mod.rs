//! Types and traits that are used across multiple components of the chain.
//!
//! Ledger records stored in the [state store](crate::state) are defined in [`crate::objects`] instead.

pub mod basic;

pub mod crypto_primitives;

pub mod authority;

pub mod operation;

pub mod transaction;

pub mod block;

pub mod witness_properties;
