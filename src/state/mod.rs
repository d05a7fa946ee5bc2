/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The versioned state store: typed ledger records that every block and transaction reads and writes.
//!
//! ## Records, tables, and indexes
//!
//! Every kind of ledger record (accounts, witnesses, dynamic properties, ...) implements
//! [`Object`](table::Object) and lives in its own table inside the [`StateStore`](store::StateStore).
//! Tables are keyed by [`ObjectId`](table::ObjectId) and can maintain any number of ordered secondary
//! indexes, declared as [`IndexSpec`](table::IndexSpec) types.
//!
//! ## Undo sessions
//!
//! While at least one undo session is open, every create, modify, and remove is recorded in the
//! [undo log](undo). Sessions nest. The innermost session can be:
//! - **Undone**, reverting every change made since it was opened.
//! - **Squashed** into its parent, which then owns the changes.
//! - **Pushed**, leaving it on the stack so that it can be undone later, e.g., when its block is popped.
//!
//! Pushed sessions become permanent once [committed](store::StateStore::commit), which the chain does when
//! their blocks become irreversible.
//!
//! ## Persistence
//!
//! The store lives in memory. [`StateStore::flush`](store::StateStore::flush) writes it out to a
//! user-provided key-value store through the [pluggables], under the keys listed in [variables].

pub mod pluggables;

pub mod store;

pub mod table;

pub mod undo;

pub mod variables;

pub use pluggables::{KVGet, KVStore, WriteBatch};
pub use store::{StateStore, StoreError, UndoSession};
pub use table::{index, IndexSpec, Object, ObjectId, TableId};
