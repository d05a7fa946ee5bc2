/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state-machine core of a delegated-proof-of-stake blockchain node.
//!
//! A fixed-size round of witnesses, elected by stake-weighted votes, take turns producing blocks in
//! time slots. This crate turns those blocks, and the transactions in them, into ledger state:
//! - The [state store](state) holds the ledger's [records](objects) and can undo any suffix of recent
//!   changes.
//! - The [fork database](fork_db) keeps the reversible blocks of every known fork, and the
//!   [block log](block_log) the irreversible blocks of the main chain.
//! - The [chain](chain) validates and applies blocks and transactions, switches forks, assembles blocks,
//!   and moves the [irreversibility](witness_schedule) watermark.
//! - [Hardforks](hardfork) upgrade the protocol at block boundaries once the witnesses have voted for them.
//! - What each operation does is up to the [evaluators](evaluator) the chain is opened with.
//!
//! Networking, peer-to-peer sync, and block production timing are left to the embedding node.

pub mod block_log;

pub mod chain;

pub mod config;

pub mod evaluator;

pub mod events;

pub(crate) mod event_bus;

pub mod fork_db;

pub mod hardfork;

pub mod logging;

pub mod objects;

pub mod state;

pub mod types;

pub mod witness_schedule;
