/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events the chain emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed, except for the "pre" events,
//! which are emitted right before the action. Handlers are invoked synchronously, in-line with the
//! pipeline, so a slow handler slows down the chain.
//!
//! Register handlers with the `on_*` setters of [`ChainSpec`](crate::chain::ChainSpec).

use std::sync::Arc;
use std::time::SystemTime;

use crate::types::basic::{AccountName, BlockId, BlockNumber, TransactionId};
use crate::types::block::SignedBlock;
use crate::types::operation::Operation;
use crate::types::transaction::SignedTransaction;

pub enum Event {
    PreApplyOperation(PreApplyOperationEvent),
    PostApplyOperation(PostApplyOperationEvent),
    AppliedBlock(AppliedBlockEvent),
    PendingTransaction(PendingTransactionEvent),
    PreApplyTransaction(PreApplyTransactionEvent),
    AppliedTransaction(AppliedTransactionEvent),
    IrreversibleBlock(IrreversibleBlockEvent),
    SwitchFork(SwitchForkEvent),
    ReindexStart(ReindexStartEvent),
    ReindexDone(ReindexDoneEvent),
}

/// Where an operation was applied: inside a transaction, or virtually by the chain itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub trx_id: Option<TransactionId>,
    pub block_num: BlockNumber,
    pub op_in_trx: u16,
    /// The account charged for the operation, its fee payer's sponsor if there is one. `None` for virtual
    /// operations.
    pub fee_payer: Option<AccountName>,
}

pub struct PreApplyOperationEvent {
    pub timestamp: SystemTime,
    pub context: OperationContext,
    pub operation: Operation,
}

pub struct PostApplyOperationEvent {
    pub timestamp: SystemTime,
    pub context: OperationContext,
    pub operation: Operation,
}

pub struct AppliedBlockEvent {
    pub timestamp: SystemTime,
    pub block_id: BlockId,
    pub block: Arc<SignedBlock>,
}

/// A transaction was accepted into the pending pool.
pub struct PendingTransactionEvent {
    pub timestamp: SystemTime,
    pub trx_id: TransactionId,
    pub transaction: SignedTransaction,
}

pub struct PreApplyTransactionEvent {
    pub timestamp: SystemTime,
    pub trx_id: TransactionId,
    pub transaction: SignedTransaction,
}

pub struct AppliedTransactionEvent {
    pub timestamp: SystemTime,
    pub trx_id: TransactionId,
    pub block_num: BlockNumber,
}

/// A block became irreversible and was appended to the block log.
pub struct IrreversibleBlockEvent {
    pub timestamp: SystemTime,
    pub block_id: BlockId,
    pub block_num: BlockNumber,
    pub witness: AccountName,
}

/// The chain switched to a longer fork.
pub struct SwitchForkEvent {
    pub timestamp: SystemTime,
    pub old_head: BlockId,
    pub new_head: BlockId,
    pub common_ancestor: BlockId,
}

pub struct ReindexStartEvent {
    pub timestamp: SystemTime,
    /// The last block that will be replayed.
    pub target_block_number: BlockNumber,
}

pub struct ReindexDoneEvent {
    pub timestamp: SystemTime,
    pub success: bool,
    pub last_block_number: BlockNumber,
}
