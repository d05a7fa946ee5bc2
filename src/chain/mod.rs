/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chain: the block and transaction pipeline over the state store, the fork database, and the block
//! log.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the chain](ChainSpec) with:
//!   1. `ChainSpec::builder` to construct a `ChainSpecBuilder`,
//!   2. The setters of the `ChainSpecBuilder`, and
//!   3. The `ChainSpecBuilder::build` method to construct a [ChainSpec],
//! - The function to [open](ChainSpec::open) a [Chain] given its specification,
//! - [The type](Chain) that owns the chain's state and applies blocks and transactions to it,
//! - [A handle](SharedChain) to share one chain between threads.
//!
//! ## Opening a chain
//!
//! ```ignore
//! let chain =
//!     ChainSpec::builder()
//!     .kv_store(kv_store)
//!     .data_dir(data_dir)
//!     .configuration(configuration)
//!     .genesis(genesis)
//!     .evaluators(evaluators)
//!     .on_irreversible_block(irreversible_block_handler)
//!     .build()
//!     .open()?;
//! ```
//!
//! ### Required setters
//!
//! - `.kv_store(...)`: where the state store is flushed to.
//! - `.data_dir(...)`: the directory of the block log.
//! - `.configuration(...)`
//! - `.genesis(...)`
//! - `.evaluators(...)`: the business rules of every operation the chain accepts.
//!
//! ### Optional setters
//!
//! - `.custom_interpreters(...)`
//! - `.validate_invariants(...)`
//! - one `.on_*(...)` setter per [event](crate::events).
//!
//! An empty key-value store is initialized from the genesis. Otherwise, the state is reloaded, every
//! reversible change is undone, and blocks the block log holds beyond the state's head are replayed.
//!
//! ## Sessions
//!
//! Every block is applied inside its own undo session, which stays open until the block becomes
//! irreversible, so that the block can be popped when switching forks. Pending transactions share one
//! further session on top, which is undone and rebuilt whenever the head changes.

mod apply;
mod bookkeeping;
pub mod errors;
pub mod genesis;
mod invariants;
mod push;
mod queries;
pub mod skip_flags;

pub use errors::{ChainError, ErrorClass};
pub use genesis::Genesis;
pub use skip_flags::SkipFlags;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use typed_builder::TypedBuilder;

use crate::block_log::BlockLog;
use crate::config::{Configuration, ConfigurationError};
use crate::evaluator::{CustomInterpreterRegistry, EvaluatorRegistry};
use crate::event_bus::*;
use crate::events::*;
use crate::fork_db::ForkDatabase;
use crate::hardfork::{self, HardforkVersions};
use crate::objects;
use crate::state::{KVStore, StateStore};
use crate::types::basic::{BlockNumber, TransactionId};
use crate::types::transaction::SignedTransaction;

/// Stores everything needed to open a [Chain].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainSpec]. On the builder call the following methods to construct a valid [ChainSpec].

    Required:
    - `.kv_store(...)`
    - `.data_dir(...)`
    - `.configuration(...)`
    - `.genesis(...)`
    - `.evaluators(...)`

    Optional:
    - `.custom_interpreters(...)`
    - `.validate_invariants(...)`
    - `.on_pre_apply_operation(...)`
    - `.on_post_apply_operation(...)`
    - `.on_applied_block(...)`
    - `.on_pending_transaction(...)`
    - `.on_pre_apply_transaction(...)`
    - `.on_applied_transaction(...)`
    - `.on_irreversible_block(...)`
    - `.on_switch_fork(...)`
    - `.on_reindex_start(...)`
    - `.on_reindex_done(...)`
"))]
pub struct ChainSpec<K: KVStore> {
    // Required parameters
    #[builder(setter(doc = "Set the key-value store the state store is flushed to. The argument must implement the [KVStore](crate::state::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(into, doc = "Set the directory holding the block log. Required."))]
    data_dir: PathBuf,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the chain. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the [genesis](Genesis) the chain starts from when the key-value store is empty. Required."))]
    genesis: Genesis,
    #[builder(setter(doc = "Set the [evaluators](EvaluatorRegistry) that apply the chain's operations. Required."))]
    evaluators: EvaluatorRegistry,
    // Optional parameters
    #[builder(default, setter(doc = "Set the interpreters of custom operations, by application id. Optional."))]
    custom_interpreters: CustomInterpreterRegistry,
    #[builder(default = false, setter(doc = "Check the supply invariants once the chain is open? Optional."))]
    validate_invariants: bool,
    #[builder(default, setter(transform = |handler: impl Fn(&PreApplyOperationEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PreApplyOperationEvent>),
    doc = "Register a handler closure to be invoked right before an operation, real or virtual, is applied. Optional."))]
    on_pre_apply_operation: Option<HandlerPtr<PreApplyOperationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PostApplyOperationEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PostApplyOperationEvent>),
    doc = "Register a handler closure to be invoked after an operation, real or virtual, is applied. Optional."))]
    on_post_apply_operation: Option<HandlerPtr<PostApplyOperationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AppliedBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<AppliedBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is applied. Optional."))]
    on_applied_block: Option<HandlerPtr<AppliedBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PendingTransactionEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PendingTransactionEvent>),
    doc = "Register a handler closure to be invoked after a transaction is accepted into the pending pool. Optional."))]
    on_pending_transaction: Option<HandlerPtr<PendingTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PreApplyTransactionEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PreApplyTransactionEvent>),
    doc = "Register a handler closure to be invoked right before the operations of a transaction are applied. Optional."))]
    on_pre_apply_transaction: Option<HandlerPtr<PreApplyTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AppliedTransactionEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<AppliedTransactionEvent>),
    doc = "Register a handler closure to be invoked after a transaction is applied. Optional."))]
    on_applied_transaction: Option<HandlerPtr<AppliedTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&IrreversibleBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<IrreversibleBlockEvent>),
    doc = "Register a handler closure to be invoked after a block becomes irreversible and is written to the block log. Optional."))]
    on_irreversible_block: Option<HandlerPtr<IrreversibleBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SwitchForkEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<SwitchForkEvent>),
    doc = "Register a handler closure to be invoked after the chain switches to a longer fork. Optional."))]
    on_switch_fork: Option<HandlerPtr<SwitchForkEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReindexStartEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ReindexStartEvent>),
    doc = "Register a handler closure to be invoked when a reindex starts. Optional."))]
    on_reindex_start: Option<HandlerPtr<ReindexStartEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReindexDoneEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ReindexDoneEvent>),
    doc = "Register a handler closure to be invoked when a reindex ends, successfully or not. Optional."))]
    on_reindex_done: Option<HandlerPtr<ReindexDoneEvent>>,
}

impl<K: KVStore> ChainSpec<K> {
    /// Open the block log and the state, initializing the state from the genesis if the key-value store is
    /// empty.
    pub fn open(self) -> Result<Chain<K>, ChainError> {
        self.configuration.validate()?;
        let genesis_witnesses = self.genesis.witnesses().len();
        if genesis_witnesses > self.configuration.max_witnesses as usize {
            return Err(ConfigurationError::TooManyGenesisWitnesses {
                count: genesis_witnesses,
                max: self.configuration.max_witnesses,
            }
            .into());
        }

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_pre_apply_operation,
            self.on_post_apply_operation,
            self.on_applied_block,
            self.on_pending_transaction,
            self.on_pre_apply_transaction,
            self.on_applied_transaction,
            self.on_irreversible_block,
            self.on_switch_fork,
            self.on_reindex_start,
            self.on_reindex_done,
        );

        let hardforks = HardforkVersions::new(&self.configuration, self.genesis.genesis_time);
        let mut store = StateStore::new(self.configuration.storage.clone());
        objects::register_all(&mut store)?;
        let block_log = BlockLog::open(&self.data_dir)?;

        let mut chain = Chain {
            kv_store: self.kv_store,
            store,
            block_log,
            fork_db: ForkDatabase::new(),
            config: self.configuration,
            genesis: self.genesis,
            hardforks,
            evaluators: self.evaluators,
            custom_interpreters: self.custom_interpreters,
            event_handlers,
            skip_flags: SkipFlags::empty(),
            pending_transactions: Vec::new(),
            popped_transactions: Vec::new(),
            pending_session: None,
            is_producing: false,
            current_trx_id: None,
            current_block_num: BlockNumber::new(0),
            current_op_in_trx: 0,
            blocks_since_flush: 0,
            data_dir: self.data_dir,
        };
        chain.open_state()?;
        if self.validate_invariants {
            chain.validate_invariants()?;
        }
        Ok(chain)
    }
}

/// The state of one chain and the pipeline that advances it.
pub struct Chain<K: KVStore> {
    kv_store: K,
    store: StateStore,
    block_log: BlockLog,
    fork_db: ForkDatabase,
    config: Configuration,
    genesis: Genesis,
    hardforks: HardforkVersions,
    evaluators: EvaluatorRegistry,
    custom_interpreters: CustomInterpreterRegistry,
    event_handlers: EventHandlers,

    /// The checks skipped by the pipeline call in progress.
    skip_flags: SkipFlags,
    pending_transactions: Vec<SignedTransaction>,
    /// Transactions of popped blocks, to be re-applied after the next block is pushed.
    popped_transactions: Vec<SignedTransaction>,
    /// The revision of the session holding the pending transactions' changes.
    pending_session: Option<i64>,
    is_producing: bool,

    // Where the operation being applied comes from, for operation events.
    current_trx_id: Option<TransactionId>,
    current_block_num: BlockNumber,
    current_op_in_trx: u16,

    blocks_since_flush: u32,
    data_dir: PathBuf,
}

impl<K: KVStore> Chain<K> {
    fn open_state(&mut self) -> Result<(), ChainError> {
        if self.store.load(&self.kv_store)? {
            self.store.undo_all()?;
        } else {
            log::info!("Initializing state from genesis");
            self.init_genesis()?;
        }

        let head = self.head_block_num()?;
        if self.store.revision() != head.int() as i64 {
            return Err(ChainError::RevisionMismatch {
                revision: self.store.revision(),
                head,
            });
        }

        let log_head = self.block_log.head_num();
        if head > log_head {
            return Err(ChainError::StateMismatch {
                state_head: head,
                log_head,
            });
        }
        if head.int() > 0 {
            let head_id = self.head_block_id()?;
            match self.block_log.read_block_by_num(head)? {
                Some(block) if block.id() == head_id => {}
                _ => {
                    return Err(ChainError::StateMismatch {
                        state_head: head,
                        log_head,
                    })
                }
            }
        }
        if log_head > head {
            log::info!("Replaying blocks {} to {} from the block log", head + 1, log_head);
            self.replay_blocks(head + 1, log_head)?;
        }

        self.reset_fork_db()?;
        hardfork::check_hardfork_state(&self.store, &self.hardforks, self.config.blockchain_version)?;
        log::info!(
            "Opened chain at block {} in {}",
            self.head_block_num()?,
            self.data_dir.display()
        );
        Ok(())
    }

    /// Write the genesis records, force the known hardforks through on a private network, and persist the
    /// result.
    fn init_genesis(&mut self) -> Result<(), ChainError> {
        genesis::init_genesis(
            &mut self.store,
            &self.genesis,
            &self.hardforks,
            self.config.blockchain_version,
        )?;
        if self.genesis.private_net {
            let num_hardforks = self.hardforks.num_hardforks();
            self.set_hardfork(num_hardforks, true)?;
        }
        self.store.flush(&mut self.kv_store)?;
        Ok(())
    }

    /// Start the fork database over from the head block.
    fn reset_fork_db(&mut self) -> Result<(), ChainError> {
        self.fork_db.reset();
        let head = self.head_block_num()?;
        if let Some(block) = self.block_log.read_block_by_num(head)? {
            self.fork_db.start_block(block);
        }
        Ok(())
    }

    /// Apply blocks `from..=to` from the block log with most checks skipped and without undo sessions.
    fn replay_blocks(&mut self, from: BlockNumber, to: BlockNumber) -> Result<(), ChainError> {
        self.block_log.set_locking(false)?;
        let result = self.replay_blocks_unlocked(from, to);
        let relocked = self.block_log.set_locking(true);
        result?;
        relocked?;
        Ok(())
    }

    fn replay_blocks_unlocked(&mut self, from: BlockNumber, to: BlockNumber) -> Result<(), ChainError> {
        let mut num = from;
        while num <= to {
            let block = self
                .block_log
                .read_block_by_num(num)?
                .ok_or(ChainError::MissingIrreversibleBlock(num))?;
            self.apply_block(&block, SkipFlags::REPLAY)?;
            if num.int() % 10000 == 0 {
                log::info!("Replayed block {} of {}", num, to);
            }
            num += 1;
        }
        let head = self.head_block_num()?;
        self.store.set_revision(head.int() as i64)?;
        Ok(())
    }

    /// Rebuild the state from the genesis by replaying the block log up to `stop_at`, or to its head if
    /// `stop_at` is `None` or beyond it. Returns the number of the last block replayed.
    ///
    /// Stopping early leaves the block log ahead of the state. The blocks beyond the stop are replayed
    /// again the next time the chain is opened.
    pub fn reindex(&mut self, stop_at: Option<BlockNumber>) -> Result<BlockNumber, ChainError> {
        let log_head = self.block_log.head_num();
        let target = stop_at.map_or(log_head, |stop_at| stop_at.min(log_head));

        self.event_handlers
            .fire_handlers(Event::ReindexStart(ReindexStartEvent {
                timestamp: SystemTime::now(),
                target_block_number: target,
            }));
        log::info!("Reindexing blocks 1 to {}", target);

        let result = self.reindex_to(target);
        let last_block_number = self.head_block_num().unwrap_or(BlockNumber::new(0));

        self.event_handlers
            .fire_handlers(Event::ReindexDone(ReindexDoneEvent {
                timestamp: SystemTime::now(),
                success: result.is_ok(),
                last_block_number,
            }));
        result.map(|_| last_block_number)
    }

    fn reindex_to(&mut self, target: BlockNumber) -> Result<(), ChainError> {
        self.clear_pending()?;
        self.popped_transactions.clear();
        self.store.wipe();
        self.kv_store.clear();
        self.fork_db.reset();

        self.init_genesis()?;
        self.replay_blocks(BlockNumber::new(1), target)?;
        self.reset_fork_db()?;
        self.store.flush(&mut self.kv_store)?;
        Ok(())
    }

    /// Write the state store to the key-value store and the block log to disk.
    pub fn flush(&mut self) -> Result<(), ChainError> {
        self.store.flush(&mut self.kv_store)?;
        self.block_log.flush()?;
        self.blocks_since_flush = 0;
        Ok(())
    }

    /// Drop the pending transactions and flush. Reversible blocks are undone the next time the chain is
    /// opened, and must be pushed again.
    pub fn close(mut self) -> Result<(), ChainError> {
        self.clear_pending()?;
        self.flush()
    }

    /// Run `f` with `skip` as the skip flags, restoring the previous flags afterwards.
    fn with_skip_flags<T>(
        &mut self,
        skip: SkipFlags,
        f: impl FnOnce(&mut Self) -> Result<T, ChainError>,
    ) -> Result<T, ChainError> {
        let previous = std::mem::replace(&mut self.skip_flags, skip);
        let result = f(self);
        self.skip_flags = previous;
        result
    }

    /// Run `f` in a new undo session that stays open if `f` succeeds, and is undone if it fails.
    fn with_undo_session<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ChainError>,
    ) -> Result<T, ChainError> {
        let revision = self.store.begin_session();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.store.undo_session(revision)?;
                Err(err)
            }
        }
    }

    /// Run `f` in a new undo session that is squashed into its parent if `f` succeeds, and undone if it
    /// fails.
    fn with_temp_session<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ChainError>,
    ) -> Result<T, ChainError> {
        let revision = self.store.begin_session();
        match f(self) {
            Ok(value) => {
                self.store.squash_session(revision)?;
                Ok(value)
            }
            Err(err) => {
                self.store.undo_session(revision)?;
                Err(err)
            }
        }
    }
}

/// A [Chain] shared between threads. Readers see the chain between pipeline calls, never in the middle of
/// one.
pub struct SharedChain<K: KVStore>(Arc<RwLock<Chain<K>>>);

impl<K: KVStore> Clone for SharedChain<K> {
    fn clone(&self) -> Self {
        SharedChain(Arc::clone(&self.0))
    }
}

impl<K: KVStore> SharedChain<K> {
    pub fn new(chain: Chain<K>) -> SharedChain<K> {
        SharedChain(Arc::new(RwLock::new(chain)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Chain<K>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Chain<K>> {
        self.0.write()
    }

    pub fn push_block(
        &self,
        block: crate::types::block::SignedBlock,
        skip: SkipFlags,
    ) -> Result<bool, ChainError> {
        self.0.write().push_block(block, skip)
    }

    pub fn push_transaction(
        &self,
        trx: SignedTransaction,
        skip: SkipFlags,
    ) -> Result<(), ChainError> {
        self.0.write().push_transaction(trx, skip)
    }
}
