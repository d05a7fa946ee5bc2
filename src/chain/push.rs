/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Entry points that change the head: pushing blocks and transactions, popping blocks, and producing
//! blocks.

use std::time::SystemTime;

use super::{Chain, ChainError, ErrorClass, SkipFlags};
use crate::events::*;
use crate::fork_db::ForkItem;
use crate::objects::witness::WitnessByOwner;
use crate::objects::{HardforkProperty, Witness};
use crate::state::KVStore;
use crate::types::basic::{AccountName, BlockId, BlockNumber, Timestamp};
use crate::types::block::{BlockHeaderExtension, SignedBlock};
use crate::types::crypto_primitives::Keypair;
use crate::types::transaction::SignedTransaction;
use crate::witness_schedule::{get_scheduled_witness, get_slot_at_time};

/// A block's header and transaction count overhead, reserved when sizing transactions into a block.
const BLOCK_OVERHEAD_BYTES: usize = 256;

impl<K: KVStore> Chain<K> {
    /// Push a block received from the network or produced locally. Returns whether the chain switched to
    /// another fork.
    ///
    /// The pending transactions are set aside while the block is applied, and re-applied on top of the new
    /// head afterwards, after the transactions of any popped blocks. Those that no longer apply are
    /// dropped.
    ///
    /// While the head is below the last checkpoint, the block is applied with the checkpoint skip flags
    /// instead of `skip`, straight on top of the head.
    pub fn push_block(&mut self, block: SignedBlock, skip: SkipFlags) -> Result<bool, ChainError> {
        let skip = if self.before_last_checkpoint()? {
            SkipFlags::CHECKPOINTED
        } else {
            skip
        };
        self.clear_pending_session()?;
        let pending = std::mem::take(&mut self.pending_transactions);

        let result = self.with_skip_flags(skip, |chain| chain.push_block_inner(block));
        let restored = self.restore_pending(pending);
        let switched = result?;
        restored?;
        Ok(switched)
    }

    fn push_block_inner(&mut self, block: SignedBlock) -> Result<bool, ChainError> {
        let skip = self.skip_flags;
        let block_id = block.id();

        if !skip.contains(SkipFlags::FORK_DB) {
            let new_head = self.fork_db.push_block(block.clone())?;
            self.maybe_warn_multiple_production(new_head.num);
            let head_id = self.head_block_id()?;
            if new_head.previous != head_id {
                if new_head.num > self.head_block_num()? {
                    log::info!(
                        "Switching to fork {} at block {}",
                        new_head.id,
                        new_head.num
                    );
                    self.switch_forks(new_head, head_id)?;
                    return Ok(true);
                }
                return Ok(false);
            }
        }

        let applied = self.with_undo_session(|chain| chain.apply_block(&block, skip));
        if let Err(err) = applied {
            log::warn!("Failed to push block {}: {}", block_id, err);
            self.fork_db.remove(&block_id);
            return Err(err);
        }
        if skip.contains(SkipFlags::FORK_DB) {
            // Keep the block where irreversibility bookkeeping finds it.
            self.fork_db.push_block(block)?;
        }
        self.finalize_block()?;
        Ok(false)
    }

    /// Whether the last checkpoint is above the head, so that the next block is covered by it.
    fn before_last_checkpoint(&self) -> Result<bool, ChainError> {
        match self.config.checkpoints.keys().next_back() {
            Some(last_checkpoint) => Ok(*last_checkpoint > self.head_block_num()?),
            None => Ok(false),
        }
    }

    /// Warn if the fork database holds more than one block at height `num`.
    fn maybe_warn_multiple_production(&self, num: BlockNumber) {
        let blocks = self.fork_db.fetch_block_by_number(num);
        if blocks.len() > 1 {
            let producers: Vec<String> = blocks
                .iter()
                .map(|item| format!("{} at {}", item.block.witness(), item.block.timestamp()))
                .collect();
            log::warn!(
                "Detected {} blocks at height {}: {}",
                blocks.len(),
                num,
                producers.join(", ")
            );
        }
    }

    /// Pop the head back to the common ancestor of the current head and `new_head`, then apply the
    /// blocks of `new_head`'s branch. If one of them fails, it and its descendants are removed from the
    /// fork database and the original branch is restored.
    fn switch_forks(&mut self, new_head: ForkItem, old_head_id: BlockId) -> Result<(), ChainError> {
        let skip = self.skip_flags;
        let (new_branch, old_branch) = self
            .fork_db
            .fetch_branch_from(&new_head.id, &old_head_id)
            .map_err(|err| {
                self.fork_db.remove(&new_head.id);
                err
            })?;
        let common_ancestor = new_branch
            .last()
            .or(old_branch.last())
            .map_or(old_head_id, |item| item.previous);

        let last_irreversible = self.last_irreversible_block_num()?;
        if common_ancestor.num() < last_irreversible {
            self.fork_db.set_head(&old_head_id)?;
            return Err(ChainError::ForkBelowIrreversible {
                ancestor: common_ancestor.num(),
                last_irreversible,
            });
        }

        while self.head_block_id()? != common_ancestor {
            self.pop_block()?;
        }

        for (position, item) in new_branch.iter().enumerate().rev() {
            self.fork_db.set_head(&item.id)?;
            let applied = self.with_undo_session(|chain| chain.apply_block(&item.block, skip));
            if let Err(err) = applied {
                log::warn!("Failed to apply block {} of fork: {}", item.id, err);
                for bad in &new_branch[..=position] {
                    self.fork_db.remove(&bad.id);
                }

                while self.head_block_id()? != common_ancestor {
                    self.pop_block()?;
                }
                for good in old_branch.iter().rev() {
                    self.fork_db.set_head(&good.id)?;
                    self.with_undo_session(|chain| chain.apply_block(&good.block, skip))?;
                    self.finalize_block()?;
                }
                self.fork_db.set_head(&old_head_id)?;
                return Err(err);
            }
            self.finalize_block()?;
        }

        self.event_handlers
            .fire_handlers(Event::SwitchFork(SwitchForkEvent {
                timestamp: SystemTime::now(),
                old_head: old_head_id,
                new_head: new_head.id,
                common_ancestor,
            }));
        Ok(())
    }

    /// Undo the head block. Its transactions are re-applied as pending transactions after the next block
    /// is pushed.
    pub fn pop_block(&mut self) -> Result<SignedBlock, ChainError> {
        self.clear_pending_session()?;

        let head_id = self.head_block_id()?;
        let head_num = self.head_block_num()?;
        if head_num.int() == 0 || !self.store.has_session(head_num.int() as i64) {
            return Err(ChainError::NothingToPop);
        }
        let item = self
            .fork_db
            .fetch_block(&head_id)
            .ok_or(ChainError::NothingToPop)?;

        self.fork_db.set_head(&head_id)?;
        self.fork_db.pop_block()?;
        self.store.undo_session(head_num.int() as i64)?;

        let block = SignedBlock::clone(&item.block);
        self.popped_transactions
            .splice(0..0, block.transactions.iter().cloned());
        Ok(block)
    }

    /// Validate `trx` against the head state plus the pending transactions, and add it to the pending
    /// pool.
    pub fn push_transaction(&mut self, trx: SignedTransaction, skip: SkipFlags) -> Result<(), ChainError> {
        let size = trx.size();
        let maximum_block_size = self.dynamic_global_properties()?.maximum_block_size as usize;
        let max = (self.config.max_transaction_size as usize)
            .min(maximum_block_size.saturating_sub(BLOCK_OVERHEAD_BYTES));
        if size > max {
            return Err(ChainError::TransactionTooLarge { size, max });
        }

        self.is_producing = true;
        let result = self.with_skip_flags(skip, |chain| chain.push_transaction_inner(trx));
        self.is_producing = false;
        result
    }

    fn push_transaction_inner(&mut self, trx: SignedTransaction) -> Result<(), ChainError> {
        if self.pending_session.is_none() {
            self.pending_session = Some(self.store.begin_session());
        }
        self.current_block_num = self.head_block_num()? + 1;

        self.with_temp_session(|chain| chain.apply_transaction(&trx))?;

        if self.event_handlers.wants_transaction_events() {
            self.event_handlers
                .fire_handlers(Event::PendingTransaction(PendingTransactionEvent {
                    timestamp: SystemTime::now(),
                    trx_id: trx.id(),
                    transaction: trx.clone(),
                }));
        }
        self.pending_transactions.push(trx);
        Ok(())
    }

    /// Undo the pending transactions' changes and empty the pending pool.
    pub fn clear_pending(&mut self) -> Result<(), ChainError> {
        self.clear_pending_session()?;
        self.pending_transactions.clear();
        Ok(())
    }

    fn clear_pending_session(&mut self) -> Result<(), ChainError> {
        if let Some(revision) = self.pending_session.take() {
            self.store.undo_session(revision)?;
        }
        Ok(())
    }

    /// Re-apply the popped transactions, then `pending`, skipping those already known. They are held to the
    /// same rules as newly pushed transactions.
    fn restore_pending(&mut self, pending: Vec<SignedTransaction>) -> Result<(), ChainError> {
        let popped = std::mem::take(&mut self.popped_transactions);
        self.is_producing = true;
        let result = self.restore_pending_inner(popped.into_iter().chain(pending));
        self.is_producing = false;
        result
    }

    fn restore_pending_inner(
        &mut self,
        transactions: impl Iterator<Item = SignedTransaction>,
    ) -> Result<(), ChainError> {
        for trx in transactions {
            let trx_id = trx.id();
            if self.is_known_transaction(&trx_id)? {
                continue;
            }
            if let Err(err) = self.push_transaction_inner(trx) {
                if err.class() == ErrorClass::Fatal {
                    return Err(err);
                }
                log::info!("Dropping pending transaction {}: {}", trx_id, err);
            }
        }
        Ok(())
    }

    /// Produce, sign, and push a block for the slot at `when`, filled with as many pending transactions as
    /// fit.
    pub fn generate_block(
        &mut self,
        when: Timestamp,
        witness_owner: &AccountName,
        signing_keypair: &Keypair,
        skip: SkipFlags,
    ) -> Result<SignedBlock, ChainError> {
        self.is_producing = true;
        let result = self.with_skip_flags(skip, |chain| {
            chain.generate_block_inner(when, witness_owner, signing_keypair)
        });
        self.is_producing = false;
        result
    }

    fn generate_block_inner(
        &mut self,
        when: Timestamp,
        witness_owner: &AccountName,
        signing_keypair: &Keypair,
    ) -> Result<SignedBlock, ChainError> {
        let skip = self.skip_flags;
        let slot = get_slot_at_time(&self.store, self.config.block_interval, when)?;
        if slot == 0 {
            return Err(ChainError::NoSlot { timestamp: when });
        }
        let scheduled = get_scheduled_witness(&self.store, slot)?;
        if &scheduled != witness_owner {
            return Err(ChainError::WrongWitness {
                scheduled,
                got: witness_owner.clone(),
            });
        }
        let witness = self.store.get::<Witness, WitnessByOwner>(witness_owner)?.clone();
        if !skip.contains(SkipFlags::WITNESS_SIGNATURE)
            && witness.signing_key != Some(signing_keypair.public())
        {
            return Err(ChainError::WrongSigningKey {
                witness: witness_owner.clone(),
            });
        }

        let head_id = self.head_block_id()?;
        let maximum_block_size = self.dynamic_global_properties()?.maximum_block_size as usize;
        let mut block_size = SignedBlock::new(head_id, when, witness_owner.clone(), Vec::new()).size()
            + BLOCK_OVERHEAD_BYTES;

        // Rebuild the pending state from scratch so that the block only holds transactions that apply on
        // top of the head in order.
        self.clear_pending_session()?;
        let pending = std::mem::take(&mut self.pending_transactions);
        self.pending_session = Some(self.store.begin_session());
        self.current_block_num = self.head_block_num()? + 1;

        let mut included = Vec::new();
        let mut postponed = 0;
        for trx in &pending {
            if trx.expiration < when {
                continue;
            }
            let size = trx.size();
            let result = if block_size + size > maximum_block_size {
                Err(ChainError::BlockFull {
                    size,
                    remaining: maximum_block_size.saturating_sub(block_size),
                })
            } else {
                self.with_temp_session(|chain| chain.apply_transaction_inner(trx))
            };
            match result {
                Ok(()) => {
                    block_size += size;
                    included.push(trx.clone());
                }
                Err(err) => match err.class() {
                    ErrorClass::Fatal => {
                        self.clear_pending_session()?;
                        self.pending_transactions = pending;
                        return Err(err);
                    }
                    ErrorClass::Postponable => postponed += 1,
                    ErrorClass::Skippable => {
                        log::debug!("Leaving transaction {} out of the block: {}", trx.id(), err)
                    }
                },
            }
        }
        if postponed > 0 {
            log::info!("Postponed {} transactions due to the block size limit", postponed);
        }
        self.clear_pending_session()?;
        self.pending_transactions = pending;

        let mut block = SignedBlock::new(head_id, when, witness_owner.clone(), included);
        block.header.extensions = self.header_extensions(&witness)?;
        if !skip.contains(SkipFlags::WITNESS_SIGNATURE) {
            block.sign(signing_keypair);
        }
        let size = block.size();
        if !skip.contains(SkipFlags::BLOCK_SIZE_CHECK) && size > maximum_block_size {
            return Err(ChainError::BlockTooLarge {
                size,
                max: maximum_block_size,
            });
        }

        self.push_block(block.clone(), skip)?;
        Ok(block)
    }

    /// The version signals `witness` should attach to its next block: the version it runs if the chain
    /// does not know it yet, and its vote for the next hardfork this node knows.
    fn header_extensions(&self, witness: &Witness) -> Result<Vec<BlockHeaderExtension>, ChainError> {
        let mut extensions = Vec::new();
        let blockchain_version = self.config.blockchain_version;
        if witness.running_version != blockchain_version {
            extensions.push(BlockHeaderExtension::Version(blockchain_version));
        }

        let hardfork_property = self.store.singleton::<HardforkProperty>()?;
        let binary_hardfork_version = blockchain_version.hardfork_version();
        let last = hardfork_property.last_hardfork;
        let vote = if hardfork_property.current_hardfork_version < binary_hardfork_version {
            self.hardforks
                .version(last + 1)
                .zip(self.hardforks.time(last + 1))
                .filter(|(version, _)| *version <= blockchain_version)
        } else if witness.hardfork_version_vote > binary_hardfork_version {
            // The witness voted past what this node can run. Withdraw the vote.
            self.hardforks.version(last).zip(self.hardforks.time(last))
        } else {
            None
        };
        if let Some((version, time)) = vote {
            if witness.hardfork_version_vote != version || witness.hardfork_time_vote != time {
                extensions.push(BlockHeaderExtension::HardforkVersionVote { version, time });
            }
        }
        Ok(extensions)
    }
}
