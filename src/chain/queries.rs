/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read-only views of the chain.

use super::{Chain, ChainError};
use crate::block_log::BlockLog;
use crate::config::Configuration;
use crate::fork_db::ForkDatabase;
use crate::hardfork;
use crate::objects::account::AccountByName;
use crate::objects::feed::FeedBySymbol;
use crate::objects::transaction::{SummaryByRefNum, TransactionByTrxId};
use crate::objects::witness::WitnessByOwner;
use crate::objects::{
    Account, BlockSummary, DynamicGlobalProperties, FeedHistory, HardforkProperty,
    TransactionRecord, Witness, WitnessSchedule,
};
use crate::state::{KVStore, StateStore};
use crate::types::basic::{AccountName, AssetSymbol, BlockId, BlockNumber, Timestamp, TransactionId};
use crate::types::block::SignedBlock;
use crate::types::transaction::SignedTransaction;
use crate::witness_schedule;

/// Head and irreversibility.
impl<K: KVStore> Chain<K> {
    pub fn dynamic_global_properties(&self) -> Result<&DynamicGlobalProperties, ChainError> {
        Ok(self.store.singleton::<DynamicGlobalProperties>()?)
    }

    pub fn head_block_num(&self) -> Result<BlockNumber, ChainError> {
        Ok(self.dynamic_global_properties()?.head_block_number)
    }

    pub fn head_block_id(&self) -> Result<BlockId, ChainError> {
        Ok(self.dynamic_global_properties()?.head_block_id)
    }

    pub fn head_block_time(&self) -> Result<Timestamp, ChainError> {
        Ok(self.dynamic_global_properties()?.time)
    }

    pub fn last_irreversible_block_num(&self) -> Result<BlockNumber, ChainError> {
        Ok(self.dynamic_global_properties()?.last_irreversible_block_num)
    }
}

/// Blocks and transactions.
impl<K: KVStore> Chain<K> {
    /// Whether `id` is in the fork database or the block log.
    pub fn is_known_block(&self, id: &BlockId) -> Result<bool, ChainError> {
        if self.fork_db.is_known_block(id) {
            return Ok(true);
        }
        Ok(self
            .block_log
            .read_block_by_num(id.num())?
            .map_or(false, |block| block.id() == *id))
    }

    /// Whether a transaction with id `trx_id` was applied and has not expired yet.
    pub fn is_known_transaction(&self, trx_id: &TransactionId) -> Result<bool, ChainError> {
        Ok(self
            .store
            .find::<TransactionRecord, TransactionByTrxId>(trx_id)?
            .is_some())
    }

    pub fn fetch_block_by_id(&self, id: &BlockId) -> Result<Option<SignedBlock>, ChainError> {
        if let Some(item) = self.fork_db.fetch_block(id) {
            return Ok(Some(SignedBlock::clone(&item.block)));
        }
        Ok(self
            .block_log
            .read_block_by_num(id.num())?
            .filter(|block| block.id() == *id))
    }

    /// The block numbered `num` on the main chain: from the block log if it is irreversible, else from the
    /// fork database.
    pub fn fetch_block_by_number(&self, num: BlockNumber) -> Result<Option<SignedBlock>, ChainError> {
        if num <= self.block_log.head_num() {
            return Ok(self.block_log.read_block_by_num(num)?);
        }
        Ok(self
            .fork_db
            .fetch_block_on_main_branch_by_number(num)
            .map(|item| SignedBlock::clone(&item.block)))
    }

    /// The id of the main chain's block numbered `num`, looked up in the block summaries first, then in the
    /// block log, then in the fork database. Block 0 has [`BlockId::ZERO`].
    pub fn find_block_id_for_num(&self, num: BlockNumber) -> Result<Option<BlockId>, ChainError> {
        if num.int() == 0 {
            return Ok(Some(BlockId::ZERO));
        }
        if num > self.head_block_num()? {
            return Ok(None);
        }
        if let Some(summary) = self
            .store
            .find::<BlockSummary, SummaryByRefNum>(&num.ref_num())?
        {
            if summary.block_id.num() == num {
                return Ok(Some(summary.block_id));
            }
        }
        if let Some(block) = self.block_log.read_block_by_num(num)? {
            return Ok(Some(block.id()));
        }
        Ok(self
            .fork_db
            .fetch_block_on_main_branch_by_number(num)
            .map(|item| item.id))
    }

    pub fn get_block_id_for_num(&self, num: BlockNumber) -> Result<BlockId, ChainError> {
        self.find_block_id_for_num(num)?
            .ok_or(ChainError::UnknownBlockNumber(num))
    }

    /// The blocks of the fork ending at `head_of_fork` that are not on the main chain, newest first,
    /// followed by the fork's common ancestor with the main chain.
    pub fn get_block_ids_on_fork(&self, head_of_fork: &BlockId) -> Result<Vec<BlockId>, ChainError> {
        let head_id = self.head_block_id()?;
        let (main_branch, fork_branch) = self.fork_db.fetch_branch_from(&head_id, head_of_fork)?;
        let common_ancestor = fork_branch
            .last()
            .or(main_branch.last())
            .map_or(*head_of_fork, |item| item.previous);

        let mut ids: Vec<BlockId> = fork_branch.iter().map(|item| item.id).collect();
        ids.push(common_ancestor);
        Ok(ids)
    }

    pub fn pending_transactions(&self) -> &[SignedTransaction] {
        &self.pending_transactions
    }

    pub fn popped_transactions(&self) -> &[SignedTransaction] {
        &self.popped_transactions
    }
}

/// Ledger records.
impl<K: KVStore> Chain<K> {
    pub fn get_account(&self, name: &AccountName) -> Result<&Account, ChainError> {
        Ok(self.store.get::<Account, AccountByName>(name)?)
    }

    pub fn find_account(&self, name: &AccountName) -> Result<Option<&Account>, ChainError> {
        Ok(self.store.find::<Account, AccountByName>(name)?)
    }

    pub fn get_witness(&self, owner: &AccountName) -> Result<&Witness, ChainError> {
        Ok(self.store.get::<Witness, WitnessByOwner>(owner)?)
    }

    pub fn witness_schedule(&self) -> Result<&WitnessSchedule, ChainError> {
        Ok(self.store.singleton::<WitnessSchedule>()?)
    }

    pub fn hardfork_property(&self) -> Result<&HardforkProperty, ChainError> {
        Ok(self.store.singleton::<HardforkProperty>()?)
    }

    pub fn has_hardfork(&self, hardfork: u32) -> Result<bool, ChainError> {
        Ok(hardfork::has_hardfork(&self.store, hardfork)?)
    }

    pub fn feed_history(&self, symbol: AssetSymbol) -> Result<&FeedHistory, ChainError> {
        Ok(self.store.get::<FeedHistory, FeedBySymbol>(&symbol)?)
    }
}

/// Slots.
impl<K: KVStore> Chain<K> {
    pub fn get_slot_time(&self, slot: u32) -> Result<Timestamp, ChainError> {
        Ok(witness_schedule::get_slot_time(
            &self.store,
            self.config.block_interval,
            slot,
        )?)
    }

    pub fn get_slot_at_time(&self, when: Timestamp) -> Result<u32, ChainError> {
        Ok(witness_schedule::get_slot_at_time(
            &self.store,
            self.config.block_interval,
            when,
        )?)
    }

    pub fn get_scheduled_witness(&self, slot: u32) -> Result<AccountName, ChainError> {
        Ok(witness_schedule::get_scheduled_witness(&self.store, slot)?)
    }
}

/// Components.
impl<K: KVStore> Chain<K> {
    /// The state store, for reading records this module has no accessor for.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn fork_db(&self) -> &ForkDatabase {
        &self.fork_db
    }

    pub fn block_log(&self) -> &BlockLog {
        &self.block_log
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }
}
