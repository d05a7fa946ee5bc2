/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chain's own updates at the end of every block, after the block's transactions, and the
//! irreversibility bookkeeping after a block is pushed.

use std::time::SystemTime;

use super::{Chain, ChainError, SkipFlags};
use crate::config::{
    NULL_ACCOUNT, OWNER_AUTH_RECOVERY_PERIOD, PERCENT_100, SECONDS_PER_YEAR,
    VESTING_WITHDRAW_INTERVAL_SECONDS,
};
use crate::events::*;
use crate::hardfork;
use crate::objects::account::{AccountByName, AccountByNextVestingWithdrawal, OwnerHistoryByLastValidTime};
use crate::objects::escrow::EscrowByRatificationDeadline;
use crate::objects::recovery::{ChangeRecoveryByEffectiveDate, RecoveryRequestByExpiration};
use crate::objects::transaction::{SummaryByRefNum, TransactionByExpiration};
use crate::objects::witness::WitnessByOwner;
use crate::objects::{
    Account, AccountRecoveryRequest, BlockSummary, ChangeRecoveryAccountRequest,
    DynamicGlobalProperties, EconomicModel, Escrow, FeedHistory, HardforkProperty,
    OwnerAuthorityHistory, TransactionRecord, Witness, WitnessSchedule,
};
use crate::state::{KVStore, Object, ObjectId};
use crate::types::basic::{AccountName, Asset, AssetSymbol, Price, Timestamp};
use crate::types::block::SignedBlock;
use crate::types::operation::{
    FillVestingWithdrawOperation, HardforkOperation, InterestOperation, Operation,
    ProducerRewardOperation, ShutdownWitnessOperation,
};
use crate::witness_schedule::{
    adjust_witness_votes, compute_last_irreversible_block, get_scheduled_witness, get_slot_at_time,
};

impl<K: KVStore> Chain<K> {
    pub(super) fn modify_dynamic_global_properties(
        &mut self,
        mutator: impl FnOnce(&mut DynamicGlobalProperties),
    ) -> Result<(), ChainError> {
        let id = self.store.singleton::<DynamicGlobalProperties>()?.id();
        self.store.modify::<DynamicGlobalProperties, _>(id, mutator)?;
        Ok(())
    }

    pub(super) fn modify_economic_model(
        &mut self,
        mutator: impl FnOnce(&mut EconomicModel),
    ) -> Result<(), ChainError> {
        let id = self.store.singleton::<EconomicModel>()?.id();
        self.store.modify::<EconomicModel, _>(id, mutator)?;
        Ok(())
    }

    /// Charge the witnesses of the slots skipped before `block` with a miss, shutting down those that
    /// have not produced for a day, then advance the head and the participation bitmap.
    pub(super) fn update_global_dynamic_data(&mut self, block: &SignedBlock) -> Result<(), ChainError> {
        let dgp = self.dynamic_global_properties()?;
        let head_num = dgp.head_block_number;
        let slot = get_slot_at_time(&self.store, self.config.block_interval, block.timestamp())?;
        let missed_blocks = slot.saturating_sub(1);
        let blocks_per_day = self.config.blocks_per_day();

        for missed_slot in 1..=missed_blocks {
            let missed_owner = get_scheduled_witness(&self.store, missed_slot)?;
            if &missed_owner == block.witness() {
                continue;
            }
            let witness = self.store.get::<Witness, WitnessByOwner>(&missed_owner)?;
            let shutdown = witness.signing_key.is_some()
                && head_num.int().saturating_sub(witness.last_confirmed_block_num.int()) > blocks_per_day;
            let id = witness.id();
            self.store.modify::<Witness, _>(id, |witness| {
                witness.total_missed += 1;
                if shutdown {
                    witness.signing_key = None;
                }
            })?;
            if shutdown {
                log::warn!("Shutting down witness {} after a day without blocks", missed_owner);
                self.push_virtual_operation(Operation::ShutdownWitness(ShutdownWitnessOperation {
                    owner: missed_owner,
                }));
            }
        }

        let (block_num, block_id, timestamp) = (block.num(), block.id(), block.timestamp());
        self.modify_dynamic_global_properties(|dgp| {
            // The low bit is the newest slot.
            let filled = if missed_blocks >= 128 {
                0
            } else {
                dgp.recent_slots_filled << missed_blocks
            };
            dgp.recent_slots_filled = (filled << 1) | 1;
            dgp.participation_count = dgp.recent_slots_filled.count_ones() as u8;

            dgp.head_block_number = block_num;
            dgp.head_block_id = block_id;
            dgp.time = timestamp;
            dgp.current_aslot += missed_blocks as u64 + 1;
        })?;

        let last_irreversible = self.last_irreversible_block_num()?;
        if !self.skip_flags.contains(SkipFlags::UNDO_HISTORY_CHECK)
            && block_num - last_irreversible >= self.config.max_undo_history
        {
            return Err(ChainError::UndoHistoryExhausted {
                head: block_num,
                last_irreversible,
            });
        }
        Ok(())
    }

    /// Record that the block's witness produced in the current slot and confirmed the block.
    pub(super) fn update_signing_witness(&mut self, block: &SignedBlock) -> Result<(), ChainError> {
        let slot = get_slot_at_time(&self.store, self.config.block_interval, block.timestamp())?;
        let aslot = self.dynamic_global_properties()?.current_aslot + slot as u64;
        let block_num = block.num();
        self.store
            .modify_by::<Witness, WitnessByOwner, _>(block.witness(), |witness| {
                witness.last_aslot = aslot;
                witness.last_confirmed_block_num = block_num;
            })?;
        Ok(())
    }

    pub(super) fn update_last_irreversible_block(&mut self) -> Result<(), ChainError> {
        let last_irreversible = compute_last_irreversible_block(&self.store, &self.config)?;
        if last_irreversible != self.last_irreversible_block_num()? {
            self.modify_dynamic_global_properties(|dgp| {
                dgp.last_irreversible_block_num = last_irreversible
            })?;
        }
        Ok(())
    }

    /// Remember the block's id under its reference number, for transactions to refer to.
    pub(super) fn create_block_summary(&mut self, block: &SignedBlock) -> Result<(), ChainError> {
        let ref_num = block.num().ref_num();
        let block_id = block.id();
        let existing = self
            .store
            .find::<BlockSummary, SummaryByRefNum>(&ref_num)?
            .map(|summary| summary.id());
        match existing {
            Some(id) => {
                self.store
                    .modify::<BlockSummary, _>(id, |summary| summary.block_id = block_id)?;
            }
            None => {
                self.store.create::<BlockSummary, _>(|summary| {
                    summary.ref_num = ref_num;
                    summary.block_id = block_id;
                })?;
            }
        }
        Ok(())
    }

    /// Forget the ids of transactions that have expired, which can no longer be replayed.
    pub(super) fn clear_expired_transactions(&mut self) -> Result<(), ChainError> {
        let now = self.head_block_time()?;
        let expired: Vec<ObjectId> = self
            .store
            .iter_by::<TransactionRecord, TransactionByExpiration>()?
            .take_while(|record| now > record.expiration)
            .map(|record| record.id())
            .collect();
        for id in expired {
            self.store.remove::<TransactionRecord>(id)?;
        }
        Ok(())
    }

    /// Every feed interval, push the median of the scheduled witnesses' fresh exchange rates to each
    /// feed history, and update the history's median.
    pub(super) fn update_median_feeds(&mut self) -> Result<(), ChainError> {
        let interval = self.config.feed_interval_blocks;
        if interval == 0 || self.head_block_num()?.int() % interval != 0 {
            return Ok(());
        }
        let now = self.head_block_time()?;
        let feeds: Vec<(ObjectId, AssetSymbol)> = self
            .store
            .iter::<FeedHistory>()?
            .map(|feed| (feed.id(), feed.symbol))
            .collect();
        let scheduled = self
            .store
            .singleton::<WitnessSchedule>()?
            .current_shuffled_witnesses
            .clone();

        for (id, symbol) in feeds {
            let mut rates = Vec::new();
            for owner in &scheduled {
                let witness = self.store.get::<Witness, WitnessByOwner>(owner)?;
                if let Some(rate) = witness.exchange_rates.get(&symbol) {
                    if now < witness.last_exchange_update + self.config.max_feed_age && !rate.is_null() {
                        rates.push(*rate);
                    }
                }
            }
            if rates.is_empty() || rates.len() < self.config.min_feeds as usize {
                continue;
            }
            rates.sort_by(Price::cmp_ratio);
            let median = rates[rates.len() / 2];

            let window = self.config.feed_history_window as usize;
            self.store.modify::<FeedHistory, _>(id, |feed| {
                feed.price_history.push(median);
                if feed.price_history.len() > window {
                    let excess = feed.price_history.len() - window;
                    feed.price_history.drain(..excess);
                }
                let mut history = feed.price_history.clone();
                history.sort_by(Price::cmp_ratio);
                if let Some(current) = history.get(history.len() / 2) {
                    feed.current_median_history = *current;
                }
            })?;
        }
        Ok(())
    }

    /// Pay the accounts of this block's batch their interest on their liquid native balance since they were
    /// last paid, `interest_blocks` blocks ago.
    pub(super) fn process_interests(&mut self) -> Result<(), ChainError> {
        let (rate, batches) = (self.config.interest_rate, self.config.interest_blocks);
        if rate == 0 || batches == 0 {
            return Ok(());
        }
        let batch = self.head_block_num()?.int() as u64 % batches as u64;
        let period_secs = batches as i128 * self.config.block_interval as i128;
        let null_account = AccountName::from(NULL_ACCOUNT);

        let due: Vec<(ObjectId, AccountName, i64)> = self
            .store
            .iter::<Account>()?
            .filter(|account| account.id().int() % batches as u64 == batch)
            .filter(|account| account.balance.amount > 0 && account.name != null_account)
            .filter_map(|account| {
                let interest = account.balance.amount as i128 * rate as i128 * period_secs
                    / (PERCENT_100 as i128 * SECONDS_PER_YEAR as i128);
                let interest = i64::try_from(interest).ok()?;
                (interest > 0).then(|| (account.id(), account.name.clone(), interest))
            })
            .collect();

        for (id, owner, interest) in due {
            self.store
                .modify::<Account, _>(id, |account| account.balance.amount += interest)?;
            self.modify_dynamic_global_properties(|dgp| dgp.current_supply.amount += interest)?;
            self.modify_economic_model(|model| model.total_interest += interest)?;
            self.push_virtual_operation(Operation::Interest(InterestOperation {
                owner,
                interest: Asset::native(interest),
            }));
        }
        Ok(())
    }

    /// Destroy whatever was sent to the null account, native tokens and vesting shares alike.
    pub(super) fn clear_null_account_balance(&mut self) -> Result<(), ChainError> {
        let null_account = AccountName::from(NULL_ACCOUNT);
        let account = match self.store.find::<Account, AccountByName>(&null_account)? {
            Some(account) => account,
            None => return Ok(()),
        };
        let (id, balance, vesting) = (
            account.id(),
            account.balance.amount,
            account.vesting_shares.amount,
        );
        if balance == 0 && vesting == 0 {
            return Ok(());
        }

        self.store.modify::<Account, _>(id, |account| {
            account.balance.amount = 0;
            account.vesting_shares.amount = 0;
        })?;
        // Vesting shares are backed one to one by the vesting fund.
        self.modify_dynamic_global_properties(|dgp| {
            dgp.current_supply.amount -= balance + vesting;
            dgp.total_vesting_fund.amount -= vesting;
            dgp.total_vesting_shares.amount -= vesting;
        })?;
        adjust_witness_votes(&mut self.store, &null_account, -vesting)?;
        self.modify_economic_model(|model| model.total_burned += balance + vesting)?;
        log::debug!("Burned {} native and {} vesting from {}", balance, vesting, NULL_ACCOUNT);
        Ok(())
    }

    /// Pay the head block's producer the fee pool, as vesting shares.
    pub(super) fn process_funds(&mut self) -> Result<(), ChainError> {
        let reward = self.store.singleton::<EconomicModel>()?.fee_pool;
        if reward <= 0 {
            return Ok(());
        }
        let producer = self.dynamic_global_properties()?.current_witness.clone();

        self.store
            .modify_by::<Account, AccountByName, _>(&producer, |account| {
                account.vesting_shares.amount += reward
            })?;
        self.modify_dynamic_global_properties(|dgp| {
            dgp.current_supply.amount += reward;
            dgp.total_vesting_fund.amount += reward;
            dgp.total_vesting_shares.amount += reward;
        })?;
        adjust_witness_votes(&mut self.store, &producer, reward)?;
        self.modify_economic_model(|model| {
            model.fee_pool = 0;
            model.total_producer_rewards += reward;
        })?;

        self.push_virtual_operation(Operation::ProducerReward(ProducerRewardOperation {
            producer,
            vesting_shares: Asset::vests(reward),
        }));
        Ok(())
    }

    /// Pay out the vesting withdrawals due at the head block time. Vesting shares convert to the native
    /// asset one to one.
    pub(super) fn process_vesting_withdrawals(&mut self) -> Result<(), ChainError> {
        let now = self.head_block_time()?;
        loop {
            let due = self
                .store
                .iter_by::<Account, AccountByNextVestingWithdrawal>()?
                .next()
                .filter(|account| account.next_vesting_withdrawal <= now)
                .cloned();
            let account = match due {
                Some(account) => account,
                None => break,
            };

            let rate = account.vesting_withdraw_rate.amount;
            let vesting = account.vesting_shares.amount;
            let remaining = account.to_withdraw - account.withdrawn;
            let withdrawn = if rate <= 0 {
                0
            } else if remaining < rate {
                vesting.min(account.to_withdraw % rate)
            } else {
                vesting.min(rate)
            };

            self.store.modify::<Account, _>(account.id(), |account| {
                account.vesting_shares.amount -= withdrawn;
                account.balance.amount += withdrawn;
                account.withdrawn += withdrawn;
                if rate <= 0
                    || account.withdrawn >= account.to_withdraw
                    || account.vesting_shares.amount == 0
                {
                    account.vesting_withdraw_rate.amount = 0;
                    account.next_vesting_withdrawal = Timestamp::MAX;
                } else {
                    account.next_vesting_withdrawal =
                        account.next_vesting_withdrawal + VESTING_WITHDRAW_INTERVAL_SECONDS;
                }
            })?;
            self.modify_dynamic_global_properties(|dgp| {
                dgp.total_vesting_fund.amount -= withdrawn;
                dgp.total_vesting_shares.amount -= withdrawn;
            })?;
            adjust_witness_votes(&mut self.store, &account.name, -withdrawn)?;

            self.push_virtual_operation(Operation::FillVestingWithdraw(FillVestingWithdrawOperation {
                account: account.name,
                withdrawn: Asset::vests(withdrawn),
                deposited: Asset::native(withdrawn),
            }));
        }
        Ok(())
    }

    /// Drop expired recovery requests and owner authority history past the recovery period, and apply the
    /// recovery account changes that have come into effect.
    pub(super) fn account_recovery_processing(&mut self) -> Result<(), ChainError> {
        let now = self.head_block_time()?;

        let expired: Vec<ObjectId> = self
            .store
            .iter_by::<AccountRecoveryRequest, RecoveryRequestByExpiration>()?
            .take_while(|request| request.expires <= now)
            .map(|request| request.id())
            .collect();
        for id in expired {
            self.store.remove::<AccountRecoveryRequest>(id)?;
        }

        let outdated: Vec<ObjectId> = self
            .store
            .iter_by::<OwnerAuthorityHistory, OwnerHistoryByLastValidTime>()?
            .take_while(|history| history.last_valid_time + OWNER_AUTH_RECOVERY_PERIOD < now)
            .map(|history| history.id())
            .collect();
        for id in outdated {
            self.store.remove::<OwnerAuthorityHistory>(id)?;
        }

        let effective: Vec<ChangeRecoveryAccountRequest> = self
            .store
            .iter_by::<ChangeRecoveryAccountRequest, ChangeRecoveryByEffectiveDate>()?
            .take_while(|request| request.effective_on <= now)
            .cloned()
            .collect();
        for request in effective {
            let recovery_account = request.recovery_account.clone();
            self.store
                .modify_by::<Account, AccountByName, _>(&request.account_to_recover, |account| {
                    account.recovery_account = recovery_account
                })?;
            self.store.remove::<ChangeRecoveryAccountRequest>(request.id())?;
        }
        Ok(())
    }

    /// Refund the escrows nobody approved before their ratification deadline.
    pub(super) fn expire_escrow_ratification(&mut self) -> Result<(), ChainError> {
        let now = self.head_block_time()?;
        let expired: Vec<Escrow> = self
            .store
            .range_by::<Escrow, EscrowByRatificationDeadline, _>(
                (false, Timestamp::ZERO)..=(false, now),
            )?
            .cloned()
            .collect();
        for escrow in expired {
            let from = self.store.get::<Account, AccountByName>(&escrow.from)?;
            let refunded = from
                .balance
                .checked_add(&escrow.balance)
                .and_then(|balance| balance.checked_add(&escrow.pending_fee))
                .ok_or_else(|| {
                    ChainError::InvariantViolation(format!(
                        "escrow {} of {} holds a non-native balance",
                        escrow.escrow_id, escrow.from
                    ))
                })?;
            self.store
                .modify_by::<Account, AccountByName, _>(&escrow.from, |account| {
                    account.balance = refunded
                })?;
            self.store.remove::<Escrow>(escrow.id())?;
        }
        Ok(())
    }

    /// Apply every hardfork that has been voted in and whose activation time has passed.
    pub(super) fn process_hardforks(&mut self) -> Result<(), ChainError> {
        let head_time = self.head_block_time()?;
        while let Some(next) = hardfork::next_due_hardfork(&self.store, &self.hardforks, head_time)? {
            self.apply_hardfork(next)?;
        }
        Ok(())
    }

    fn apply_hardfork(&mut self, hardfork_id: u32) -> Result<(), ChainError> {
        hardfork::apply_hardfork(&mut self.store, &self.hardforks, hardfork_id)?;
        self.push_virtual_operation(Operation::Hardfork(HardforkOperation { hardfork_id }));
        Ok(())
    }

    /// Schedule every hardfork up to `hardfork` to activate at the head block time, bypassing the witness
    /// vote, and apply them right away if `apply_now`.
    pub fn set_hardfork(&mut self, hardfork: u32, apply_now: bool) -> Result<(), ChainError> {
        let last = self.store.singleton::<HardforkProperty>()?.last_hardfork;
        let head_time = self.head_block_time()?;
        for next in last + 1..=hardfork.min(self.hardforks.num_hardforks()) {
            hardfork::set_next_hardfork(&mut self.store, &self.hardforks, next, head_time)?;
            if apply_now {
                self.apply_hardfork(next)?;
            }
        }
        Ok(())
    }

    /// Make the changes of irreversible blocks permanent and move those blocks from the fork database to
    /// the block log.
    pub(super) fn finalize_block(&mut self) -> Result<(), ChainError> {
        let dgp = self.dynamic_global_properties()?;
        let (head, last_irreversible) = (dgp.head_block_number, dgp.last_irreversible_block_num);
        self.store.commit(last_irreversible.int() as i64);

        if !self.skip_flags.contains(SkipFlags::BLOCK_LOG) {
            let mut log_head = self.block_log.head_num();
            if log_head < last_irreversible {
                while log_head < last_irreversible {
                    let num = log_head + 1;
                    let item = self
                        .fork_db
                        .fetch_block_on_main_branch_by_number(num)
                        .ok_or(ChainError::MissingIrreversibleBlock(num))?;
                    self.block_log.append(&item.block)?;
                    self.event_handlers
                        .fire_handlers(Event::IrreversibleBlock(IrreversibleBlockEvent {
                            timestamp: SystemTime::now(),
                            block_id: item.id,
                            block_num: num,
                            witness: item.block.witness().clone(),
                        }));
                    log_head = num;
                }
                self.block_log.flush()?;
            }
        }

        self.fork_db.set_max_size(head - last_irreversible + 1);

        if self.config.flush_interval_blocks > 0 {
            self.blocks_since_flush += 1;
            if self.blocks_since_flush >= self.config.flush_interval_blocks {
                log::info!("Flushing state at block {}", head);
                self.flush()?;
            }
        }

        self.store.grow_if_needed()?;
        Ok(())
    }
}
