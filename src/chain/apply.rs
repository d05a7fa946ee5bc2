/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Applying blocks, transactions, and operations to the state store.
//!
//! None of these open or close undo sessions of their own. The caller decides whether the changes are
//! kept (a pushed block), folded into the pending state (a pending transaction), or applied
//! permanently (a replayed block).

use std::sync::Arc;
use std::time::SystemTime;

use super::{Chain, ChainError, SkipFlags};
use crate::config::MAX_SIG_CHECK_DEPTH;
use crate::evaluator::EvaluationContext;
use crate::events::*;
use crate::objects::account::{AccountByName, AuthorityByAccount};
use crate::objects::economics::SponsorBySponsored;
use crate::objects::transaction::{SummaryByRefNum, TransactionByTrxId};
use crate::objects::witness::WitnessByOwner;
use crate::objects::{
    Account, AccountAuthority, BlockSummary, FeeSponsor, HardforkProperty, TransactionRecord, Witness,
};
use crate::state::{KVStore, Object, ObjectId};
use crate::types::basic::AccountName;
use crate::types::block::{BlockHeaderExtension, SignedBlock};
use crate::types::operation::Operation;
use crate::types::transaction::SignedTransaction;
use crate::witness_schedule::{get_scheduled_witness, get_slot_at_time, update_witness_schedule};

impl<K: KVStore> Chain<K> {
    /// Apply `block` on top of the head with the checks in `skip` skipped, then check the supply
    /// invariants. A block at a checkpointed height must carry the checkpointed id.
    pub(super) fn apply_block(&mut self, block: &SignedBlock, skip: SkipFlags) -> Result<(), ChainError> {
        let block_num = block.num();
        if let Some(expected) = self.config.checkpoints.get(&block_num) {
            let got = block.id();
            if got != *expected {
                return Err(ChainError::CheckpointMismatch {
                    block_num,
                    expected: *expected,
                    got,
                });
            }
        }

        self.with_skip_flags(skip, |chain| chain.apply_block_inner(block))?;

        if !skip.contains(SkipFlags::VALIDATE_INVARIANTS) {
            self.validate_invariants()?;
        }
        Ok(())
    }

    fn apply_block_inner(&mut self, block: &SignedBlock) -> Result<(), ChainError> {
        let skip = self.skip_flags;
        let block_num = block.num();

        // Hardforks scheduled before the first block activate with it, and every genesis witness is taken
        // to run and vote for the resulting version.
        if block_num.int() == 1 {
            let scheduled = self.hardforks.scheduled_by(block.timestamp());
            if scheduled > self.store.singleton::<HardforkProperty>()?.last_hardfork {
                log::info!("Processing {} genesis hardforks", scheduled);
                self.set_hardfork(scheduled, true)?;
                self.adopt_genesis_hardfork(scheduled)?;
            }
        }

        if !skip.contains(SkipFlags::MERKLE_CHECK) {
            let merkle_root = block.calculate_merkle_root();
            if block.header.transaction_merkle_root != merkle_root
                && self.config.merkle_exceptions.get(&block_num) != Some(&merkle_root)
            {
                return Err(ChainError::MerkleMismatch { block_num });
            }
        }

        let witness_owner = self.validate_block_header(block)?;

        let size = block.size();
        let maximum_block_size = self.dynamic_global_properties()?.maximum_block_size as usize;
        if !skip.contains(SkipFlags::BLOCK_SIZE_CHECK) && size > maximum_block_size {
            return Err(ChainError::BlockTooLarge {
                size,
                max: maximum_block_size,
            });
        }
        if size < self.config.min_block_size as usize {
            log::warn!("Block {} is only {} bytes", block_num, size);
        }

        self.modify_dynamic_global_properties(|dgp| dgp.current_witness = witness_owner.clone())?;

        self.process_header_extensions(block)?;

        let witness = self.store.get::<Witness, WitnessByOwner>(&witness_owner)?;
        let required = self.store.singleton::<HardforkProperty>()?.current_hardfork_version;
        if witness.running_version < required {
            return Err(ChainError::WitnessVersionTooOld {
                witness: witness_owner,
                running: witness.running_version,
                required,
            });
        }

        self.current_block_num = block_num;
        for trx in &block.transactions {
            self.apply_transaction(trx)?;
        }
        self.current_trx_id = None;

        self.update_global_dynamic_data(block)?;
        self.update_signing_witness(block)?;
        self.update_last_irreversible_block()?;
        self.create_block_summary(block)?;
        self.clear_expired_transactions()?;
        update_witness_schedule(&mut self.store, &self.config)?;
        if !self.genesis.private_net {
            self.process_interests()?;
            self.update_median_feeds()?;
            self.clear_null_account_balance()?;
            self.process_funds()?;
            self.process_vesting_withdrawals()?;
        }
        self.account_recovery_processing()?;
        self.expire_escrow_ratification()?;
        self.process_hardforks()?;

        self.event_handlers
            .fire_handlers(Event::AppliedBlock(AppliedBlockEvent {
                timestamp: SystemTime::now(),
                block_id: block.id(),
                block: Arc::new(block.clone()),
            }));
        Ok(())
    }

    fn adopt_genesis_hardfork(&mut self, hardfork: u32) -> Result<(), ChainError> {
        let (version, time) = match (self.hardforks.version(hardfork), self.hardforks.time(hardfork)) {
            (Some(version), Some(time)) => (version, time),
            _ => return Ok(()),
        };
        let witnesses: Vec<ObjectId> = self.store.iter::<Witness>()?.map(|witness| witness.id()).collect();
        for id in witnesses {
            self.store.modify::<Witness, _>(id, |witness| {
                witness.running_version = version;
                witness.hardfork_version_vote = version;
                witness.hardfork_time_vote = time;
            })?;
        }
        Ok(())
    }

    /// Check that `block` builds on the head, is signed by its witness, and falls in that witness's slot.
    /// Returns the witness.
    fn validate_block_header(&self, block: &SignedBlock) -> Result<AccountName, ChainError> {
        let skip = self.skip_flags;
        let dgp = self.dynamic_global_properties()?;
        if block.previous() != dgp.head_block_id {
            return Err(ChainError::InvalidPrevious {
                expected: dgp.head_block_id,
                got: block.previous(),
            });
        }
        if block.timestamp() <= dgp.time {
            return Err(ChainError::InvalidTimestamp {
                head: dgp.time,
                got: block.timestamp(),
            });
        }

        let witness = self.store.get::<Witness, WitnessByOwner>(block.witness())?;
        if !skip.contains(SkipFlags::WITNESS_SIGNATURE) {
            match witness.signing_key {
                Some(signing_key) if block.validate_signee(&signing_key) => {}
                _ => {
                    return Err(ChainError::BadWitnessSignature {
                        witness: witness.owner.clone(),
                    })
                }
            }
        }

        if !skip.contains(SkipFlags::WITNESS_SCHEDULE_CHECK) {
            let slot = get_slot_at_time(&self.store, self.config.block_interval, block.timestamp())?;
            if slot == 0 {
                return Err(ChainError::NoSlot {
                    timestamp: block.timestamp(),
                });
            }
            let scheduled = get_scheduled_witness(&self.store, slot)?;
            if scheduled != witness.owner {
                return Err(ChainError::WrongWitness {
                    scheduled,
                    got: witness.owner.clone(),
                });
            }
        }
        Ok(witness.owner.clone())
    }

    /// Record the version the block's witness runs and its hardfork vote.
    fn process_header_extensions(&mut self, block: &SignedBlock) -> Result<(), ChainError> {
        for extension in &block.header.extensions {
            match extension {
                BlockHeaderExtension::Version(version) => {
                    let version = *version;
                    let witness = self.store.get::<Witness, WitnessByOwner>(block.witness())?;
                    if witness.running_version != version {
                        self.store.modify_by::<Witness, WitnessByOwner, _>(block.witness(), |witness| {
                            witness.running_version = version
                        })?;
                    }
                }
                BlockHeaderExtension::HardforkVersionVote { version, time } => {
                    let (version, time) = (*version, *time);
                    if version > self.config.blockchain_version {
                        return Err(ChainError::VersionAhead {
                            version,
                            running: self.config.blockchain_version,
                        });
                    }
                    let witness = self.store.get::<Witness, WitnessByOwner>(block.witness())?;
                    if witness.hardfork_version_vote != version || witness.hardfork_time_vote != time {
                        self.store.modify_by::<Witness, WitnessByOwner, _>(block.witness(), |witness| {
                            witness.hardfork_version_vote = version;
                            witness.hardfork_time_vote = time;
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply `trx` and notify the applied transaction handlers.
    pub(super) fn apply_transaction(&mut self, trx: &SignedTransaction) -> Result<(), ChainError> {
        self.apply_transaction_inner(trx)?;
        self.event_handlers
            .fire_handlers(Event::AppliedTransaction(AppliedTransactionEvent {
                timestamp: SystemTime::now(),
                trx_id: trx.id(),
                block_num: self.current_block_num,
            }));
        Ok(())
    }

    pub(super) fn apply_transaction_inner(&mut self, trx: &SignedTransaction) -> Result<(), ChainError> {
        let skip = self.skip_flags;
        let trx_id = trx.id();
        self.current_trx_id = Some(trx_id);

        if !skip.contains(SkipFlags::VALIDATE) {
            trx.validate()?;
        }

        let check_dupes = !skip.contains(SkipFlags::TRANSACTION_DUPE_CHECK);
        if check_dupes
            && self
                .store
                .find::<TransactionRecord, TransactionByTrxId>(&trx_id)?
                .is_some()
        {
            return Err(ChainError::DuplicateTransaction(trx_id));
        }

        if !skip.intersects(SkipFlags::TRANSACTION_SIGNATURES | SkipFlags::AUTHORITY_CHECK) {
            let store = &self.store;
            let authority_of = |account: &AccountName| {
                store
                    .find::<AccountAuthority, AuthorityByAccount>(account)
                    .ok()
                    .flatten()
            };
            trx.verify_authority(
                &self.config.chain_id,
                |account| authority_of(account).map(|authority| authority.active.clone()),
                |account| authority_of(account).map(|authority| authority.owner.clone()),
                MAX_SIG_CHECK_DEPTH,
            )?;
        }

        let dgp = self.dynamic_global_properties()?;
        let (head_num, now) = (dgp.head_block_number, dgp.time);
        if head_num.int() > 0 {
            if !skip.contains(SkipFlags::TAPOS_CHECK) {
                let summary = self
                    .store
                    .find::<BlockSummary, SummaryByRefNum>(&trx.ref_block_num)?;
                match summary {
                    Some(summary) if summary.block_id.ref_prefix() == trx.ref_block_prefix => {}
                    _ => {
                        return Err(ChainError::TaposMismatch {
                            ref_block_num: trx.ref_block_num,
                        })
                    }
                }
            }

            let max = now + self.config.max_time_until_expiration;
            if trx.expiration > max {
                return Err(ChainError::ExpirationTooFar {
                    max,
                    expiration: trx.expiration,
                });
            }
            if now >= trx.expiration {
                return Err(ChainError::TransactionExpired {
                    now,
                    expiration: trx.expiration,
                });
            }
        }

        if check_dupes {
            let expiration = trx.expiration;
            self.store.create::<TransactionRecord, _>(|record| {
                record.trx_id = trx_id;
                record.expiration = expiration;
            })?;
        }

        if self.event_handlers.wants_transaction_events() {
            self.event_handlers
                .fire_handlers(Event::PreApplyTransaction(PreApplyTransactionEvent {
                    timestamp: SystemTime::now(),
                    trx_id,
                    transaction: trx.clone(),
                }));
        }

        for (op_in_trx, op) in trx.operations.iter().enumerate() {
            self.current_op_in_trx = op_in_trx as u16;
            self.apply_operation(op)?;
        }
        self.current_trx_id = None;
        Ok(())
    }

    fn apply_operation(&mut self, op: &Operation) -> Result<(), ChainError> {
        let fee_payer = self.fee_payer_of(op)?;
        self.notify_operation(op, fee_payer.as_ref(), true);

        if let Some(payer) = &fee_payer {
            self.process_operation_fee(op, payer)?;
        }

        let dgp = self.dynamic_global_properties()?;
        let mut ctx = EvaluationContext {
            head_block_time: dgp.time,
            head_block_num: dgp.head_block_number,
            store: &mut self.store,
            is_producing: self.is_producing,
            custom_interpreters: &self.custom_interpreters,
        };
        self.evaluators.dispatch(&mut ctx, op)?;

        self.notify_operation(op, fee_payer.as_ref(), false);
        Ok(())
    }

    /// The account charged for `op`: the sponsor of the operation's fee payer if it has one, else the fee
    /// payer itself. Virtual operations are never charged.
    fn fee_payer_of(&self, op: &Operation) -> Result<Option<AccountName>, ChainError> {
        let payer = match op.fee_payer() {
            Some(payer) => payer,
            None => return Ok(None),
        };
        let sponsor = self
            .store
            .find::<FeeSponsor, SponsorBySponsored>(payer)?
            .map(|sponsorship| sponsorship.sponsor.clone());
        Ok(Some(sponsor.unwrap_or_else(|| payer.clone())))
    }

    fn process_operation_fee(&mut self, op: &Operation, payer: &AccountName) -> Result<(), ChainError> {
        if self.genesis.private_net {
            return Ok(());
        }
        let fee = self.config.operation_fee(op.tag());
        if fee == 0 {
            return Ok(());
        }
        self.pay_fee(payer, fee)
    }

    /// Move `fee` from `payer`'s balance out of the supply and into the fee pool.
    fn pay_fee(&mut self, payer: &AccountName, fee: i64) -> Result<(), ChainError> {
        let account = self.store.get::<Account, AccountByName>(payer)?;
        if account.balance.amount < fee {
            return Err(ChainError::InsufficientFee {
                payer: payer.clone(),
                fee,
                balance: account.balance.amount,
            });
        }
        let account_id = account.id();
        self.store
            .modify::<Account, _>(account_id, |account| account.balance.amount -= fee)?;
        self.modify_dynamic_global_properties(|dgp| dgp.current_supply.amount -= fee)?;
        self.modify_economic_model(|model| {
            model.fee_pool += fee;
            model.total_fees += fee;
        })
    }

    /// Notify the operation handlers of an operation the chain applies itself, such as a hardfork or a
    /// vesting withdrawal. Virtual operations have no transaction.
    pub(super) fn push_virtual_operation(&mut self, op: Operation) {
        let trx_id = self.current_trx_id.take();
        self.current_op_in_trx = 0;
        self.notify_operation(&op, None, true);
        self.notify_operation(&op, None, false);
        self.current_trx_id = trx_id;
    }

    fn notify_operation(&self, op: &Operation, fee_payer: Option<&AccountName>, pre: bool) {
        if !self.event_handlers.wants_operation_events() {
            return;
        }
        let context = OperationContext {
            trx_id: self.current_trx_id,
            block_num: self.current_block_num,
            op_in_trx: self.current_op_in_trx,
            fee_payer: fee_payer.cloned(),
        };
        let event = if pre {
            Event::PreApplyOperation(PreApplyOperationEvent {
                timestamp: SystemTime::now(),
                context,
                operation: op.clone(),
            })
        } else {
            Event::PostApplyOperation(PostApplyOperationEvent {
                timestamp: SystemTime::now(),
                context,
                operation: op.clone(),
            })
        };
        self.event_handlers.fire_handlers(event);
    }
}
