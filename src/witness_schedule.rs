/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The witness schedule and the irreversibility watermark.
//!
//! ## Slots
//!
//! Time is divided into slots of `block_interval` seconds. Slot `n` is the `n`-th slot after the head
//! block's slot; slot 0 is the head block's own slot and never holds a new block. Every slot is assigned
//! to one witness of the current round, [`get_scheduled_witness`], whether or not that witness produces.
//!
//! ## Rounds
//!
//! At every round boundary (when the head block number is a multiple of the round size),
//! [`update_witness_schedule`] elects up to `max_witnesses` witnesses by votes, shuffles them with a
//! deterministic permutation seeded by the head block time, and tallies the versions they run and the
//! hardforks they vote for.
//!
//! ## Irreversibility
//!
//! Below `start_miner_voting_block`, the last irreversible block trails the head by a fixed margin of
//! `max_witnesses` blocks. From then on, it is the highest block confirmed by at least
//! `irreversible_threshold` (out of 10000) of the scheduled witnesses, where a witness confirms a block by
//! producing it or one of its descendants.

use std::collections::BTreeMap;

use crate::config::{Configuration, PERCENT_100};
use crate::objects::account::AccountByName;
use crate::objects::witness::{VoteByAccountWitness, WitnessByOwner, WitnessByVotes};
use crate::objects::{
    Account, DynamicGlobalProperties, HardforkProperty, Witness, WitnessSchedule, WitnessVote,
};
use crate::state::{Object, ObjectId, StateStore, StoreError};
use crate::types::basic::{AccountName, BlockNumber, Timestamp, Version};

/// The time of `slot`, counted from the head block. Slot 0 has no time and maps to [`Timestamp::ZERO`].
pub fn get_slot_time(
    store: &StateStore,
    block_interval: u32,
    slot: u32,
) -> Result<Timestamp, StoreError> {
    if slot == 0 {
        return Ok(Timestamp::ZERO);
    }
    let dgp = store.singleton::<DynamicGlobalProperties>()?;
    let offset = slot.saturating_mul(block_interval);

    // The first block is produced one interval after genesis.
    if dgp.head_block_number.int() == 0 {
        return Ok(dgp.time + offset);
    }

    let head_slot_time = dgp.time.secs() / block_interval * block_interval;
    Ok(Timestamp::new(head_slot_time) + offset)
}

/// The slot `when` falls in, counted from the head block. Returns 0 if `when` is not after the head block's
/// slot.
pub fn get_slot_at_time(
    store: &StateStore,
    block_interval: u32,
    when: Timestamp,
) -> Result<u32, StoreError> {
    let first_slot_time = get_slot_time(store, block_interval, 1)?;
    if when < first_slot_time {
        return Ok(0);
    }
    Ok((when - first_slot_time) as u32 / block_interval + 1)
}

/// The witness scheduled to produce the block in `slot`, counted from the head block.
pub fn get_scheduled_witness(store: &StateStore, slot: u32) -> Result<AccountName, StoreError> {
    let dgp = store.singleton::<DynamicGlobalProperties>()?;
    let schedule = store.singleton::<WitnessSchedule>()?;
    let num_scheduled = schedule.num_scheduled_witnesses as u64;
    if num_scheduled == 0 {
        return Err(StoreError::NotFound {
            table: WitnessSchedule::TABLE_NAME,
        });
    }
    let aslot = dgp.current_aslot + slot as u64;
    schedule
        .current_shuffled_witnesses
        .get((aslot % num_scheduled) as usize)
        .cloned()
        .ok_or(StoreError::NotFound {
            table: WitnessSchedule::TABLE_NAME,
        })
}

const SHUFFLE_MULTIPLIER: u64 = 2685821657736338717;

/// Permute `witnesses` with an xorshift generator seeded by `seed`. Every node computes the same order
/// from the same head block time.
pub fn shuffle_witnesses(witnesses: &mut [AccountName], seed: Timestamp) {
    let seed_hi = (seed.secs() as u64) << 32;
    let n = witnesses.len();
    for i in 0..n {
        let mut k = seed_hi.wrapping_add((i as u64).wrapping_mul(SHUFFLE_MULTIPLIER));
        k ^= k >> 12;
        k ^= k << 25;
        k ^= k >> 27;
        k = k.wrapping_mul(SHUFFLE_MULTIPLIER);

        let j = i + (k % (n - i) as u64) as usize;
        witnesses.swap(i, j);
    }
}

/// Elect and shuffle the next round's witnesses if the head block ends a round, and tally the versions
/// and hardfork votes of the new round.
pub fn update_witness_schedule(
    store: &mut StateStore,
    config: &Configuration,
) -> Result<(), StoreError> {
    let dgp = store.singleton::<DynamicGlobalProperties>()?;
    let (head_num, head_time) = (dgp.head_block_number, dgp.time);
    let schedule = store.singleton::<WitnessSchedule>()?;
    let schedule_id = schedule.id();
    let round_size = schedule.num_scheduled_witnesses.max(1) as u32;
    if head_num.int() % round_size != 0 {
        return Ok(());
    }

    let mut elected = Vec::new();
    let mut running_versions: BTreeMap<Version, u32> = BTreeMap::new();
    let mut hardfork_votes: BTreeMap<(Version, Timestamp), u32> = BTreeMap::new();
    for witness in store
        .iter_by::<Witness, WitnessByVotes>()?
        .filter(|witness| witness.signing_key.is_some())
        .take(config.max_witnesses as usize)
    {
        elected.push(witness.owner.clone());
        *running_versions.entry(witness.running_version).or_default() += 1;
        *hardfork_votes
            .entry((witness.hardfork_version_vote, witness.hardfork_time_vote))
            .or_default() += 1;
    }
    if elected.is_empty() {
        log::warn!("No witness has a signing key, keeping the current schedule");
        return Ok(());
    }

    let required = config.hardfork_required_witnesses as u32;

    // The highest version that at least `required` witnesses run or exceed.
    let mut majority_version = schedule.majority_version;
    let mut witnesses_on_version = 0;
    for (version, count) in running_versions.iter().rev() {
        witnesses_on_version += count;
        if witnesses_on_version >= required {
            majority_version = *version;
            break;
        }
    }

    let winning_vote = hardfork_votes
        .iter()
        .find(|(_, count)| **count >= required)
        .map(|(vote, _)| *vote);
    let hardfork_property = store.singleton::<HardforkProperty>()?;
    let hardfork_property_id = hardfork_property.id();
    match winning_vote {
        Some((version, time)) => {
            if hardfork_property.next_hardfork != version
                || hardfork_property.next_hardfork_time != time
            {
                store.modify::<HardforkProperty, _>(hardfork_property_id, |hfp| {
                    hfp.next_hardfork = version;
                    hfp.next_hardfork_time = time;
                })?;
            }
        }
        None => {
            store.modify::<HardforkProperty, _>(hardfork_property_id, |hfp| {
                hfp.next_hardfork = hfp.current_hardfork_version;
            })?;
        }
    }

    shuffle_witnesses(&mut elected, head_time);
    // At most `max_witnesses` were elected.
    let num_scheduled = u8::try_from(elected.len()).unwrap_or(config.max_witnesses);
    store.modify::<WitnessSchedule, _>(schedule_id, |schedule| {
        schedule.current_shuffled_witnesses = elected;
        schedule.num_scheduled_witnesses = num_scheduled;
        schedule.next_shuffle_block_num = head_num + num_scheduled as u32;
        schedule.majority_version = majority_version;
    })?;
    Ok(())
}

/// The last irreversible block given the current head and the confirmations of the scheduled witnesses.
/// Never lower than the current watermark.
pub fn compute_last_irreversible_block(
    store: &StateStore,
    config: &Configuration,
) -> Result<BlockNumber, StoreError> {
    let dgp = store.singleton::<DynamicGlobalProperties>()?;
    let head = dgp.head_block_number;
    let current = dgp.last_irreversible_block_num;

    if head < config.start_miner_voting_block {
        let margin = config.max_witnesses as u32;
        if head.int() > margin {
            return Ok(current.max(head.saturating_sub(margin)));
        }
        return Ok(current);
    }

    let schedule = store.singleton::<WitnessSchedule>()?;
    let mut confirmed = Vec::with_capacity(schedule.current_shuffled_witnesses.len());
    for owner in &schedule.current_shuffled_witnesses {
        confirmed.push(store.get::<Witness, WitnessByOwner>(owner)?.last_confirmed_block_num);
    }
    if confirmed.is_empty() {
        return Ok(current);
    }

    // With a threshold of 75%, the block at this position is confirmed by at least 75% of the witnesses.
    let offset = (PERCENT_100 - config.irreversible_threshold) as usize * confirmed.len()
        / PERCENT_100 as usize;
    let (_, candidate, _) = confirmed.select_nth_unstable(offset);
    Ok(current.max(*candidate))
}

/// Add `delta` to the votes of every witness `account` votes for.
pub fn adjust_witness_votes(
    store: &mut StateStore,
    account: &AccountName,
    delta: i64,
) -> Result<(), StoreError> {
    if delta == 0 {
        return Ok(());
    }
    let voted: Vec<AccountName> = store
        .range_by::<WitnessVote, VoteByAccountWitness, _>(
            (account.clone(), AccountName::default())..,
        )?
        .take_while(|vote| &vote.account == account)
        .map(|vote| vote.witness.clone())
        .collect();
    for witness in voted {
        store.modify_by::<Witness, WitnessByOwner, _>(&witness, |witness| witness.votes += delta)?;
    }
    Ok(())
}

/// Recompute every witness's votes from the recorded votes and the voters' current vesting shares.
pub fn retally_witness_votes(store: &mut StateStore) -> Result<(), StoreError> {
    let mut tally: BTreeMap<AccountName, i64> = BTreeMap::new();
    for vote in store.iter::<WitnessVote>()? {
        let account = store.get::<Account, AccountByName>(&vote.account)?;
        *tally.entry(vote.witness.clone()).or_default() += account.vesting_shares.amount;
    }

    let witnesses: Vec<(ObjectId, AccountName)> = store
        .iter::<Witness>()?
        .map(|witness| (witness.id(), witness.owner.clone()))
        .collect();
    for (id, owner) in witnesses {
        let votes = tally.get(&owner).copied().unwrap_or(0);
        store.modify::<Witness, _>(id, |witness| witness.votes = votes)?;
    }
    Ok(())
}
