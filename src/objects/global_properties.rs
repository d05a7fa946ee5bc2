/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Singleton records describing the chain as a whole.
//!
//! Each table here holds exactly one record, with id 0, created at genesis.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{Object, ObjectId};
use crate::types::basic::{AccountName, Asset, BlockId, BlockNumber, Timestamp, Version};

/// The state that changes with every block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DynamicGlobalProperties {
    pub(crate) id: ObjectId,
    pub head_block_number: BlockNumber,
    pub head_block_id: BlockId,
    pub time: Timestamp,
    pub current_witness: AccountName,
    /// The number of slots since genesis, filled or not.
    pub current_aslot: u64,
    /// One bit per recent slot, the lowest bit being the latest. A set bit means the slot's block was
    /// produced. Starts empty at genesis.
    pub recent_slots_filled: u128,
    /// The number of set bits in `recent_slots_filled`.
    pub participation_count: u8,
    pub last_irreversible_block_num: BlockNumber,
    pub current_supply: Asset,
    /// The native asset backing all vesting shares.
    pub total_vesting_fund: Asset,
    pub total_vesting_shares: Asset,
    pub maximum_block_size: u32,
    pub genesis_time: Timestamp,
}

impl Default for DynamicGlobalProperties {
    fn default() -> Self {
        DynamicGlobalProperties {
            id: ObjectId::MIN,
            head_block_number: BlockNumber::new(0),
            head_block_id: BlockId::ZERO,
            time: Timestamp::ZERO,
            current_witness: AccountName::default(),
            current_aslot: 0,
            recent_slots_filled: 0,
            participation_count: 0,
            last_irreversible_block_num: BlockNumber::new(0),
            current_supply: Asset::native(0),
            total_vesting_fund: Asset::native(0),
            total_vesting_shares: Asset::vests(0),
            maximum_block_size: 0,
            genesis_time: Timestamp::ZERO,
        }
    }
}

impl Object for DynamicGlobalProperties {
    const TABLE: u16 = 5;
    const TABLE_NAME: &'static str = "dynamic_global_properties";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }
}

/// The producer rotation for the current round.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WitnessSchedule {
    pub(crate) id: ObjectId,
    pub current_shuffled_witnesses: Vec<AccountName>,
    pub num_scheduled_witnesses: u8,
    pub next_shuffle_block_num: BlockNumber,
    /// The highest version run by enough of the scheduled witnesses to activate a hardfork.
    pub majority_version: Version,
}

impl Object for WitnessSchedule {
    const TABLE: u16 = 6;
    const TABLE_NAME: &'static str = "witness_schedule";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }
}

/// Which hardforks have been applied and which one is pending.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HardforkProperty {
    pub(crate) id: ObjectId,
    /// The activation time of every applied hardfork, indexed by hardfork number. Hardfork 0 is genesis.
    pub processed_hardforks: Vec<Timestamp>,
    pub last_hardfork: u32,
    pub current_hardfork_version: Version,
    pub next_hardfork: Version,
    pub next_hardfork_time: Timestamp,
}

impl Object for HardforkProperty {
    const TABLE: u16 = 7;
    const TABLE_NAME: &'static str = "hardfork_property";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }
}
