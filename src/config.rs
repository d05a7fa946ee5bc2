/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Protocol parameters and their defaults.
//!
//! [`Configuration`] gathers the parameters every node on a chain must agree on (block interval,
//! schedule size, irreversibility threshold, ...) together with a few node-local ones (checkpoints,
//! flush interval, storage policy, event logging). Build it with [`Configuration::builder`]:
//!
//! ```ignore
//! let configuration = Configuration::builder()
//!     .chain_id(ChainId::from_name("testnet"))
//!     .max_witnesses(21)
//!     .log_events(true)
//!     .build();
//! ```

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use typed_builder::TypedBuilder;

use crate::types::basic::{BlockId, BlockNumber, ChainId, Timestamp, Version};
use crate::types::operation::OperationTag;

pub const PERCENT_100: u32 = 10000;
pub const DEFAULT_BLOCK_INTERVAL: u32 = 3;
pub const BLOCKS_PER_DAY: u32 = 24 * 60 * 60 / DEFAULT_BLOCK_INTERVAL;
pub const DEFAULT_MAX_WITNESSES: u8 = 51;
pub const IRREVERSIBLE_THRESHOLD: u32 = 7500;
pub const MAX_UNDO_HISTORY: u32 = 10000;
pub const MAX_TIME_UNTIL_EXPIRATION: u32 = 60 * 60;
pub const MAX_TRANSACTION_SIZE: u32 = 8192;
pub const MIN_BLOCK_SIZE: u32 = 115;
pub const DEFAULT_MAXIMUM_BLOCK_SIZE: u32 = MAX_TRANSACTION_SIZE * DEFAULT_BLOCK_INTERVAL * 2048;
pub const FEED_HISTORY_WINDOW: u32 = 84;
pub const MAX_FEED_AGE: u32 = 7 * 24 * 60 * 60;
pub const MAX_SIG_CHECK_DEPTH: u32 = 2;
pub const ACCOUNT_RECOVERY_REQUEST_EXPIRATION_PERIOD: u32 = 24 * 60 * 60;
pub const OWNER_AUTH_RECOVERY_PERIOD: u32 = 30 * 24 * 60 * 60;
pub const VESTING_WITHDRAW_INTERVAL_SECONDS: u32 = 24 * 60 * 60;
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Accounts created at genesis that nobody controls.
pub const MINER_ACCOUNT: &str = "miners";
pub const NULL_ACCOUNT: &str = "none";
pub const TEMP_ACCOUNT: &str = "temp";
pub const INIT_MINER_NAME: &str = "initminer";

/// A hardfork the software knows how to apply, and the earliest time it may activate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardforkSpec {
    pub version: Version,
    pub time: Timestamp,
}

#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. Only `.chain_id(...)` is required; every other
    parameter defaults to the value in this module's constants."))]
pub struct Configuration {
    #[builder(setter(doc = "Set the id of the chain. Mixed into every transaction signature. Required."))]
    pub chain_id: ChainId,

    #[builder(default = DEFAULT_BLOCK_INTERVAL)]
    pub block_interval: u32,

    /// The size of a full witness round.
    #[builder(default = DEFAULT_MAX_WITNESSES)]
    pub max_witnesses: u8,

    /// Share of the scheduled witnesses, out of [`PERCENT_100`], that must confirm a block for it to become
    /// irreversible.
    #[builder(default = IRREVERSIBLE_THRESHOLD)]
    pub irreversible_threshold: u32,

    /// Below this height, the last irreversible block trails the head by a fixed margin instead.
    #[builder(default = BlockNumber::new(7 * BLOCKS_PER_DAY))]
    pub start_miner_voting_block: BlockNumber,

    /// The most blocks the head may be ahead of the last irreversible block.
    #[builder(default = MAX_UNDO_HISTORY)]
    pub max_undo_history: u32,

    #[builder(default = MAX_TIME_UNTIL_EXPIRATION)]
    pub max_time_until_expiration: u32,

    #[builder(default = MAX_TRANSACTION_SIZE)]
    pub max_transaction_size: u32,

    #[builder(default = MIN_BLOCK_SIZE)]
    pub min_block_size: u32,

    #[builder(default = BLOCKS_PER_DAY / 24)]
    pub feed_interval_blocks: u32,

    #[builder(default = FEED_HISTORY_WINDOW)]
    pub feed_history_window: u32,

    /// Exchange rates older than this, in seconds, are left out of the median.
    #[builder(default = MAX_FEED_AGE)]
    pub max_feed_age: u32,

    /// The fewest fresh exchange rates needed to compute a median.
    #[builder(default = DEFAULT_MAX_WITNESSES / 3)]
    pub min_feeds: u8,

    /// The number of scheduled witnesses that must run or vote for a version before it can activate.
    #[builder(default = 17)]
    pub hardfork_required_witnesses: u8,

    /// The version this node runs. Blocks voting for a later hardfork are rejected.
    #[builder(default = Version::new(0, 1, 0))]
    pub blockchain_version: Version,

    /// The hardforks this node knows, in order. Hardfork `n` is at position `n - 1`.
    #[builder(default)]
    pub hardfork_schedule: Vec<HardforkSpec>,

    /// Blocks known in advance to be part of the chain. Up to the last checkpoint, blocks are applied
    /// with most checks skipped.
    #[builder(default)]
    pub checkpoints: BTreeMap<BlockNumber, BlockId>,

    /// Blocks whose header carries a wrong merkle root, each with the root this node computes for it. Such a
    /// block is accepted despite the mismatch.
    #[builder(default)]
    pub merkle_exceptions: BTreeMap<BlockNumber, [u8; 32]>,

    /// Flush the state store after every this many blocks. Zero flushes only when asked to, and on close.
    #[builder(default = 0)]
    pub flush_interval_blocks: u32,

    #[builder(default)]
    pub storage: StoragePolicy,

    /// The native fee charged for each kind of operation, paid by the operation's fee payer or its
    /// sponsor. Operations not listed are free. Nothing is charged on a private network.
    #[builder(default)]
    pub operation_fees: BTreeMap<OperationTag, i64>,

    /// Yearly interest on liquid native balances, out of [`PERCENT_100`]. Zero disables interest.
    #[builder(default = 0)]
    pub interest_rate: u32,

    /// Accounts are paid interest in batches: account `id` is paid when the head block number equals `id`
    /// modulo this.
    #[builder(default = BLOCKS_PER_DAY)]
    pub interest_blocks: u32,

    #[builder(default = false, setter(doc = "Enable the default event loggers? Optional."))]
    pub log_events: bool,
}

impl Configuration {
    pub fn blocks_per_day(&self) -> u32 {
        24 * 60 * 60 / self.block_interval
    }

    /// The hardfork with the given number (1-based), if this node knows it.
    pub fn hardfork(&self, number: u32) -> Option<&HardforkSpec> {
        number
            .checked_sub(1)
            .and_then(|position| self.hardfork_schedule.get(position as usize))
    }

    /// The number of hardforks this node knows.
    pub fn num_hardforks(&self) -> u32 {
        self.hardfork_schedule.len() as u32
    }

    /// The fee charged for an operation with tag `tag`.
    pub fn operation_fee(&self, tag: OperationTag) -> i64 {
        self.operation_fees.get(&tag).copied().unwrap_or(0)
    }

    /// Reject parameter combinations the chain cannot run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.block_interval == 0 {
            return Err(ConfigurationError::ZeroBlockInterval);
        }
        if self.max_witnesses == 0 {
            return Err(ConfigurationError::ZeroMaxWitnesses);
        }
        if self.irreversible_threshold > PERCENT_100 {
            return Err(ConfigurationError::ThresholdAbove100Percent(self.irreversible_threshold));
        }
        if self.feed_history_window == 0 {
            return Err(ConfigurationError::ZeroFeedHistoryWindow);
        }
        if self.interest_rate > 0 && self.interest_blocks == 0 {
            return Err(ConfigurationError::ZeroInterestBlocks);
        }
        if let Some((tag, fee)) = self.operation_fees.iter().find(|(_, fee)| **fee < 0) {
            return Err(ConfigurationError::NegativeFee(*tag, *fee));
        }
        if self.storage.initial_size_bytes == 0 {
            return Err(ConfigurationError::ZeroStorage);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    ZeroBlockInterval,
    ZeroMaxWitnesses,
    ThresholdAbove100Percent(u32),
    ZeroFeedHistoryWindow,
    ZeroInterestBlocks,
    NegativeFee(OperationTag, i64),
    ZeroStorage,
    /// The genesis schedules more witnesses than fit in a round.
    TooManyGenesisWitnesses { count: usize, max: u8 },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ZeroBlockInterval => write!(f, "the block interval must be positive"),
            ConfigurationError::ZeroMaxWitnesses => write!(f, "a round needs at least one witness"),
            ConfigurationError::ThresholdAbove100Percent(threshold) => write!(
                f,
                "irreversible threshold {} is above {}",
                threshold, PERCENT_100
            ),
            ConfigurationError::ZeroFeedHistoryWindow => {
                write!(f, "the feed history window must hold at least one price")
            }
            ConfigurationError::ZeroInterestBlocks => {
                write!(f, "interest is enabled but paid every zero blocks")
            }
            ConfigurationError::NegativeFee(tag, fee) => {
                write!(f, "operation {} has a negative fee {}", tag, fee)
            }
            ConfigurationError::ZeroStorage => write!(f, "the initial state storage size must be positive"),
            ConfigurationError::TooManyGenesisWitnesses { count, max } => write!(
                f,
                "genesis has {} witnesses, more than the {} of a round",
                count, max
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// How the state store's capacity grows when it fills up.
#[derive(Clone, Debug, TypedBuilder)]
pub struct StoragePolicy {
    #[builder(default = 64 * 1024 * 1024)]
    pub initial_size_bytes: u64,

    /// Grow when free space falls below this share of the capacity, in percent.
    #[builder(default = 10)]
    pub free_space_threshold_percent: u8,

    /// Grow the capacity by this share of itself, in percent.
    #[builder(default = 50)]
    pub growth_percent: u8,

    /// Never grow beyond this.
    #[builder(default = 8 * 1024 * 1024 * 1024)]
    pub max_size_bytes: u64,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        StoragePolicy::builder().build()
    }
}
