/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The records a chain starts with.

use super::ChainError;
use crate::config::{ConfigurationError, INIT_MINER_NAME, MINER_ACCOUNT, NULL_ACCOUNT, TEMP_ACCOUNT};
use crate::hardfork::HardforkVersions;
use crate::objects::{
    Account, AccountAuthority, DynamicGlobalProperties, EconomicModel, FeedHistory, HardforkProperty,
    Witness, WitnessSchedule,
};
use crate::state::{StateStore, StoreError};
use crate::types::authority::Authority;
use crate::types::basic::{AccountName, Asset, AssetSymbol, Price, Timestamp, Version};
use crate::types::crypto_primitives::PublicKeyBytes;
use crate::types::witness_properties::ChainProperties;

/// The initial state of a chain. Every node of a chain must open it with the same genesis.
#[derive(Clone, Debug)]
pub struct Genesis {
    /// The head block time before block 1. Block 1 falls in the slot one block interval later.
    pub genesis_time: Timestamp,
    /// The native asset supply, all of it held by the init witness.
    pub initial_supply: i64,
    /// The signing key, and owner and active key, of the init witness `initminer`.
    pub init_witness_key: PublicKeyBytes,
    /// Further witnesses scheduled from block 1, each with an empty account controlled by its key.
    pub extra_witnesses: Vec<(AccountName, PublicKeyBytes)>,
    pub maximum_block_size: u32,
    /// The quote assets witnesses publish exchange rates for.
    pub feed_symbols: Vec<AssetSymbol>,
    /// Apply every known hardfork at genesis instead of waiting for witness votes.
    pub private_net: bool,
}

impl Genesis {
    pub fn new(genesis_time: Timestamp, initial_supply: i64, init_witness_key: PublicKeyBytes) -> Genesis {
        Genesis {
            genesis_time,
            initial_supply,
            init_witness_key,
            extra_witnesses: Vec::new(),
            maximum_block_size: crate::config::DEFAULT_MAXIMUM_BLOCK_SIZE,
            feed_symbols: vec![AssetSymbol::USD],
            private_net: false,
        }
    }

    pub fn with_witness(mut self, name: AccountName, key: PublicKeyBytes) -> Genesis {
        self.extra_witnesses.push((name, key));
        self
    }

    /// The genesis witnesses in schedule order, the init witness first.
    pub fn witnesses(&self) -> Vec<(AccountName, PublicKeyBytes)> {
        let mut witnesses = vec![(AccountName::from(INIT_MINER_NAME), self.init_witness_key)];
        witnesses.extend(self.extra_witnesses.iter().cloned());
        witnesses
    }
}

/// Write the genesis records into an empty `store`. Mutations are permanent: no undo session may be open.
pub(crate) fn init_genesis(
    store: &mut StateStore,
    genesis: &Genesis,
    hardforks: &HardforkVersions,
    blockchain_version: Version,
) -> Result<(), ChainError> {
    if store.undo_depth() != 0 {
        return Err(StoreError::SessionsOpen.into());
    }
    let time = genesis.genesis_time;

    for system_account in [MINER_ACCOUNT, NULL_ACCOUNT, TEMP_ACCOUNT] {
        store.create::<Account, _>(|account| {
            account.name = AccountName::from(system_account);
            account.created = time;
        })?;
        store.create::<AccountAuthority, _>(|authority| {
            authority.account = AccountName::from(system_account);
            authority.owner = Authority::new(1);
            authority.active = Authority::new(1);
        })?;
    }

    let witnesses = genesis.witnesses();
    for (name, key) in &witnesses {
        let is_init_witness = name.as_str() == INIT_MINER_NAME;
        store.create::<Account, _>(|account| {
            account.name = name.clone();
            account.memo_key = *key;
            account.created = time;
            if is_init_witness {
                account.balance = Asset::native(genesis.initial_supply);
            }
        })?;
        store.create::<AccountAuthority, _>(|authority| {
            authority.account = name.clone();
            authority.owner = Authority::single_key(*key);
            authority.active = Authority::single_key(*key);
            authority.last_owner_update = time;
        })?;
        store.create::<Witness, _>(|witness| {
            witness.owner = name.clone();
            witness.created = time;
            witness.signing_key = Some(*key);
            witness.props = ChainProperties {
                maximum_block_size: genesis.maximum_block_size,
                ..ChainProperties::default()
            };
            witness.running_version = blockchain_version;
            witness.hardfork_time_vote = time;
        })?;
    }

    store.create::<DynamicGlobalProperties, _>(|dgp| {
        dgp.time = time;
        dgp.genesis_time = time;
        dgp.current_witness = AccountName::from(INIT_MINER_NAME);
        dgp.current_supply = Asset::native(genesis.initial_supply);
        dgp.maximum_block_size = genesis.maximum_block_size;
    })?;

    store.create::<EconomicModel, _>(|_| {})?;
    for symbol in &genesis.feed_symbols {
        store.create::<FeedHistory, _>(|feed| {
            feed.symbol = *symbol;
            feed.current_median_history = Price::default();
        })?;
    }

    let genesis_version = hardforks.version(0).unwrap_or_default();
    store.create::<HardforkProperty, _>(|hfp| {
        hfp.processed_hardforks = vec![time];
        hfp.last_hardfork = 0;
        hfp.current_hardfork_version = genesis_version;
        hfp.next_hardfork = genesis_version;
        hfp.next_hardfork_time = time;
    })?;

    let scheduled: Vec<AccountName> = witnesses.into_iter().map(|(name, _)| name).collect();
    let num_scheduled = u8::try_from(scheduled.len()).map_err(|_| {
        ConfigurationError::TooManyGenesisWitnesses {
            count: scheduled.len(),
            max: u8::MAX,
        }
    })?;
    store.create::<WitnessSchedule, _>(|schedule| {
        schedule.num_scheduled_witnesses = num_scheduled;
        schedule.next_shuffle_block_num = crate::types::basic::BlockNumber::new(num_scheduled as u32);
        schedule.current_shuffled_witnesses = scheduled;
        schedule.majority_version = blockchain_version;
    })?;

    Ok(())
}
