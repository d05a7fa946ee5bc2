/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Witness records and the votes accounts cast for them.

use borsh::{BorshDeserialize, BorshSerialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::basic::{AccountName, AssetSymbol, BlockNumber, Price, Timestamp, Version};
use crate::types::crypto_primitives::PublicKeyBytes;
use crate::types::witness_properties::ChainProperties;

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Witness {
    pub(crate) id: ObjectId,
    pub owner: AccountName,
    pub created: Timestamp,
    pub url: String,
    /// Sum of the vesting shares of the accounts voting for this witness.
    pub votes: i64,
    pub total_missed: u32,
    /// The absolute slot of the last block this witness produced.
    pub last_aslot: u64,
    pub last_confirmed_block_num: BlockNumber,
    /// `None` once the witness has shut down, by choice or for missing too many blocks. A witness without
    /// a signing key is never scheduled.
    pub signing_key: Option<PublicKeyBytes>,
    pub props: ChainProperties,
    pub exchange_rates: BTreeMap<AssetSymbol, Price>,
    pub last_exchange_update: Timestamp,
    pub running_version: Version,
    pub hardfork_version_vote: Version,
    pub hardfork_time_vote: Timestamp,
}

impl Object for Witness {
    const TABLE: u16 = 3;
    const TABLE_NAME: &'static str = "witness";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<Witness, WitnessByOwner>(),
            index::<Witness, WitnessByVotes>(),
        ]
    }
}

pub struct WitnessByOwner;

impl IndexSpec<Witness> for WitnessByOwner {
    type Key = AccountName;
    const UNIQUE: bool = true;

    fn key(witness: &Witness) -> AccountName {
        witness.owner.clone()
    }
}

/// Witnesses by votes, highest first, with ties broken by owner name.
pub struct WitnessByVotes;

impl IndexSpec<Witness> for WitnessByVotes {
    type Key = (Reverse<i64>, AccountName);
    const UNIQUE: bool = true;

    fn key(witness: &Witness) -> (Reverse<i64>, AccountName) {
        (Reverse(witness.votes), witness.owner.clone())
    }
}

/// A vote by `account` for `witness`.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WitnessVote {
    pub(crate) id: ObjectId,
    pub witness: AccountName,
    pub account: AccountName,
}

impl Object for WitnessVote {
    const TABLE: u16 = 4;
    const TABLE_NAME: &'static str = "witness_vote";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<WitnessVote, VoteByAccountWitness>(),
            index::<WitnessVote, VoteByWitnessAccount>(),
        ]
    }
}

pub struct VoteByAccountWitness;

impl IndexSpec<WitnessVote> for VoteByAccountWitness {
    type Key = (AccountName, AccountName);
    const UNIQUE: bool = true;

    fn key(vote: &WitnessVote) -> (AccountName, AccountName) {
        (vote.account.clone(), vote.witness.clone())
    }
}

pub struct VoteByWitnessAccount;

impl IndexSpec<WitnessVote> for VoteByWitnessAccount {
    type Key = (AccountName, AccountName);
    const UNIQUE: bool = true;

    fn key(vote: &WitnessVote) -> (AccountName, AccountName) {
        (vote.witness.clone(), vote.account.clone())
    }
}
