/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Operation fees: the pool they are collected into, and the accounts that pay them for others.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::basic::AccountName;

/// The native fees collected and not yet paid out, and running totals of what flowed in and out. A
/// singleton, created at genesis.
///
/// Fees leave the current supply when they are charged, and re-enter it when they are paid out as
/// producer rewards.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EconomicModel {
    pub(crate) id: ObjectId,
    pub fee_pool: i64,
    pub total_fees: i64,
    pub total_producer_rewards: i64,
    pub total_interest: i64,
    /// Native tokens and vesting shares sent to the null account and destroyed.
    pub total_burned: i64,
}

impl Object for EconomicModel {
    const TABLE: u16 = 14;
    const TABLE_NAME: &'static str = "economic_model";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }
}

/// `sponsor` pays the operation fees of `sponsored`. An account has at most one sponsor.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeeSponsor {
    pub(crate) id: ObjectId,
    pub sponsor: AccountName,
    pub sponsored: AccountName,
}

impl Object for FeeSponsor {
    const TABLE: u16 = 15;
    const TABLE_NAME: &'static str = "fee_sponsor";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<FeeSponsor, SponsorBySponsored>(),
            index::<FeeSponsor, SponsorBySponsor>(),
        ]
    }
}

pub struct SponsorBySponsored;

impl IndexSpec<FeeSponsor> for SponsorBySponsored {
    type Key = AccountName;
    const UNIQUE: bool = true;

    fn key(sponsorship: &FeeSponsor) -> AccountName {
        sponsorship.sponsored.clone()
    }
}

pub struct SponsorBySponsor;

impl IndexSpec<FeeSponsor> for SponsorBySponsor {
    type Key = (AccountName, AccountName);
    const UNIQUE: bool = true;

    fn key(sponsorship: &FeeSponsor) -> (AccountName, AccountName) {
        (sponsorship.sponsor.clone(), sponsorship.sponsored.clone())
    }
}
