/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pending account recovery requests and recovery account changes.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::authority::Authority;
use crate::types::basic::{AccountName, Timestamp};

/// A request by an account's recovery account to reset its owner authority. Removed when it expires.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountRecoveryRequest {
    pub(crate) id: ObjectId,
    pub account_to_recover: AccountName,
    pub new_owner_authority: Authority,
    pub expires: Timestamp,
}

impl Object for AccountRecoveryRequest {
    const TABLE: u16 = 11;
    const TABLE_NAME: &'static str = "account_recovery_request";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<AccountRecoveryRequest, RecoveryRequestByAccount>(),
            index::<AccountRecoveryRequest, RecoveryRequestByExpiration>(),
        ]
    }
}

pub struct RecoveryRequestByAccount;

impl IndexSpec<AccountRecoveryRequest> for RecoveryRequestByAccount {
    type Key = AccountName;
    const UNIQUE: bool = true;

    fn key(request: &AccountRecoveryRequest) -> AccountName {
        request.account_to_recover.clone()
    }
}

pub struct RecoveryRequestByExpiration;

impl IndexSpec<AccountRecoveryRequest> for RecoveryRequestByExpiration {
    type Key = Timestamp;
    const UNIQUE: bool = false;

    fn key(request: &AccountRecoveryRequest) -> Timestamp {
        request.expires
    }
}

/// A change of recovery account that takes effect at `effective_on`.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChangeRecoveryAccountRequest {
    pub(crate) id: ObjectId,
    pub account_to_recover: AccountName,
    pub recovery_account: AccountName,
    pub effective_on: Timestamp,
}

impl Object for ChangeRecoveryAccountRequest {
    const TABLE: u16 = 12;
    const TABLE_NAME: &'static str = "change_recovery_account_request";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<ChangeRecoveryAccountRequest, ChangeRecoveryByAccount>(),
            index::<ChangeRecoveryAccountRequest, ChangeRecoveryByEffectiveDate>(),
        ]
    }
}

pub struct ChangeRecoveryByAccount;

impl IndexSpec<ChangeRecoveryAccountRequest> for ChangeRecoveryByAccount {
    type Key = AccountName;
    const UNIQUE: bool = true;

    fn key(request: &ChangeRecoveryAccountRequest) -> AccountName {
        request.account_to_recover.clone()
    }
}

pub struct ChangeRecoveryByEffectiveDate;

impl IndexSpec<ChangeRecoveryAccountRequest> for ChangeRecoveryByEffectiveDate {
    type Key = Timestamp;
    const UNIQUE: bool = false;

    fn key(request: &ChangeRecoveryAccountRequest) -> Timestamp {
        request.effective_on
    }
}
