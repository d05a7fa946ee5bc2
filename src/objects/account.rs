/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Account records and their authorities.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::authority::Authority;
use crate::types::basic::{AccountName, Asset, Timestamp};
use crate::types::crypto_primitives::PublicKeyBytes;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    pub(crate) id: ObjectId,
    pub name: AccountName,
    pub balance: Asset,
    pub vesting_shares: Asset,
    /// Vesting shares converted back to the native asset at each withdrawal.
    pub vesting_withdraw_rate: Asset,
    pub next_vesting_withdrawal: Timestamp,
    pub to_withdraw: i64,
    pub withdrawn: i64,
    pub recovery_account: AccountName,
    pub last_account_recovery: Timestamp,
    pub memo_key: PublicKeyBytes,
    pub witnesses_voted_for: u16,
    pub created: Timestamp,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            id: ObjectId::default(),
            name: AccountName::default(),
            balance: Asset::native(0),
            vesting_shares: Asset::vests(0),
            vesting_withdraw_rate: Asset::vests(0),
            next_vesting_withdrawal: Timestamp::MAX,
            to_withdraw: 0,
            withdrawn: 0,
            recovery_account: AccountName::default(),
            last_account_recovery: Timestamp::ZERO,
            memo_key: PublicKeyBytes::default(),
            witnesses_voted_for: 0,
            created: Timestamp::ZERO,
        }
    }
}

impl Object for Account {
    const TABLE: u16 = 0;
    const TABLE_NAME: &'static str = "account";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<Account, AccountByName>(),
            index::<Account, AccountByNextVestingWithdrawal>(),
        ]
    }
}

pub struct AccountByName;

impl IndexSpec<Account> for AccountByName {
    type Key = AccountName;
    const UNIQUE: bool = true;

    fn key(account: &Account) -> AccountName {
        account.name.clone()
    }
}

/// Accounts ordered by when their next vesting withdrawal is due. Accounts that are not withdrawing sort
/// last, at [`Timestamp::MAX`].
pub struct AccountByNextVestingWithdrawal;

impl IndexSpec<Account> for AccountByNextVestingWithdrawal {
    type Key = (Timestamp, AccountName);
    const UNIQUE: bool = true;

    fn key(account: &Account) -> (Timestamp, AccountName) {
        (account.next_vesting_withdrawal, account.name.clone())
    }
}

/// The owner and active authorities of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountAuthority {
    pub(crate) id: ObjectId,
    pub account: AccountName,
    pub owner: Authority,
    pub active: Authority,
    pub last_owner_update: Timestamp,
}

impl Object for AccountAuthority {
    const TABLE: u16 = 1;
    const TABLE_NAME: &'static str = "account_authority";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![index::<AccountAuthority, AuthorityByAccount>()]
    }
}

pub struct AuthorityByAccount;

impl IndexSpec<AccountAuthority> for AuthorityByAccount {
    type Key = AccountName;
    const UNIQUE: bool = true;

    fn key(authority: &AccountAuthority) -> AccountName {
        authority.account.clone()
    }
}

/// An owner authority that an account held until `last_valid_time`. Account recovery accepts proof of any
/// owner authority held within the recovery period.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OwnerAuthorityHistory {
    pub(crate) id: ObjectId,
    pub account: AccountName,
    pub previous_owner_authority: Authority,
    pub last_valid_time: Timestamp,
}

impl Object for OwnerAuthorityHistory {
    const TABLE: u16 = 2;
    const TABLE_NAME: &'static str = "owner_authority_history";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<OwnerAuthorityHistory, OwnerHistoryByAccount>(),
            index::<OwnerAuthorityHistory, OwnerHistoryByLastValidTime>(),
        ]
    }
}

pub struct OwnerHistoryByAccount;

impl IndexSpec<OwnerAuthorityHistory> for OwnerHistoryByAccount {
    type Key = AccountName;
    const UNIQUE: bool = false;

    fn key(history: &OwnerAuthorityHistory) -> AccountName {
        history.account.clone()
    }
}

pub struct OwnerHistoryByLastValidTime;

impl IndexSpec<OwnerAuthorityHistory> for OwnerHistoryByLastValidTime {
    type Key = Timestamp;
    const UNIQUE: bool = false;

    fn key(history: &OwnerAuthorityHistory) -> Timestamp {
        history.last_valid_time
    }
}
