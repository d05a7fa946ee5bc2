/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ledger records kept in the [state store](crate::state).
//!
//! |Table|Record|Secondary indexes|
//! |---|---|---|
//! |0|[`Account`]|name (unique), next vesting withdrawal|
//! |1|[`AccountAuthority`]|account (unique)|
//! |2|[`OwnerAuthorityHistory`]|account, last valid time|
//! |3|[`Witness`]|owner (unique), votes|
//! |4|[`WitnessVote`]|(account, witness), (witness, account)|
//! |5|[`DynamicGlobalProperties`]|singleton|
//! |6|[`WitnessSchedule`]|singleton|
//! |7|[`HardforkProperty`]|singleton|
//! |8|[`TransactionRecord`]|transaction id (unique), expiration|
//! |9|[`BlockSummary`]|reference number (unique)|
//! |10|[`Escrow`]|(from, escrow id) (unique), (approved, ratification deadline)|
//! |11|[`AccountRecoveryRequest`]|account (unique), expiration|
//! |12|[`ChangeRecoveryAccountRequest`]|account (unique), effective date|
//! |13|[`FeedHistory`]|symbol (unique)|
//! |14|[`EconomicModel`]|singleton|
//! |15|[`FeeSponsor`]|sponsored (unique), (sponsor, sponsored) (unique)|

pub mod account;
pub mod economics;
pub mod escrow;
pub mod feed;
pub mod global_properties;
pub mod recovery;
pub mod transaction;
pub mod witness;

pub use account::{Account, AccountAuthority, OwnerAuthorityHistory};
pub use economics::{EconomicModel, FeeSponsor};
pub use escrow::Escrow;
pub use feed::FeedHistory;
pub use global_properties::{DynamicGlobalProperties, HardforkProperty, WitnessSchedule};
pub use recovery::{AccountRecoveryRequest, ChangeRecoveryAccountRequest};
pub use transaction::{BlockSummary, TransactionRecord};
pub use witness::{Witness, WitnessVote};

use crate::state::{StateStore, StoreError};

/// Register a table for every ledger record type in `store`.
pub fn register_all(store: &mut StateStore) -> Result<(), StoreError> {
    store.register::<Account>()?;
    store.register::<AccountAuthority>()?;
    store.register::<OwnerAuthorityHistory>()?;
    store.register::<Witness>()?;
    store.register::<WitnessVote>()?;
    store.register::<DynamicGlobalProperties>()?;
    store.register::<WitnessSchedule>()?;
    store.register::<HardforkProperty>()?;
    store.register::<TransactionRecord>()?;
    store.register::<BlockSummary>()?;
    store.register::<Escrow>()?;
    store.register::<AccountRecoveryRequest>()?;
    store.register::<ChangeRecoveryAccountRequest>()?;
    store.register::<FeedHistory>()?;
    store.register::<EconomicModel>()?;
    store.register::<FeeSponsor>()?;
    Ok(())
}
