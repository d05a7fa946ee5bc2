/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use super::{Chain, ChainError};
use crate::objects::{Account, DynamicGlobalProperties, Escrow, Witness};
use crate::state::KVStore;
use crate::types::basic::AssetSymbol;

impl<K: KVStore> Chain<K> {
    /// Check that the native supply is fully accounted for by balances, escrows and the vesting fund,
    /// that vesting shares add up, and that no witness has more votes than there are vesting shares.
    pub fn validate_invariants(&self) -> Result<(), ChainError> {
        let dgp = self.store.singleton::<DynamicGlobalProperties>()?;

        let mut total_supply: i128 = dgp.total_vesting_fund.amount as i128;
        let mut total_vesting: i128 = 0;
        for account in self.store.iter::<Account>()? {
            total_supply += account.balance.amount as i128;
            total_vesting += account.vesting_shares.amount as i128;
        }
        for escrow in self.store.iter::<Escrow>()? {
            for asset in [escrow.balance, escrow.pending_fee] {
                if asset.symbol == AssetSymbol::NATIVE {
                    total_supply += asset.amount as i128;
                }
            }
        }

        if total_supply != dgp.current_supply.amount as i128 {
            return Err(ChainError::InvariantViolation(format!(
                "accounted native supply {} differs from the current supply {}",
                total_supply, dgp.current_supply
            )));
        }
        if total_vesting != dgp.total_vesting_shares.amount as i128 {
            return Err(ChainError::InvariantViolation(format!(
                "account vesting shares add up to {}, not {}",
                total_vesting, dgp.total_vesting_shares
            )));
        }
        for witness in self.store.iter::<Witness>()? {
            if witness.votes > dgp.total_vesting_shares.amount {
                return Err(ChainError::InvariantViolation(format!(
                    "witness {} has {} votes, more than the {} vesting shares",
                    witness.owner, witness.votes, dgp.total_vesting_shares
                )));
            }
        }
        Ok(())
    }
}
