/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::basic::{AccountName, Asset, Timestamp};

/// Funds held by the chain on behalf of `from` until released by the parties or the `agent`.
///
/// `pending_fee` is paid to the agent once both `to` and the agent approve. If either does not approve
/// before the ratification deadline, the escrow is cancelled and `balance` plus `pending_fee` return to
/// `from`.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Escrow {
    pub(crate) id: ObjectId,
    pub escrow_id: u32,
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub ratification_deadline: Timestamp,
    pub escrow_expiration: Timestamp,
    pub balance: Asset,
    pub pending_fee: Asset,
    pub to_approved: bool,
    pub agent_approved: bool,
    pub disputed: bool,
}

impl Escrow {
    pub fn is_approved(&self) -> bool {
        self.to_approved && self.agent_approved
    }
}

impl Object for Escrow {
    const TABLE: u16 = 10;
    const TABLE_NAME: &'static str = "escrow";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<Escrow, EscrowByFromId>(),
            index::<Escrow, EscrowByRatificationDeadline>(),
        ]
    }
}

pub struct EscrowByFromId;

impl IndexSpec<Escrow> for EscrowByFromId {
    type Key = (AccountName, u32);
    const UNIQUE: bool = true;

    fn key(escrow: &Escrow) -> (AccountName, u32) {
        (escrow.from.clone(), escrow.escrow_id)
    }
}

/// Unapproved escrows first, each group ordered by ratification deadline.
pub struct EscrowByRatificationDeadline;

impl IndexSpec<Escrow> for EscrowByRatificationDeadline {
    type Key = (bool, Timestamp);
    const UNIQUE: bool = false;

    fn key(escrow: &Escrow) -> (bool, Timestamp) {
        (escrow.is_approved(), escrow.ratification_deadline)
    }
}
