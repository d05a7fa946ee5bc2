/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Records that protect against transaction replay.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::basic::{BlockId, Timestamp, TransactionId};

/// Marks a transaction as applied until it expires. A transaction whose id has a record is a duplicate.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionRecord {
    pub(crate) id: ObjectId,
    pub trx_id: TransactionId,
    pub expiration: Timestamp,
}

impl Object for TransactionRecord {
    const TABLE: u16 = 8;
    const TABLE_NAME: &'static str = "transaction";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![
            index::<TransactionRecord, TransactionByTrxId>(),
            index::<TransactionRecord, TransactionByExpiration>(),
        ]
    }
}

pub struct TransactionByTrxId;

impl IndexSpec<TransactionRecord> for TransactionByTrxId {
    type Key = TransactionId;
    const UNIQUE: bool = true;

    fn key(record: &TransactionRecord) -> TransactionId {
        record.trx_id
    }
}

pub struct TransactionByExpiration;

impl IndexSpec<TransactionRecord> for TransactionByExpiration {
    type Key = Timestamp;
    const UNIQUE: bool = false;

    fn key(record: &TransactionRecord) -> Timestamp {
        record.expiration
    }
}

/// The id of the latest block whose number has the low 16 bits `ref_num`. Transactions reference blocks
/// through these records.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockSummary {
    pub(crate) id: ObjectId,
    pub ref_num: u16,
    pub block_id: BlockId,
}

impl Object for BlockSummary {
    const TABLE: u16 = 9;
    const TABLE_NAME: &'static str = "block_summary";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![index::<BlockSummary, SummaryByRefNum>()]
    }
}

pub struct SummaryByRefNum;

impl IndexSpec<BlockSummary> for SummaryByRefNum {
    type Key = u16;
    const UNIQUE: bool = true;

    fn key(summary: &BlockSummary) -> u16 {
        summary.ref_num
    }
}
