/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each state store variable is stored in the user-provided key-value
//! store.
//!
//! |Variable|Key|Type|Description|
//! |---|---|---|---|
//! |Revision|`REVISION`|`i64`|Revision of the store at the time of the flush.|
//! |Capacity|`CAPACITY`|`u64`|The storage capacity in bytes, after any growth.|
//! |Tables|`TABLES ++ table id (u16, LE)`|[`TableSnapshot`](super::table::TableSnapshot)|Every record of one table, plus its next id.|
//! |Undo Log|`UNDO_LOG`|[`UndoLog`](super::undo::UndoLog)|The sessions that were still reversible at the time of the flush.|

pub const REVISION: [u8; 1] = [0];
pub const CAPACITY: [u8; 1] = [1];
pub const TABLES: [u8; 1] = [2];
pub const UNDO_LOG: [u8; 1] = [3];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and
/// then the bytes of the second one.
pub(crate) fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
