/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use bitflags::bitflags;

bitflags! {
    /// Checks the pipeline may skip. Replaying trusted blocks and syncing up to a checkpoint skip most of
    /// them; a node applying blocks from the network skips none.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SkipFlags: u32 {
        const WITNESS_SIGNATURE = 1 << 0;
        const TRANSACTION_SIGNATURES = 1 << 1;
        /// Neither check nor record transaction ids.
        const TRANSACTION_DUPE_CHECK = 1 << 2;
        /// Apply blocks directly, without the fork database.
        const FORK_DB = 1 << 3;
        const BLOCK_SIZE_CHECK = 1 << 4;
        const TAPOS_CHECK = 1 << 5;
        const AUTHORITY_CHECK = 1 << 6;
        const MERKLE_CHECK = 1 << 7;
        const UNDO_HISTORY_CHECK = 1 << 8;
        const WITNESS_SCHEDULE_CHECK = 1 << 9;
        const VALIDATE = 1 << 10;
        const VALIDATE_INVARIANTS = 1 << 11;
        /// Do not move irreversible blocks to the block log.
        const BLOCK_LOG = 1 << 12;
    }
}

impl SkipFlags {
    /// The checks skipped while replaying the block log.
    pub const REPLAY: SkipFlags = SkipFlags::WITNESS_SIGNATURE
        .union(SkipFlags::TRANSACTION_SIGNATURES)
        .union(SkipFlags::TRANSACTION_DUPE_CHECK)
        .union(SkipFlags::TAPOS_CHECK)
        .union(SkipFlags::MERKLE_CHECK)
        .union(SkipFlags::WITNESS_SCHEDULE_CHECK)
        .union(SkipFlags::AUTHORITY_CHECK)
        .union(SkipFlags::VALIDATE)
        .union(SkipFlags::VALIDATE_INVARIANTS)
        .union(SkipFlags::BLOCK_LOG);

    /// The checks skipped for blocks at or below the last checkpoint. The merkle check stays on so that
    /// transactions are still bound to their headers.
    pub const CHECKPOINTED: SkipFlags = SkipFlags::WITNESS_SIGNATURE
        .union(SkipFlags::TRANSACTION_SIGNATURES)
        .union(SkipFlags::TRANSACTION_DUPE_CHECK)
        .union(SkipFlags::FORK_DB)
        .union(SkipFlags::BLOCK_SIZE_CHECK)
        .union(SkipFlags::TAPOS_CHECK)
        .union(SkipFlags::AUTHORITY_CHECK)
        .union(SkipFlags::UNDO_HISTORY_CHECK)
        .union(SkipFlags::WITNESS_SCHEDULE_CHECK)
        .union(SkipFlags::VALIDATE)
        .union(SkipFlags::VALIDATE_INVARIANTS);
}
