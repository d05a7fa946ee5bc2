/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors returned by the [chain](super::Chain) and how the pipeline treats each kind.

use std::fmt::{self, Display, Formatter};

use crate::block_log::BlockLogError;
use crate::config::ConfigurationError;
use crate::evaluator::EvaluatorError;
use crate::fork_db::ForkDbError;
use crate::hardfork::HardforkError;
use crate::state::pluggables::KVSetError;
use crate::state::StoreError;
use crate::types::authority::AuthorityError;
use crate::types::basic::{AccountName, BlockId, BlockNumber, Timestamp, TransactionId, Version};
use crate::types::operation::ValidationError;

/// How block assembly reacts to a failed transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The node cannot continue safely. Propagated to the caller.
    Fatal,
    /// The transaction may fit in a later block. Kept in the pending pool.
    Postponable,
    /// The transaction is invalid against the current state. Dropped.
    Skippable,
}

#[derive(Debug)]
pub enum ChainError {
    // Block structure.
    InvalidPrevious { expected: BlockId, got: BlockId },
    InvalidTimestamp { head: Timestamp, got: Timestamp },
    BadWitnessSignature { witness: AccountName },
    NoSlot { timestamp: Timestamp },
    WrongWitness { scheduled: AccountName, got: AccountName },
    WrongSigningKey { witness: AccountName },
    MerkleMismatch { block_num: BlockNumber },
    BlockTooLarge { size: usize, max: usize },
    CheckpointMismatch { block_num: BlockNumber, expected: BlockId, got: BlockId },
    WitnessVersionTooOld { witness: AccountName, running: Version, required: Version },
    VersionAhead { version: Version, running: Version },
    UndoHistoryExhausted { head: BlockNumber, last_irreversible: BlockNumber },
    ForkBelowIrreversible { ancestor: BlockNumber, last_irreversible: BlockNumber },
    NothingToPop,
    MissingIrreversibleBlock(BlockNumber),
    ForkDb(ForkDbError),

    // Transactions.
    DuplicateTransaction(TransactionId),
    Validation(ValidationError),
    Authority(AuthorityError),
    TaposMismatch { ref_block_num: u16 },
    TransactionExpired { now: Timestamp, expiration: Timestamp },
    ExpirationTooFar { max: Timestamp, expiration: Timestamp },
    TransactionTooLarge { size: usize, max: usize },
    /// The transaction does not fit in the remaining space of the block being assembled.
    BlockFull { size: usize, remaining: usize },
    Evaluator(EvaluatorError),

    /// The fee payer cannot cover an operation's fee.
    InsufficientFee { payer: AccountName, fee: i64, balance: i64 },

    // Resources and integrity.
    Configuration(ConfigurationError),
    Store(StoreError),
    BlockLog(BlockLogError),
    KVSet(KVSetError),
    Hardfork(HardforkError),
    StateMismatch { state_head: BlockNumber, log_head: BlockNumber },
    RevisionMismatch { revision: i64, head: BlockNumber },
    UnknownBlockNumber(BlockNumber),
    InvariantViolation(String),
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::BlockFull { .. } => ErrorClass::Postponable,

            ChainError::Store(err) | ChainError::Evaluator(EvaluatorError::Store(err)) => {
                match err {
                    StoreError::NotFound { .. } | StoreError::UniqueConstraint { .. } => {
                        ErrorClass::Skippable
                    }
                    _ => ErrorClass::Fatal,
                }
            }
            ChainError::Configuration(_)
            | ChainError::BlockLog(_)
            | ChainError::KVSet(_)
            | ChainError::Hardfork(_)
            | ChainError::StateMismatch { .. }
            | ChainError::RevisionMismatch { .. }
            | ChainError::InvariantViolation(_)
            | ChainError::UndoHistoryExhausted { .. }
            | ChainError::MissingIrreversibleBlock(_) => ErrorClass::Fatal,

            _ => ErrorClass::Skippable,
        }
    }
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::InvalidPrevious { expected, got } => write!(
                f,
                "block does not build on the head: previous is {}, head is {}",
                got, expected
            ),
            ChainError::InvalidTimestamp { head, got } => write!(
                f,
                "block timestamp {} is not after the head block time {}",
                got, head
            ),
            ChainError::BadWitnessSignature { witness } => {
                write!(f, "block is not signed by the signing key of {}", witness)
            }
            ChainError::NoSlot { timestamp } => {
                write!(f, "timestamp {} falls in the head block's slot", timestamp)
            }
            ChainError::WrongWitness { scheduled, got } => write!(
                f,
                "witness {} produced a block in a slot scheduled for {}",
                got, scheduled
            ),
            ChainError::WrongSigningKey { witness } => {
                write!(f, "the given key is not the signing key of {}", witness)
            }
            ChainError::MerkleMismatch { block_num } => {
                write!(f, "transaction merkle root of block {} does not match", block_num)
            }
            ChainError::BlockTooLarge { size, max } => {
                write!(f, "block of {} bytes exceeds the maximum of {}", size, max)
            }
            ChainError::CheckpointMismatch {
                block_num,
                expected,
                got,
            } => write!(
                f,
                "block {} is {}, but the checkpoint says {}",
                block_num, got, expected
            ),
            ChainError::WitnessVersionTooOld {
                witness,
                running,
                required,
            } => write!(
                f,
                "witness {} runs {}, older than the current hardfork version {}",
                witness, running, required
            ),
            ChainError::VersionAhead { version, running } => write!(
                f,
                "block signals version {}, ahead of this node's {}",
                version, running
            ),
            ChainError::UndoHistoryExhausted {
                head,
                last_irreversible,
            } => write!(
                f,
                "head {} is too far ahead of the last irreversible block {}",
                head, last_irreversible
            ),
            ChainError::ForkBelowIrreversible {
                ancestor,
                last_irreversible,
            } => write!(
                f,
                "fork diverges at block {}, below the last irreversible block {}",
                ancestor, last_irreversible
            ),
            ChainError::NothingToPop => write!(f, "no reversible block to pop"),
            ChainError::MissingIrreversibleBlock(num) => write!(
                f,
                "irreversible block {} is missing from the fork database",
                num
            ),
            ChainError::ForkDb(err) => Display::fmt(err, f),
            ChainError::DuplicateTransaction(id) => write!(f, "duplicate transaction {}", id),
            ChainError::Validation(err) => Display::fmt(err, f),
            ChainError::Authority(err) => Display::fmt(err, f),
            ChainError::TaposMismatch { ref_block_num } => write!(
                f,
                "transaction references an unknown block with reference number {}",
                ref_block_num
            ),
            ChainError::TransactionExpired { now, expiration } => {
                write!(f, "transaction expired at {}, now is {}", expiration, now)
            }
            ChainError::ExpirationTooFar { max, expiration } => write!(
                f,
                "transaction expiration {} is later than the maximum {}",
                expiration, max
            ),
            ChainError::TransactionTooLarge { size, max } => {
                write!(f, "transaction of {} bytes exceeds the maximum of {}", size, max)
            }
            ChainError::BlockFull { size, remaining } => write!(
                f,
                "transaction of {} bytes does not fit in the remaining {} bytes",
                size, remaining
            ),
            ChainError::Evaluator(err) => Display::fmt(err, f),
            ChainError::InsufficientFee { payer, fee, balance } => write!(
                f,
                "{} cannot pay a fee of {} with a balance of {}",
                payer, fee, balance
            ),
            ChainError::Configuration(err) => Display::fmt(err, f),
            ChainError::Store(err) => Display::fmt(err, f),
            ChainError::BlockLog(err) => Display::fmt(err, f),
            ChainError::KVSet(err) => Display::fmt(err, f),
            ChainError::Hardfork(err) => Display::fmt(err, f),
            ChainError::StateMismatch {
                state_head,
                log_head,
            } => write!(
                f,
                "state head {} does not match block log head {}, reindex required",
                state_head, log_head
            ),
            ChainError::RevisionMismatch { revision, head } => write!(
                f,
                "state store revision {} does not match head block {}",
                revision, head
            ),
            ChainError::UnknownBlockNumber(num) => write!(f, "no block {} on the main chain", num),
            ChainError::InvariantViolation(reason) => write!(f, "invariant violated: {}", reason),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<ConfigurationError> for ChainError {
    fn from(value: ConfigurationError) -> Self {
        ChainError::Configuration(value)
    }
}

impl From<StoreError> for ChainError {
    fn from(value: StoreError) -> Self {
        ChainError::Store(value)
    }
}

impl From<ForkDbError> for ChainError {
    fn from(value: ForkDbError) -> Self {
        match value {
            ForkDbError::NothingToPop => ChainError::NothingToPop,
            other => ChainError::ForkDb(other),
        }
    }
}

impl From<BlockLogError> for ChainError {
    fn from(value: BlockLogError) -> Self {
        ChainError::BlockLog(value)
    }
}

impl From<KVSetError> for ChainError {
    fn from(value: KVSetError) -> Self {
        ChainError::KVSet(value)
    }
}

impl From<HardforkError> for ChainError {
    fn from(value: HardforkError) -> Self {
        ChainError::Hardfork(value)
    }
}

impl From<EvaluatorError> for ChainError {
    fn from(value: EvaluatorError) -> Self {
        ChainError::Evaluator(value)
    }
}

impl From<AuthorityError> for ChainError {
    fn from(value: AuthorityError) -> Self {
        ChainError::Authority(value)
    }
}

impl From<ValidationError> for ChainError {
    fn from(value: ValidationError) -> Self {
        ChainError::Validation(value)
    }
}
