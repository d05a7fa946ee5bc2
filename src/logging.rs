/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the chain's
//! [configuration](crate::config::Configuration::log_events).
//!
//! The chain logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
//! onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet is
//! how an [AppliedBlock](crate::events::AppliedBlockEvent) is printed:
//!
//! ```text
//! AppliedBlock, 1701329264, AAAABWc, 5, initminer, 0
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block's id.
//! - The fourth value is the block's number.
//! - The fifth value is the witness that produced the block.
//! - The sixth value is the number of transactions in the block.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const PRE_APPLY_OPERATION: &str = "PreApplyOperation";
pub const POST_APPLY_OPERATION: &str = "PostApplyOperation";
pub const APPLIED_BLOCK: &str = "AppliedBlock";
pub const PENDING_TRANSACTION: &str = "PendingTransaction";
pub const PRE_APPLY_TRANSACTION: &str = "PreApplyTransaction";
pub const APPLIED_TRANSACTION: &str = "AppliedTransaction";
pub const IRREVERSIBLE_BLOCK: &str = "IrreversibleBlock";
pub const SWITCH_FORK: &str = "SwitchFork";
pub const REINDEX_START: &str = "ReindexStart";
pub const REINDEX_DONE: &str = "ReindexDone";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync>;
}

impl Logger for PreApplyOperationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &PreApplyOperationEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}, {}, {}",
                PRE_APPLY_OPERATION,
                secs_since_unix_epoch(event.timestamp),
                trx_id_info(&event.context),
                event.context.block_num,
                event.context.op_in_trx,
                event.operation.tag(),
                event.context.fee_payer.as_ref().map_or("-", |payer| payer.as_str())
            )
        };
        Box::new(logger)
    }
}

impl Logger for PostApplyOperationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &PostApplyOperationEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}, {}",
                POST_APPLY_OPERATION,
                secs_since_unix_epoch(event.timestamp),
                trx_id_info(&event.context),
                event.context.block_num,
                event.context.op_in_trx,
                event.operation.tag()
            )
        };
        Box::new(logger)
    }
}

impl Logger for AppliedBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &AppliedBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                APPLIED_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_id.bytes()),
                event.block.num(),
                event.block.witness(),
                event.block.transactions.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for PendingTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &PendingTransactionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PENDING_TRANSACTION,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.trx_id.bytes()),
                event.transaction.operations.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for PreApplyTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &PreApplyTransactionEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                PRE_APPLY_TRANSACTION,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.trx_id.bytes()),
                event.transaction.expiration
            )
        };
        Box::new(logger)
    }
}

impl Logger for AppliedTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &AppliedTransactionEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                APPLIED_TRANSACTION,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.trx_id.bytes()),
                event.block_num
            )
        };
        Box::new(logger)
    }
}

impl Logger for IrreversibleBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &IrreversibleBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                IRREVERSIBLE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_id.bytes()),
                event.block_num,
                event.witness
            )
        };
        Box::new(logger)
    }
}

impl Logger for SwitchForkEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &SwitchForkEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SWITCH_FORK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.old_head.bytes()),
                first_seven_base64_chars(&event.new_head.bytes()),
                first_seven_base64_chars(&event.common_ancestor.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReindexStartEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &ReindexStartEvent| {
            log::info!(
                "{}, {}, {}",
                REINDEX_START,
                secs_since_unix_epoch(event.timestamp),
                event.target_block_number
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReindexDoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |event: &ReindexDoneEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REINDEX_DONE,
                secs_since_unix_epoch(event.timestamp),
                event.success,
                event.last_block_number
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

// Virtual operations are applied outside of any transaction.
fn trx_id_info(context: &OperationContext) -> String {
    match &context.trx_id {
        Some(trx_id) => first_seven_base64_chars(&trx_id.bytes()),
        None => String::from("virtual"),
    }
}
