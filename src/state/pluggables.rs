/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of the state store.
//!
//! The state store lives in memory and is written out by [flushes](super::store::StateStore::flush). A
//! flush writes every [variable](super::variables) in one [`WriteBatch`], so that a crash leaves either
//! the previous flush or the new one in the user's key-value store, never a mixture.

use std::fmt::Display;

use borsh::{BorshDeserialize, BorshSerialize};

use super::table::{TableId, TableSnapshot};
use super::undo::UndoLog;
use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn revision(&self) -> Result<Option<i64>, KVGetError> {
        get_value(self, &variables::REVISION, Key::Revision)
    }

    fn capacity(&self) -> Result<Option<u64>, KVGetError> {
        get_value(self, &variables::CAPACITY, Key::Capacity)
    }

    fn table(&self, table: TableId) -> Result<Option<TableSnapshot>, KVGetError> {
        get_value(
            self,
            &concat(&variables::TABLES, &table.to_le_bytes()),
            Key::Table { table },
        )
    }

    fn undo_log(&self) -> Result<UndoLog, KVGetError> {
        get_value(self, &variables::UNDO_LOG, Key::UndoLog)?.ok_or(
            KVGetError::ValueExpectedButNotFound {
                key: Key::UndoLog,
            },
        )
    }
}

fn get_value<G: KVGet + ?Sized, T: BorshDeserialize>(
    kv: &G,
    key_bytes: &[u8],
    key: Key,
) -> Result<Option<T>, KVGetError> {
    match kv.get(key_bytes) {
        Some(bytes) => Ok(Some(T::deserialize(&mut bytes.as_slice()).map_err(
            |err| KVGetError::DeserializeValueError { key, source: err },
        )?)),
        None => Ok(None),
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// A [`WriteBatch`] wrapper with typed setters for the state store's variables.
pub(crate) struct StateWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> StateWriteBatch<W> {
    pub(crate) fn new() -> StateWriteBatch<W> {
        StateWriteBatch(W::new())
    }

    pub(crate) fn set_revision(&mut self, revision: i64) -> Result<(), KVSetError> {
        self.set(&variables::REVISION, &revision, Key::Revision)
    }

    pub(crate) fn set_capacity(&mut self, capacity: u64) -> Result<(), KVSetError> {
        self.set(&variables::CAPACITY, &capacity, Key::Capacity)
    }

    pub(crate) fn set_table(
        &mut self,
        table: TableId,
        snapshot: &TableSnapshot,
    ) -> Result<(), KVSetError> {
        self.set(
            &concat(&variables::TABLES, &table.to_le_bytes()),
            snapshot,
            Key::Table { table },
        )
    }

    pub(crate) fn set_undo_log(&mut self, undo_log: &UndoLog) -> Result<(), KVSetError> {
        self.set(&variables::UNDO_LOG, undo_log, Key::UndoLog)
    }

    fn set<T: BorshSerialize>(&mut self, key_bytes: &[u8], value: &T, key: Key) -> Result<(), KVSetError> {
        let bytes = value
            .try_to_vec()
            .map_err(|err| KVSetError::SerializeValueError { key, source: err })?;
        self.0.set(key_bytes, &bytes);
        Ok(())
    }
}

/// Error when trying to read a value corresponding to a given key from the key-value store.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize value of {}: {}", key, source)
            }
            KVGetError::ValueExpectedButNotFound { key } => {
                write!(f, "expected a value for {} but found none", key)
            }
        }
    }
}

impl std::error::Error for KVGetError {}

/// Error when trying to serialize a value to be written to the key-value store.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

impl Display for KVSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize value of {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for KVSetError {}

/// The state store variables, for error reporting.
#[derive(Debug)]
pub enum Key {
    Revision,
    Capacity,
    Table { table: TableId },
    UndoLog,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Revision => write!(f, "Revision"),
            Key::Capacity => write!(f, "Capacity"),
            Key::Table { table } => write!(f, "Table {}", table),
            Key::UndoLog => write!(f, "Undo Log"),
        }
    }
}
