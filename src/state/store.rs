/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`StateStore`]: typed tables plus the undo log that makes every mutation reversible.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::ops::{Deref, DerefMut, RangeBounds};

use crate::config::StoragePolicy;
use crate::types::basic::borsh_bytes;
use crate::types::crypto_primitives::{CryptoHasher, Digest};

use super::pluggables::{KVGet, KVGetError, KVSetError, KVStore, StateWriteBatch};
use super::table::{AnyTable, IndexSpec, Object, ObjectId, Table, TableId};
use super::undo::UndoLog;

/// Versioned, in-memory storage for every ledger record.
///
/// Mutations made while at least one undo session is open are recorded in the undo log and can be
/// reverted in LIFO order. Mutations made with no open session are permanent.
pub struct StateStore {
    tables: BTreeMap<TableId, Box<dyn AnyTable>>,
    undo: UndoLog,
    capacity_bytes: u64,
    policy: StoragePolicy,
}

impl StateStore {
    /// Create an empty store with no tables, sized and grown according to `policy`. Register every record
    /// type before use.
    pub fn new(policy: StoragePolicy) -> StateStore {
        StateStore {
            tables: BTreeMap::new(),
            undo: UndoLog::default(),
            capacity_bytes: policy.initial_size_bytes.min(policy.max_size_bytes),
            policy,
        }
    }

    /// Add the table for `T`. Registering the same table twice is an error.
    pub fn register<T: Object>(&mut self) -> Result<(), StoreError> {
        if self.tables.contains_key(&T::TABLE) {
            return Err(StoreError::DuplicateTable(T::TABLE_NAME));
        }
        self.tables.insert(T::TABLE, Box::new(Table::<T>::new()));
        Ok(())
    }

    fn table<T: Object>(&self) -> Result<&Table<T>, StoreError> {
        self.tables
            .get(&T::TABLE)
            .and_then(|table| table.as_any().downcast_ref::<Table<T>>())
            .ok_or(StoreError::UnknownTable(T::TABLE_NAME))
    }

    fn table_mut<T: Object>(&mut self) -> Result<&mut Table<T>, StoreError> {
        self.tables
            .get_mut(&T::TABLE)
            .and_then(|table| table.as_any_mut().downcast_mut::<Table<T>>())
            .ok_or(StoreError::UnknownTable(T::TABLE_NAME))
    }
}

/// Record mutation.
impl StateStore {
    /// Create a record of type `T`. `builder` fills in a default-initialized record; the store assigns its id.
    pub fn create<T: Object, F: FnOnce(&mut T)>(&mut self, builder: F) -> Result<&T, StoreError> {
        let mut object = T::default();
        builder(&mut object);
        let size = borsh_bytes(&object).len() as u64;
        self.ensure_space(size)?;

        let table = self.table_mut::<T>()?;
        let id = table.next_id();
        table.insert(id, object)?;
        self.undo.record(T::TABLE, id, None);
        self.table::<T>()?
            .get(id)
            .ok_or(StoreError::NotFound { table: T::TABLE_NAME })
    }

    /// Apply `mutator` to the record `id` of type `T`. Fails, leaving the record unchanged, if the mutated
    /// record violates a unique index.
    pub fn modify<T: Object, F: FnOnce(&mut T)>(
        &mut self,
        id: ObjectId,
        mutator: F,
    ) -> Result<&T, StoreError> {
        let current = self.get_by_id::<T>(id)?;
        let current_size = borsh_bytes(current).len() as u64;
        let mut object = current.clone();
        mutator(&mut object);
        self.ensure_space((borsh_bytes(&object).len() as u64).saturating_sub(current_size))?;

        let previous = self.table_mut::<T>()?.replace(id, object)?;
        self.undo.record(T::TABLE, id, Some(borsh_bytes(&previous)));
        self.get_by_id::<T>(id)
    }

    /// Look up a record by a secondary index and apply `mutator` to it.
    pub fn modify_by<T: Object, I: IndexSpec<T>, F: FnOnce(&mut T)>(
        &mut self,
        key: &I::Key,
        mutator: F,
    ) -> Result<&T, StoreError> {
        let id = self.get::<T, I>(key)?.id();
        self.modify(id, mutator)
    }

    pub fn remove<T: Object>(&mut self, id: ObjectId) -> Result<T, StoreError> {
        let object = self.table_mut::<T>()?.remove(id)?;
        self.undo.record(T::TABLE, id, Some(borsh_bytes(&object)));
        Ok(object)
    }
}

/// Record lookup.
impl StateStore {
    pub fn get_by_id<T: Object>(&self, id: ObjectId) -> Result<&T, StoreError> {
        self.find_by_id(id)?
            .ok_or(StoreError::NotFound { table: T::TABLE_NAME })
    }

    pub fn find_by_id<T: Object>(&self, id: ObjectId) -> Result<Option<&T>, StoreError> {
        Ok(self.table::<T>()?.get(id))
    }

    /// Get the first record whose `I` key is `key`, or fail with [`StoreError::NotFound`].
    pub fn get<T: Object, I: IndexSpec<T>>(&self, key: &I::Key) -> Result<&T, StoreError> {
        self.find::<T, I>(key)?
            .ok_or(StoreError::NotFound { table: T::TABLE_NAME })
    }

    /// Get the first record whose `I` key is `key`, if any.
    pub fn find<T: Object, I: IndexSpec<T>>(&self, key: &I::Key) -> Result<Option<&T>, StoreError> {
        let table = self.table::<T>()?;
        Ok(table.index::<I>()?.first(key).and_then(|id| table.get(id)))
    }

    /// The record of a table holding exactly one record, such as the dynamic global properties.
    pub fn singleton<T: Object>(&self) -> Result<&T, StoreError> {
        self.get_by_id::<T>(ObjectId::MIN)
    }

    /// Every record of type `T` in id order.
    pub fn iter<T: Object>(&self) -> Result<impl Iterator<Item = &T>, StoreError> {
        Ok(self.table::<T>()?.iter())
    }

    /// Every record of type `T` in `I` key order.
    pub fn iter_by<T: Object, I: IndexSpec<T>>(
        &self,
    ) -> Result<impl Iterator<Item = &T>, StoreError> {
        self.range_by::<T, I, _>(..)
    }

    /// The records of type `T` whose `I` keys are in `range`, in key order.
    pub fn range_by<T: Object, I: IndexSpec<T>, R: RangeBounds<I::Key>>(
        &self,
        range: R,
    ) -> Result<impl Iterator<Item = &T>, StoreError> {
        let table = self.table::<T>()?;
        Ok(table
            .index::<I>()?
            .range(range)
            .filter_map(move |id| table.get(id)))
    }

    pub fn count<T: Object>(&self) -> Result<usize, StoreError> {
        Ok(self.table::<T>()?.len())
    }

    /// A hash over every record of every table. Two stores with the same content have the same hash.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = CryptoHasher::new();
        for table in self.tables.values() {
            table.hash_into(&mut hasher);
        }
        hasher.finalize().into()
    }
}

/// Undo sessions.
impl StateStore {
    /// Open a new reversible layer. The returned guard undoes the layer when dropped unless it is
    /// [pushed](UndoSession::push) or [squashed](UndoSession::squash).
    pub fn start_undo_session(&mut self) -> UndoSession<'_> {
        let revision = self.undo.start_session();
        UndoSession {
            store: self,
            revision,
            active: true,
        }
    }

    /// Open a new reversible layer identified by the returned revision. Callers that cannot hold an
    /// [`UndoSession`] guard close it explicitly with [`undo_session`](Self::undo_session),
    /// [`squash_session`](Self::squash_session), or leave it in place.
    pub fn begin_session(&mut self) -> i64 {
        self.undo.start_session()
    }

    /// Revert every change made in the innermost session, which must be `revision`.
    pub fn undo_session(&mut self, revision: i64) -> Result<(), StoreError> {
        let entries = self.undo.pop_session(revision)?;
        for entry in entries.into_iter().rev() {
            let table = self
                .tables
                .get_mut(&entry.table)
                .ok_or(StoreError::UnknownTableId(entry.table))?;
            table.restore(entry.id, entry.prior.as_deref())?;
        }
        Ok(())
    }

    /// Merge the innermost session, which must be `revision`, into its parent.
    pub fn squash_session(&mut self, revision: i64) -> Result<(), StoreError> {
        self.undo.squash(revision)
    }

    /// Whether the session `revision` can still be undone.
    pub fn has_session(&self, revision: i64) -> bool {
        self.undo.contains(revision)
    }

    /// Revert the innermost session.
    pub fn undo(&mut self) -> Result<(), StoreError> {
        let revision = self.undo.innermost().ok_or(StoreError::NoSession)?;
        self.undo_session(revision)
    }

    /// Revert every session that can still be reverted.
    pub fn undo_all(&mut self) -> Result<(), StoreError> {
        while self.undo.is_active() {
            self.undo()?;
        }
        Ok(())
    }

    /// Make every session with a revision at or below `revision` permanent.
    pub fn commit(&mut self, revision: i64) {
        self.undo.commit(revision)
    }

    pub fn revision(&self) -> i64 {
        self.undo.revision()
    }

    /// Set the revision. Only allowed while no session is open.
    pub fn set_revision(&mut self, revision: i64) -> Result<(), StoreError> {
        self.undo.set_revision(revision)
    }

    /// Number of sessions that can still be undone.
    pub fn undo_depth(&self) -> usize {
        self.undo.depth()
    }
}

/// Storage accounting.
impl StateStore {
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Approximate bytes used by all records.
    pub fn used_bytes(&self) -> u64 {
        self.tables.values().map(|table| table.size_bytes()).sum()
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes())
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    /// Make room for `additional` bytes, growing the capacity step by step up to the policy's ceiling.
    fn ensure_space(&mut self, additional: u64) -> Result<(), StoreError> {
        let needed = self.used_bytes() + additional;
        while needed > self.capacity_bytes {
            self.grow("a write did not fit")?;
        }
        Ok(())
    }

    /// Grow the capacity if free space has fallen below the policy's threshold. Returns the new capacity if
    /// it grew. Fails once the capacity is at the policy's hard ceiling.
    pub fn grow_if_needed(&mut self) -> Result<Option<u64>, StoreError> {
        let threshold = self.capacity_bytes / 100 * self.policy.free_space_threshold_percent as u64;
        if self.free_bytes() >= threshold {
            return Ok(None);
        }
        self.grow("free space fell below the threshold").map(Some)
    }

    fn grow(&mut self, reason: &str) -> Result<u64, StoreError> {
        if self.capacity_bytes >= self.policy.max_size_bytes {
            log::error!(
                "State storage is full at its ceiling of {} bytes",
                self.policy.max_size_bytes
            );
            return Err(StoreError::OutOfSpace {
                capacity: self.capacity_bytes,
            });
        }
        let grown = self
            .capacity_bytes
            .saturating_add(self.capacity_bytes / 100 * self.policy.growth_percent as u64);
        self.capacity_bytes = grown.clamp(self.capacity_bytes + 1, self.policy.max_size_bytes);
        log::warn!(
            "State storage grown to {} bytes: {}",
            self.capacity_bytes,
            reason
        );
        Ok(self.capacity_bytes)
    }
}

/// Persistence.
impl StateStore {
    /// Write every table, the revision, the capacity and the undo log to `kv_store` in one batch.
    pub fn flush<K: KVStore>(&self, kv_store: &mut K) -> Result<(), KVSetError> {
        let mut wb = StateWriteBatch::<K::WriteBatch>::new();
        for (table_id, table) in &self.tables {
            wb.set_table(*table_id, &table.snapshot())?;
        }
        wb.set_revision(self.undo.revision())?;
        wb.set_capacity(self.capacity_bytes)?;
        wb.set_undo_log(&self.undo)?;
        kv_store.write(wb.0);
        Ok(())
    }

    /// Replace the content of every registered table with what the last flush wrote to `kv_store`.
    /// Returns `false`, leaving the store untouched, if nothing was ever flushed.
    pub fn load<K: KVGet>(&mut self, kv_store: &K) -> Result<bool, StoreError> {
        if kv_store.revision()?.is_none() {
            return Ok(false);
        }
        for (table_id, table) in self.tables.iter_mut() {
            match kv_store.table(*table_id)? {
                Some(snapshot) => table.load(snapshot)?,
                None => table.clear(),
            }
        }
        self.undo = kv_store.undo_log()?;
        if let Some(capacity) = kv_store.capacity()? {
            self.capacity_bytes = self.capacity_bytes.max(capacity);
        }
        Ok(true)
    }

    /// Remove every record from every table and forget all undo history.
    pub fn wipe(&mut self) {
        for table in self.tables.values_mut() {
            table.clear();
        }
        self.undo = UndoLog::default();
    }
}

/// A reversible layer over the [`StateStore`]. Derefs to the store, so mutations made through the guard are
/// recorded in this session. Dropping the guard without calling [`push`](Self::push) or
/// [`squash`](Self::squash) undoes them.
pub struct UndoSession<'a> {
    store: &'a mut StateStore,
    revision: i64,
    active: bool,
}

impl<'a> UndoSession<'a> {
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Keep the session's changes. The session stays on the undo stack, so it can still be undone until it
    /// is committed.
    pub fn push(mut self) {
        self.active = false;
    }

    /// Merge the session's changes into the parent session.
    pub fn squash(mut self) -> Result<(), StoreError> {
        self.active = false;
        self.store.squash_session(self.revision)
    }

    /// Revert the session's changes now.
    pub fn undo(mut self) -> Result<(), StoreError> {
        self.active = false;
        self.store.undo_session(self.revision)
    }
}

impl<'a> Deref for UndoSession<'a> {
    type Target = StateStore;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl<'a> DerefMut for UndoSession<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.store
    }
}

impl<'a> Drop for UndoSession<'a> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.store.undo_session(self.revision) {
                log::error!("Failed to undo session {}: {}", self.revision, err);
            }
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    NotFound { table: &'static str },
    UniqueConstraint { table: &'static str, index: &'static str },
    UnknownTable(&'static str),
    UnknownTableId(TableId),
    UnknownIndex { table: &'static str, index: &'static str },
    DuplicateTable(&'static str),
    OutOfSpace { capacity: u64 },
    NoSession,
    SessionsOpen,
    SessionOutOfOrder { expected: i64, got: i64 },
    Deserialize { table: &'static str, source: std::io::Error },
    KVGetError(KVGetError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { table } => write!(f, "no such record in {}", table),
            StoreError::UniqueConstraint { table, index } => {
                write!(f, "unique index {} of {} violated", index, table)
            }
            StoreError::UnknownTable(table) => write!(f, "table {} is not registered", table),
            StoreError::UnknownTableId(table) => write!(f, "table {} is not registered", table),
            StoreError::UnknownIndex { table, index } => {
                write!(f, "table {} has no index {}", table, index)
            }
            StoreError::DuplicateTable(table) => write!(f, "table {} registered twice", table),
            StoreError::OutOfSpace { capacity } => {
                write!(f, "state storage exhausted at {} bytes", capacity)
            }
            StoreError::NoSession => write!(f, "no undo session is open"),
            StoreError::SessionsOpen => write!(f, "undo sessions are open"),
            StoreError::SessionOutOfOrder { expected, got } => write!(
                f,
                "session {} is not the innermost session {}",
                got, expected
            ),
            StoreError::Deserialize { table, source } => {
                write!(f, "failed to deserialize a record of {}: {}", table, source)
            }
            StoreError::KVGetError(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<KVGetError> for StoreError {
    fn from(value: KVGetError) -> Self {
        StoreError::KVGetError(value)
    }
}
