/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed tables of ledger records and their secondary indexes.
//!
//! Every record type implements [`Object`], which fixes the table it lives in and the secondary indexes
//! the table maintains. A secondary index is a zero-sized type implementing [`IndexSpec`]: it extracts an
//! ordered key from a record and says whether the key is unique. The table keeps each index as an ordered
//! set of `(key, object id)` pairs, so non-unique indexes iterate in key order and then in id order.

use borsh::{BorshDeserialize, BorshSerialize};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};

use crate::types::basic::borsh_bytes;
use crate::types::crypto_primitives::{CryptoHasher, Digest};

use super::store::StoreError;

/// Identifies a table in the state store and in persisted snapshots. Never reuse a retired id.
pub type TableId = u16;

/// The id of a record within its table. Ids are allocated sequentially from 0.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const MIN: ObjectId = ObjectId(0);
    pub const MAX: ObjectId = ObjectId(u64::MAX);

    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A record type stored in its own table of the [state store](super::store::StateStore).
pub trait Object: BorshSerialize + BorshDeserialize + Clone + Default + Send + Sync + 'static {
    const TABLE: TableId;
    const TABLE_NAME: &'static str;

    fn id(&self) -> ObjectId;

    fn set_id(&mut self, id: ObjectId);

    /// The secondary indexes the table maintains for this type. Build each with [`index`].
    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        Vec::new()
    }
}

/// A secondary index over records of type `T`.
pub trait IndexSpec<T>: 'static {
    type Key: Ord + Clone + Send + Sync + 'static;

    /// Whether at most one record may have any given key.
    const UNIQUE: bool;

    fn key(object: &T) -> Self::Key;
}

/// Build the secondary index `I` for [`Object::indexes`].
pub fn index<T: Object, I: IndexSpec<T>>() -> Box<dyn AnyIndex<T>> {
    Box::new(OrderedIndex::<T, I> {
        entries: BTreeSet::new(),
        _object: PhantomData,
    })
}

/// A type-erased secondary index, stored by its [`Table`].
pub trait AnyIndex<T>: Send + Sync {
    fn index_type(&self) -> TypeId;

    fn name(&self) -> &'static str;

    /// Whether inserting `object` would violate a unique key held by a record with a different id.
    fn conflicts(&self, object: &T, id: ObjectId) -> bool;

    fn insert(&mut self, object: &T, id: ObjectId);

    fn remove(&mut self, object: &T, id: ObjectId);

    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct OrderedIndex<T, I: IndexSpec<T>> {
    entries: BTreeSet<(I::Key, ObjectId)>,
    _object: PhantomData<fn(&T)>,
}

impl<T, I: IndexSpec<T>> OrderedIndex<T, I> {
    pub(crate) fn first(&self, key: &I::Key) -> Option<ObjectId> {
        self.range(key.clone()..=key.clone()).next()
    }

    /// Ids in key order over the keys within `range`.
    pub(crate) fn range<R: RangeBounds<I::Key>>(&self, range: R) -> impl Iterator<Item = ObjectId> + '_ {
        let start = match range.start_bound() {
            Bound::Included(key) => Bound::Included((key.clone(), ObjectId::MIN)),
            Bound::Excluded(key) => Bound::Excluded((key.clone(), ObjectId::MAX)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = match range.end_bound() {
            Bound::Included(key) => Bound::Included((key.clone(), ObjectId::MAX)),
            Bound::Excluded(key) => Bound::Excluded((key.clone(), ObjectId::MIN)),
            Bound::Unbounded => Bound::Unbounded,
        };
        self.entries.range((start, end)).map(|(_, id)| *id)
    }
}

impl<T: 'static, I: IndexSpec<T>> AnyIndex<T> for OrderedIndex<T, I> {
    fn index_type(&self) -> TypeId {
        TypeId::of::<I>()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<I>()
    }

    fn conflicts(&self, object: &T, id: ObjectId) -> bool {
        I::UNIQUE
            && self
                .first(&I::key(object))
                .map_or(false, |existing| existing != id)
    }

    fn insert(&mut self, object: &T, id: ObjectId) {
        self.entries.insert((I::key(object), id));
    }

    fn remove(&mut self, object: &T, id: ObjectId) {
        self.entries.remove(&(I::key(object), id));
    }

    fn clear(&mut self) {
        self.entries.clear()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Borsh form of a whole table, as written by a flush.
#[derive(BorshSerialize, BorshDeserialize, Default)]
pub struct TableSnapshot {
    pub(crate) next_id: u64,
    pub(crate) objects: Vec<Vec<u8>>,
}

/// Records of one type, keyed by id, with their secondary indexes.
pub(crate) struct Table<T: Object> {
    next_id: u64,
    objects: BTreeMap<ObjectId, T>,
    indexes: Vec<Box<dyn AnyIndex<T>>>,
    size_bytes: u64,
}

impl<T: Object> Table<T> {
    pub(crate) fn new() -> Table<T> {
        Table {
            next_id: 0,
            objects: BTreeMap::new(),
            indexes: T::indexes(),
            size_bytes: 0,
        }
    }

    pub(crate) fn next_id(&self) -> ObjectId {
        ObjectId::new(self.next_id)
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<&T> {
        self.objects.get(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.objects.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn index<I: IndexSpec<T>>(&self) -> Result<&OrderedIndex<T, I>, StoreError> {
        self.indexes
            .iter()
            .find(|index| index.index_type() == TypeId::of::<I>())
            .and_then(|index| index.as_any().downcast_ref::<OrderedIndex<T, I>>())
            .ok_or(StoreError::UnknownIndex {
                table: T::TABLE_NAME,
                index: std::any::type_name::<I>(),
            })
    }

    fn check_unique(&self, object: &T, id: ObjectId) -> Result<(), StoreError> {
        match self.indexes.iter().find(|index| index.conflicts(object, id)) {
            Some(index) => Err(StoreError::UniqueConstraint {
                table: T::TABLE_NAME,
                index: index.name(),
            }),
            None => Ok(()),
        }
    }

    /// Insert `object` under `id`, which must not be in use. Returns the object's serialized size.
    pub(crate) fn insert(&mut self, id: ObjectId, mut object: T) -> Result<u64, StoreError> {
        object.set_id(id);
        self.check_unique(&object, id)?;
        let size = borsh_bytes(&object).len() as u64;
        for index in self.indexes.iter_mut() {
            index.insert(&object, id);
        }
        self.objects.insert(id, object);
        self.size_bytes += size;
        if id.int() >= self.next_id {
            self.next_id = id.int() + 1;
        }
        Ok(size)
    }

    /// Replace the object stored under `id` with `object`. Returns the previous object.
    pub(crate) fn replace(&mut self, id: ObjectId, mut object: T) -> Result<T, StoreError> {
        object.set_id(id);
        let previous = self.objects.remove(&id).ok_or(StoreError::NotFound {
            table: T::TABLE_NAME,
        })?;
        for index in self.indexes.iter_mut() {
            index.remove(&previous, id);
        }
        if let Err(err) = self.check_unique(&object, id) {
            for index in self.indexes.iter_mut() {
                index.insert(&previous, id);
            }
            self.objects.insert(id, previous);
            return Err(err);
        }
        for index in self.indexes.iter_mut() {
            index.insert(&object, id);
        }
        self.size_bytes = self.size_bytes + borsh_bytes(&object).len() as u64
            - borsh_bytes(&previous).len() as u64;
        self.objects.insert(id, object);
        Ok(previous)
    }

    pub(crate) fn remove(&mut self, id: ObjectId) -> Result<T, StoreError> {
        let object = self.objects.remove(&id).ok_or(StoreError::NotFound {
            table: T::TABLE_NAME,
        })?;
        for index in self.indexes.iter_mut() {
            index.remove(&object, id);
        }
        self.size_bytes -= borsh_bytes(&object).len() as u64;
        Ok(object)
    }
}

/// A type-erased [`Table`], so that the store can hold every table in one map and replay undo entries
/// without knowing their types.
pub(crate) trait AnyTable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Restore the object `id` to `prior`, or remove it if it did not exist before.
    fn restore(&mut self, id: ObjectId, prior: Option<&[u8]>) -> Result<(), StoreError>;

    fn snapshot(&self) -> TableSnapshot;

    fn load(&mut self, snapshot: TableSnapshot) -> Result<(), StoreError>;

    fn hash_into(&self, hasher: &mut CryptoHasher);

    fn clear(&mut self);

    fn size_bytes(&self) -> u64;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Object> AnyTable for Table<T> {
    fn name(&self) -> &'static str {
        T::TABLE_NAME
    }

    fn restore(&mut self, id: ObjectId, prior: Option<&[u8]>) -> Result<(), StoreError> {
        match prior {
            None => {
                self.remove(id)?;
                // Ids are allocated in order and undone in reverse, so this rewinds the allocator exactly.
                self.next_id = id.int();
            }
            Some(bytes) => {
                let object = T::try_from_slice(bytes).map_err(|source| StoreError::Deserialize {
                    table: T::TABLE_NAME,
                    source,
                })?;
                if self.objects.contains_key(&id) {
                    self.replace(id, object)?;
                } else {
                    self.insert(id, object)?;
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            next_id: self.next_id,
            objects: self.objects.values().map(|object| borsh_bytes(object)).collect(),
        }
    }

    fn load(&mut self, snapshot: TableSnapshot) -> Result<(), StoreError> {
        self.clear();
        for bytes in snapshot.objects {
            let object = T::try_from_slice(&bytes).map_err(|source| StoreError::Deserialize {
                table: T::TABLE_NAME,
                source,
            })?;
            self.insert(object.id(), object)?;
        }
        self.next_id = snapshot.next_id;
        Ok(())
    }

    fn hash_into(&self, hasher: &mut CryptoHasher) {
        hasher.update(T::TABLE.to_le_bytes());
        hasher.update(self.next_id.to_le_bytes());
        for object in self.objects.values() {
            hasher.update(borsh_bytes(object));
        }
    }

    fn clear(&mut self) {
        self.objects.clear();
        for index in self.indexes.iter_mut() {
            index.clear();
        }
        self.next_id = 0;
        self.size_bytes = 0;
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
