/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory tree of the blocks that have been applied but are not yet irreversible.
//!
//! The fork database holds every reversible block the chain knows of, across all forks, as
//! [`ForkItem`]s linked by their `previous` ids. Its head is the tip of the longest branch seen so far;
//! the [chain](crate::chain) compares it with its own head to decide whether a new block extends the
//! current chain or calls for a fork switch.
//!
//! Blocks whose parent is unknown are kept aside in an "unlinked" set, and linked in as soon as their
//! parent arrives. Items at or below `head - max_size` are pruned, where the chain keeps `max_size` equal
//! to the distance between its head and its last irreversible block.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::types::basic::{BlockId, BlockNumber};
use crate::types::block::SignedBlock;

/// A block in the fork database, with the fields the tree is indexed by.
#[derive(Clone, Debug)]
pub struct ForkItem {
    pub id: BlockId,
    pub previous: BlockId,
    pub num: BlockNumber,
    pub block: Arc<SignedBlock>,
}

impl ForkItem {
    pub fn new(block: SignedBlock) -> ForkItem {
        ForkItem {
            id: block.id(),
            previous: block.previous(),
            num: block.num(),
            block: Arc::new(block),
        }
    }
}

/// The default `max_size`, before the chain sets it from its irreversibility distance.
pub const DEFAULT_MAX_SIZE: u32 = 1024;

pub struct ForkDatabase {
    items: HashMap<BlockId, ForkItem>,
    by_num: BTreeMap<BlockNumber, BTreeSet<BlockId>>,
    unlinked: HashMap<BlockId, ForkItem>,
    head: Option<BlockId>,
    max_size: u32,
}

impl Default for ForkDatabase {
    fn default() -> Self {
        ForkDatabase::new()
    }
}

impl ForkDatabase {
    pub fn new() -> ForkDatabase {
        ForkDatabase {
            items: HashMap::new(),
            by_num: BTreeMap::new(),
            unlinked: HashMap::new(),
            head: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Insert `block` and return the (possibly new) head.
    ///
    /// A block whose parent is unknown is held aside and [`ForkDbError::UnlinkableBlock`] is returned. A
    /// block that is already known is not inserted twice, but can still become the head again, e.g., after
    /// it was [popped](Self::pop_block).
    pub fn push_block(&mut self, block: SignedBlock) -> Result<ForkItem, ForkDbError> {
        let item = ForkItem::new(block);
        self.push_item(item)?;
        self.head().ok_or(ForkDbError::NothingToPop)
    }

    fn push_item(&mut self, item: ForkItem) -> Result<(), ForkDbError> {
        if let Some(head) = self.head() {
            let min_num = head.num.saturating_sub(self.max_size);
            if item.num <= min_num {
                return Err(ForkDbError::BlockTooOld {
                    num: item.num,
                    min: min_num + 1,
                });
            }
            if !self.items.contains_key(&item.previous) {
                let error = ForkDbError::UnlinkableBlock {
                    id: item.id,
                    previous: item.previous,
                };
                if item.num > head.num {
                    self.unlinked.insert(item.id, item);
                }
                return Err(error);
            }
        }

        let (id, num) = (item.id, item.num);
        let ids_at_num = self.by_num.entry(num).or_default();
        if !ids_at_num.is_empty() && !ids_at_num.contains(&id) {
            log::debug!("Fork database holds {} blocks at height {}", ids_at_num.len() + 1, num);
        }
        ids_at_num.insert(id);
        self.items.entry(id).or_insert(item);

        if self.head().map_or(true, |head| num > head.num) {
            self.head = Some(id);
        }
        self.push_next(id);
        Ok(())
    }

    /// Link in every held-aside block whose parent is `parent`.
    fn push_next(&mut self, parent: BlockId) {
        let children: Vec<BlockId> = self
            .unlinked
            .values()
            .filter(|item| item.previous == parent)
            .map(|item| item.id)
            .collect();
        for child in children {
            if let Some(item) = self.unlinked.remove(&child) {
                if let Err(err) = self.push_item(item) {
                    log::debug!("Dropping held-aside block {}: {}", child, err);
                }
            }
        }
    }

    /// Reset the database to hold only `block`, as its head. Used when the chain (re)opens at the head of
    /// the block log.
    pub fn start_block(&mut self, block: SignedBlock) {
        self.reset();
        let item = ForkItem::new(block);
        self.head = Some(item.id);
        self.by_num.entry(item.num).or_default().insert(item.id);
        self.items.insert(item.id, item);
    }

    pub fn reset(&mut self) {
        self.items.clear();
        self.by_num.clear();
        self.unlinked.clear();
        self.head = None;
    }

    pub fn head(&self) -> Option<ForkItem> {
        self.head.and_then(|id| self.items.get(&id).cloned())
    }

    pub fn set_head(&mut self, id: &BlockId) -> Result<(), ForkDbError> {
        if !self.items.contains_key(id) {
            return Err(ForkDbError::UnknownBlock(*id));
        }
        self.head = Some(*id);
        Ok(())
    }

    /// Move the head back to its parent. The popped item stays in the database, so that it can become the
    /// head again if its branch is switched back to.
    pub fn pop_block(&mut self) -> Result<ForkItem, ForkDbError> {
        let head = self.head().ok_or(ForkDbError::NothingToPop)?;
        if !self.items.contains_key(&head.previous) {
            return Err(ForkDbError::NothingToPop);
        }
        self.head = Some(head.previous);
        Ok(head)
    }

    /// Remove the block `id`, e.g., because it was proven invalid. If it was the head, the head moves to
    /// its parent.
    pub fn remove(&mut self, id: &BlockId) {
        if let Some(item) = self.items.remove(id) {
            if let Some(ids) = self.by_num.get_mut(&item.num) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_num.remove(&item.num);
                }
            }
            if self.head == Some(*id) {
                self.head = self.items.contains_key(&item.previous).then_some(item.previous);
            }
        }
        self.unlinked.remove(id);
    }

    pub fn is_known_block(&self, id: &BlockId) -> bool {
        self.items.contains_key(id) || self.unlinked.contains_key(id)
    }

    pub fn fetch_block(&self, id: &BlockId) -> Option<ForkItem> {
        self.items.get(id).cloned()
    }

    /// Every linked block at height `num`, on any fork.
    pub fn fetch_block_by_number(&self, num: BlockNumber) -> Vec<ForkItem> {
        self.by_num
            .get(&num)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id).cloned())
            .collect()
    }

    /// The block at height `num` on the branch ending at the head.
    pub fn fetch_block_on_main_branch_by_number(&self, num: BlockNumber) -> Option<ForkItem> {
        let mut item = self.head()?;
        while item.num > num {
            item = self.items.get(&item.previous)?.clone();
        }
        (item.num == num).then_some(item)
    }

    /// The two branches leading from the common ancestor of `first` and `second` to each of them. Each
    /// branch is ordered from its tip down to the block right after the common ancestor, so the last items
    /// of both branches have the ancestor as their `previous`.
    pub fn fetch_branch_from(
        &self,
        first: &BlockId,
        second: &BlockId,
    ) -> Result<(Vec<ForkItem>, Vec<ForkItem>), ForkDbError> {
        let mut first_branch = Vec::new();
        let mut second_branch = Vec::new();
        let mut first = self.get(first)?;
        let mut second = self.get(second)?;

        while first.num > second.num {
            let previous = self.get(&first.previous)?;
            first_branch.push(first);
            first = previous;
        }
        while second.num > first.num {
            let previous = self.get(&second.previous)?;
            second_branch.push(second);
            second = previous;
        }
        while first.previous != second.previous {
            let first_previous = self.get(&first.previous)?;
            let second_previous = self.get(&second.previous)?;
            first_branch.push(first);
            second_branch.push(second);
            first = first_previous;
            second = second_previous;
        }
        first_branch.push(first);
        second_branch.push(second);
        Ok((first_branch, second_branch))
    }

    /// Bound the retained history to `max_size` blocks below the head, pruning everything older.
    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size;
        let head_num = match self.head() {
            Some(head) => head.num,
            None => return,
        };
        let min_num = head_num.saturating_sub(max_size);

        let pruned: Vec<BlockNumber> = self.by_num.range(..min_num).map(|(num, _)| *num).collect();
        for num in pruned {
            if let Some(ids) = self.by_num.remove(&num) {
                for id in ids {
                    self.items.remove(&id);
                }
            }
        }
        self.unlinked.retain(|_, item| item.num >= min_num);
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    fn get(&self, id: &BlockId) -> Result<ForkItem, ForkDbError> {
        self.fetch_block(id).ok_or(ForkDbError::UnknownBlock(*id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkDbError {
    UnlinkableBlock { id: BlockId, previous: BlockId },
    BlockTooOld { num: BlockNumber, min: BlockNumber },
    NothingToPop,
    UnknownBlock(BlockId),
}

impl Display for ForkDbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ForkDbError::UnlinkableBlock { id, previous } => write!(
                f,
                "block {} does not link to a known block (previous {})",
                id, previous
            ),
            ForkDbError::BlockTooOld { num, min } => {
                write!(f, "block {} is too old, the fork database starts at {}", num, min)
            }
            ForkDbError::NothingToPop => write!(f, "there are no blocks to pop"),
            ForkDbError::UnknownBlock(id) => write!(f, "block {} is not in the fork database", id),
        }
    }
}

impl std::error::Error for ForkDbError {}
