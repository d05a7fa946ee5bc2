/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The undo log: a flat, generation-tagged record of every mutation made while a session is open.
//!
//! Each entry holds the table and id of the mutated record, the record's serialized value before the
//! mutation (or nothing, if the mutation created it), and the generation (the revision of the session
//! that was innermost when the mutation happened). A session is nothing more than a marker at the
//! position in the log where it began:
//!
//! |Session operation|Effect on the log|
//! |---|---|
//! |Start|Push a marker with the next revision.|
//! |Undo|Split off the entries after the innermost marker and replay them in reverse.|
//! |Squash|Drop the innermost marker and re-tag its entries with the parent's generation. If there is no parent, the entries are discarded and the changes become permanent.|
//! |Push|Nothing: the marker stays, so the session can still be undone later.|
//! |Commit(r)|Discard every marker with revision `<= r` together with their entries.|

use borsh::{BorshDeserialize, BorshSerialize};

use super::store::StoreError;
use super::table::{ObjectId, TableId};

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct UndoEntry {
    pub(crate) table: TableId,
    pub(crate) id: ObjectId,
    pub(crate) prior: Option<Vec<u8>>,
    pub(crate) generation: i64,
}

#[derive(Clone, Copy, Debug, BorshSerialize, BorshDeserialize)]
struct SessionMarker {
    revision: i64,
    start: usize,
}

#[derive(Clone, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
    markers: Vec<SessionMarker>,
    revision: i64,
}

impl UndoLog {
    pub(crate) fn revision(&self) -> i64 {
        self.revision
    }

    /// Number of sessions that can still be undone.
    pub(crate) fn depth(&self) -> usize {
        self.markers.len()
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.markers.is_empty()
    }

    pub(crate) fn innermost(&self) -> Option<i64> {
        self.markers.last().map(|marker| marker.revision)
    }

    pub(crate) fn set_revision(&mut self, revision: i64) -> Result<(), StoreError> {
        if self.is_active() {
            return Err(StoreError::SessionsOpen);
        }
        self.revision = revision;
        Ok(())
    }

    pub(crate) fn start_session(&mut self) -> i64 {
        self.revision += 1;
        self.markers.push(SessionMarker {
            revision: self.revision,
            start: self.entries.len(),
        });
        self.revision
    }

    /// Record that the record `id` of `table` is about to change from `prior`.
    pub(crate) fn record(&mut self, table: TableId, id: ObjectId, prior: Option<Vec<u8>>) {
        if let Some(marker) = self.markers.last() {
            self.entries.push(UndoEntry {
                table,
                id,
                prior,
                generation: marker.revision,
            });
        }
    }

    fn check_innermost(&self, revision: i64) -> Result<SessionMarker, StoreError> {
        match self.markers.last() {
            Some(marker) if marker.revision == revision => Ok(*marker),
            Some(marker) => Err(StoreError::SessionOutOfOrder {
                expected: marker.revision,
                got: revision,
            }),
            None => Err(StoreError::NoSession),
        }
    }

    /// Whether the session with `revision` is still open (neither undone, squashed, nor committed).
    pub(crate) fn contains(&self, revision: i64) -> bool {
        self.markers.iter().any(|marker| marker.revision == revision)
    }

    /// Remove the innermost session, which must be `revision`, and return its entries in the order they
    /// were recorded. The caller replays them in reverse.
    pub(crate) fn pop_session(&mut self, revision: i64) -> Result<Vec<UndoEntry>, StoreError> {
        let marker = self.check_innermost(revision)?;
        self.markers.pop();
        self.revision -= 1;
        Ok(self.entries.split_off(marker.start))
    }

    pub(crate) fn squash(&mut self, revision: i64) -> Result<(), StoreError> {
        let marker = self.check_innermost(revision)?;
        self.markers.pop();
        self.revision -= 1;
        match self.markers.last() {
            Some(parent) => {
                let generation = parent.revision;
                for entry in &mut self.entries[marker.start..] {
                    entry.generation = generation;
                }
            }
            None => self.entries.truncate(marker.start),
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self, revision: i64) {
        let committed = self
            .markers
            .iter()
            .take_while(|marker| marker.revision <= revision)
            .count();
        if committed == 0 {
            return;
        }
        let cut = self
            .markers
            .get(committed)
            .map_or(self.entries.len(), |marker| marker.start);
        self.entries.drain(..cut);
        self.markers.drain(..committed);
        for marker in &mut self.markers {
            marker.start -= cut;
        }
    }
}
