/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Protocol upgrades that activate at a block boundary.
//!
//! Hardfork 0 is the genesis version. Hardfork `n` (for `n` from 1) is the `n`-th entry of the configured
//! [hardfork schedule](crate::config::Configuration::hardfork_schedule). Hardforks are applied strictly in
//! order, each exactly once, and the time each was applied at is recorded in the
//! [`HardforkProperty`] singleton.
//!
//! A hardfork becomes due when the scheduled witnesses have voted it in (see
//! [`update_witness_schedule`](crate::witness_schedule::update_witness_schedule)) and the voted activation
//! time has passed. Some hardforks carry a one-time state migration, see [`apply_hardfork`].

use std::fmt::{self, Display, Formatter};

use crate::config::Configuration;
use crate::objects::HardforkProperty;
use crate::state::{Object, StateStore, StoreError};
use crate::types::basic::{Timestamp, Version};
use crate::witness_schedule;

/// Retallies every witness's votes from the recorded votes.
pub const HARDFORK_RETALLY_WITNESS_VOTES: u32 = 1;

/// The versions and activation times of the hardforks this node knows, indexed by hardfork number.
#[derive(Clone, Debug)]
pub struct HardforkVersions {
    versions: Vec<Version>,
    times: Vec<Timestamp>,
}

impl HardforkVersions {
    pub fn new(config: &Configuration, genesis_time: Timestamp) -> HardforkVersions {
        let mut versions = vec![Version::default()];
        let mut times = vec![genesis_time];
        for hardfork in &config.hardfork_schedule {
            versions.push(hardfork.version);
            times.push(hardfork.time);
        }
        HardforkVersions { versions, times }
    }

    /// The number of the last known hardfork.
    pub fn num_hardforks(&self) -> u32 {
        (self.versions.len() - 1) as u32
    }

    pub fn version(&self, hardfork: u32) -> Option<Version> {
        self.versions.get(hardfork as usize).copied()
    }

    pub fn time(&self, hardfork: u32) -> Option<Timestamp> {
        self.times.get(hardfork as usize).copied()
    }

    /// The number of known hardforks scheduled at or before `time`.
    pub fn scheduled_by(&self, time: Timestamp) -> u32 {
        self.times
            .iter()
            .skip(1)
            .take_while(|scheduled| **scheduled <= time)
            .count() as u32
    }
}

/// Check that the stored hardfork state is one this node can continue from.
pub fn check_hardfork_state(
    store: &StateStore,
    versions: &HardforkVersions,
    blockchain_version: Version,
) -> Result<(), HardforkError> {
    let hardfork_property = store.singleton::<HardforkProperty>()?;
    let last = hardfork_property.last_hardfork;
    let last_version = versions.version(last).ok_or(HardforkError::Unknown(last))?;
    if last_version > blockchain_version {
        return Err(HardforkError::VersionAhead {
            applied: last_version,
            running: blockchain_version,
        });
    }
    Ok(())
}

/// Whether hardfork `hardfork` has been applied.
pub fn has_hardfork(store: &StateStore, hardfork: u32) -> Result<bool, StoreError> {
    Ok(store.singleton::<HardforkProperty>()?.processed_hardforks.len() > hardfork as usize)
}

/// The next hardfork to apply, if the voted-in hardfork is ahead of the last applied one and its
/// activation time is not after `head_time`.
pub fn next_due_hardfork(
    store: &StateStore,
    versions: &HardforkVersions,
    head_time: Timestamp,
) -> Result<Option<u32>, HardforkError> {
    let hardfork_property = store.singleton::<HardforkProperty>()?;
    let last = hardfork_property.last_hardfork;
    let last_version = versions.version(last).ok_or(HardforkError::Unknown(last))?;
    if last_version >= hardfork_property.next_hardfork || hardfork_property.next_hardfork_time > head_time {
        return Ok(None);
    }
    if last >= versions.num_hardforks() {
        return Err(HardforkError::Unknown(last + 1));
    }
    Ok(Some(last + 1))
}

/// Point the pending hardfork at `hardfork`, activating at `head_time`. Used to force hardforks through
/// without a witness vote.
pub fn set_next_hardfork(
    store: &mut StateStore,
    versions: &HardforkVersions,
    hardfork: u32,
    head_time: Timestamp,
) -> Result<(), HardforkError> {
    let version = versions.version(hardfork).ok_or(HardforkError::Unknown(hardfork))?;
    let id = store.singleton::<HardforkProperty>()?.id();
    store.modify::<HardforkProperty, _>(id, |hfp| {
        hfp.next_hardfork = version;
        hfp.next_hardfork_time = head_time;
    })?;
    Ok(())
}

/// Apply hardfork `hardfork`, which must directly follow the last applied one, and run its state
/// migration.
pub fn apply_hardfork(
    store: &mut StateStore,
    versions: &HardforkVersions,
    hardfork: u32,
) -> Result<(), HardforkError> {
    let hardfork_property = store.singleton::<HardforkProperty>()?;
    let expected = hardfork_property.last_hardfork + 1;
    if hardfork != expected {
        return Err(HardforkError::OutOfOrder {
            expected,
            got: hardfork,
        });
    }
    let id = hardfork_property.id();
    let version = versions.version(hardfork).ok_or(HardforkError::Unknown(hardfork))?;
    let time = versions.time(hardfork).ok_or(HardforkError::Unknown(hardfork))?;

    log::info!("Applying hardfork {} (version {})", hardfork, version);

    if hardfork == HARDFORK_RETALLY_WITNESS_VOTES {
        witness_schedule::retally_witness_votes(store)?;
    }

    store.modify::<HardforkProperty, _>(id, |hfp| {
        hfp.processed_hardforks.push(time);
        hfp.last_hardfork = hardfork;
        hfp.current_hardfork_version = version;
    })?;
    Ok(())
}

#[derive(Debug)]
pub enum HardforkError {
    Unknown(u32),
    OutOfOrder { expected: u32, got: u32 },
    VersionAhead { applied: Version, running: Version },
    Store(StoreError),
}

impl Display for HardforkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HardforkError::Unknown(hardfork) => {
                write!(f, "hardfork {} is not known to this node", hardfork)
            }
            HardforkError::OutOfOrder { expected, got } => {
                write!(f, "hardfork {} applied out of order, expected {}", got, expected)
            }
            HardforkError::VersionAhead { applied, running } => write!(
                f,
                "the chain has applied version {} but this node runs {}",
                applied, running
            ),
            HardforkError::Store(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for HardforkError {}

impl From<StoreError> for HardforkError {
    fn from(value: StoreError) -> Self {
        HardforkError::Store(value)
    }
}
