/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Chain properties that witnesses vote on, and the decoder for the wire-level property map.
//!
//! Internally the properties are the typed [`ChainProperties`] struct. The
//! [`WitnessSetProperties`](super::operation::WitnessSetPropertiesOperation) operation carries them as a
//! `name → borsh bytes` map instead, so that new properties can be introduced without changing the
//! operation's layout. [`decode_witness_properties`] is the only place where that map is read: it accepts
//! only the keys in [`WitnessPropertyKey`] and decodes each value into its typed field.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use super::basic::{Asset, AssetSymbol};
use super::crypto_primitives::PublicKeyBytes;

/// Smallest value a witness may propose for the maximum block size.
pub const MIN_BLOCK_SIZE_LIMIT: u32 = 8192 * 16;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainProperties {
    pub account_creation_fee: Asset,
    pub maximum_block_size: u32,
}

impl Default for ChainProperties {
    fn default() -> Self {
        ChainProperties {
            account_creation_fee: Asset::native(0),
            maximum_block_size: MIN_BLOCK_SIZE_LIMIT * 2,
        }
    }
}

/// The whitelist of keys recognized in a witness property map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WitnessPropertyKey {
    /// The witness's current signing key. Required: it authorizes the update.
    Key,
    NewSigningKey,
    AccountCreationFee,
    MaximumBlockSize,
    Url,
}

impl WitnessPropertyKey {
    pub fn name(&self) -> &'static str {
        match self {
            WitnessPropertyKey::Key => "key",
            WitnessPropertyKey::NewSigningKey => "new_signing_key",
            WitnessPropertyKey::AccountCreationFee => "account_creation_fee",
            WitnessPropertyKey::MaximumBlockSize => "maximum_block_size",
            WitnessPropertyKey::Url => "url",
        }
    }

    pub fn from_name(name: &str) -> Option<WitnessPropertyKey> {
        match name {
            "key" => Some(WitnessPropertyKey::Key),
            "new_signing_key" => Some(WitnessPropertyKey::NewSigningKey),
            "account_creation_fee" => Some(WitnessPropertyKey::AccountCreationFee),
            "maximum_block_size" => Some(WitnessPropertyKey::MaximumBlockSize),
            "url" => Some(WitnessPropertyKey::Url),
            _ => None,
        }
    }
}

/// A decoded witness property map. `None` fields are left unchanged by the update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessPropertiesUpdate {
    pub key: PublicKeyBytes,
    pub new_signing_key: Option<PublicKeyBytes>,
    pub account_creation_fee: Option<Asset>,
    pub maximum_block_size: Option<u32>,
    pub url: Option<String>,
}

impl WitnessPropertiesUpdate {
    /// Apply the update's chain property fields onto `props`.
    pub fn apply_to(&self, props: &mut ChainProperties) {
        if let Some(fee) = self.account_creation_fee {
            props.account_creation_fee = fee;
        }
        if let Some(size) = self.maximum_block_size {
            props.maximum_block_size = size;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessPropertiesError {
    UnknownKey(String),
    MissingKey,
    Malformed(WitnessPropertyKey),
    OutOfRange(WitnessPropertyKey),
}

impl Display for WitnessPropertiesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WitnessPropertiesError::UnknownKey(key) => write!(f, "unknown witness property {}", key),
            WitnessPropertiesError::MissingKey => write!(f, "witness property map lacks \"key\""),
            WitnessPropertiesError::Malformed(key) => {
                write!(f, "witness property {} is malformed", key.name())
            }
            WitnessPropertiesError::OutOfRange(key) => {
                write!(f, "witness property {} is out of range", key.name())
            }
        }
    }
}

impl std::error::Error for WitnessPropertiesError {}

fn decode<T: BorshDeserialize>(
    key: WitnessPropertyKey,
    bytes: &[u8],
) -> Result<T, WitnessPropertiesError> {
    T::try_from_slice(bytes).map_err(|_| WitnessPropertiesError::Malformed(key))
}

/// Decode a wire-level witness property map into a typed update.
pub fn decode_witness_properties(
    props: &BTreeMap<String, Vec<u8>>,
) -> Result<WitnessPropertiesUpdate, WitnessPropertiesError> {
    let mut key = None;
    let mut update = WitnessPropertiesUpdate {
        key: PublicKeyBytes::new([0u8; 32]),
        new_signing_key: None,
        account_creation_fee: None,
        maximum_block_size: None,
        url: None,
    };

    for (name, bytes) in props {
        let property = WitnessPropertyKey::from_name(name)
            .ok_or_else(|| WitnessPropertiesError::UnknownKey(name.clone()))?;
        match property {
            WitnessPropertyKey::Key => key = Some(decode(property, bytes)?),
            WitnessPropertyKey::NewSigningKey => {
                update.new_signing_key = Some(decode(property, bytes)?)
            }
            WitnessPropertyKey::AccountCreationFee => {
                let fee: Asset = decode(property, bytes)?;
                if fee.symbol != AssetSymbol::NATIVE || fee.amount < 0 {
                    return Err(WitnessPropertiesError::OutOfRange(property));
                }
                update.account_creation_fee = Some(fee)
            }
            WitnessPropertyKey::MaximumBlockSize => {
                let size: u32 = decode(property, bytes)?;
                if size < MIN_BLOCK_SIZE_LIMIT {
                    return Err(WitnessPropertiesError::OutOfRange(property));
                }
                update.maximum_block_size = Some(size)
            }
            WitnessPropertyKey::Url => {
                let url: String = decode(property, bytes)?;
                if url.is_empty() || url.len() > 2048 {
                    return Err(WitnessPropertiesError::OutOfRange(property));
                }
                update.url = Some(url)
            }
        }
    }

    update.key = key.ok_or(WitnessPropertiesError::MissingKey)?;
    Ok(update)
}

/// Encode a typed value for a witness property map.
pub fn encode_witness_property<T: BorshSerialize>(value: &T) -> Vec<u8> {
    super::basic::borsh_bytes(value)
}
