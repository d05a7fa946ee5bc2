/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are passed around the chain, stored in ledger records, and hashed into block and
//! transaction ids.
//!
//! All of these follow the newtype pattern. The API for using them is defined in this module:
//!
//! |Type|Wraps|Notes|
//! |---|---|---|
//! |[`ChainId`]|`[u8; 32]`|Mixed into every transaction signature digest.|
//! |[`BlockNumber`]|`u32`|Height of a block. Genesis state is height 0.|
//! |[`BlockId`]|`[u8; 32]`|Header hash with the block number written into the first 4 bytes.|
//! |[`TransactionId`]|`[u8; 32]`|Hash of the unsigned transaction.|
//! |[`Timestamp`]|`u32`|Seconds since the Unix Epoch.|
//! |[`AccountName`]|`String`|Accounts and witnesses are identified by name.|
//! |[`Asset`], [`AssetSymbol`], [`Price`]|||
//! |[`Version`]|`(u8, u8, u16)`|Protocol versions. Hardfork versions have a zero patch number.|

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
};

use super::crypto_primitives::{CryptoHasher, Digest};

/// Serialize `value` with borsh.
pub(crate) fn borsh_bytes<T: BorshSerialize + ?Sized>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writes into a Vec<u8> do not fail.
    value.serialize(&mut bytes).unwrap();
    bytes
}

/// Hash the concatenation of `parts` with [`CryptoHasher`].
pub(crate) fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn fmt_hex(bytes: &[u8], f: &mut Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Id of the blockchain. Signatures made for one chain are never valid on another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ChainId([u8; 32]);

impl ChainId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a chain id from a human readable network name.
    pub fn from_name(name: &str) -> Self {
        Self(hash_parts(&[name.as_bytes()]))
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

/// Height of a block in the blockchain. The state before the first block is at height 0.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockNumber(u32);

impl BlockNumber {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    /// The 16-bit reference number used by transactions to anchor themselves to this block.
    pub const fn ref_num(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn saturating_sub(&self, rhs: u32) -> BlockNumber {
        BlockNumber(self.0.saturating_sub(rhs))
    }
}

impl Display for BlockNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for BlockNumber {
    type Output = BlockNumber;
    fn add(self, rhs: u32) -> Self::Output {
        BlockNumber(self.0 + rhs)
    }
}

impl AddAssign<u32> for BlockNumber {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs
    }
}

impl Sub<BlockNumber> for BlockNumber {
    type Output = u32;
    fn sub(self, rhs: BlockNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

/// The id of a block. Obtained by hashing the block's [header](crate::types::block::BlockHeader) and
/// then overwriting the first four bytes with the block's number in big-endian, so that the number of
/// any block can be read off its id, including the `previous` id of a header.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct BlockId([u8; 32]);

impl BlockId {
    pub const ZERO: BlockId = BlockId([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_hash(num: BlockNumber, mut hash: [u8; 32]) -> Self {
        hash[0..4].copy_from_slice(&num.int().to_be_bytes());
        Self(hash)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// The number of the block this id identifies.
    pub fn num(&self) -> BlockNumber {
        let mut num = [0u8; 4];
        num.copy_from_slice(&self.0[0..4]);
        BlockNumber::new(u32::from_be_bytes(num))
    }

    /// The second 32-bit word of the id. Transactions carry it as their reference block prefix.
    pub fn ref_prefix(&self) -> u32 {
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&self.0[4..8]);
        u32::from_le_bytes(prefix)
    }
}

impl Debug for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0[0..8], f)
    }
}

/// The id of a transaction: the hash of its unsigned contents.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0[0..8], f)
    }
}

/// A point in time, in seconds since the Unix Epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u32);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u32::MAX);

    pub const fn new(secs: u32) -> Self {
        Self(secs)
    }

    pub const fn secs(&self) -> u32 {
        self.0
    }

    pub fn saturating_sub(&self, secs: u32) -> Timestamp {
        Timestamp(self.0.saturating_sub(secs))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: u32) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs))
    }
}

/// The difference between two timestamps, in seconds.
impl Sub<Timestamp> for Timestamp {
    type Output = i64;
    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.0 as i64 - rhs.0 as i64
    }
}

/// The name of an account. Witnesses are accounts, and share their namespace.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct AccountName(String);

impl AccountName {
    pub const MIN_LENGTH: usize = 3;
    pub const MAX_LENGTH: usize = 16;

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is 3 to 16 characters of lowercase letters, digits, '-', or '.', starting with
    /// a letter.
    pub fn is_valid(&self) -> bool {
        let name = self.0.as_bytes();
        name.len() >= Self::MIN_LENGTH
            && name.len() <= Self::MAX_LENGTH
            && name[0].is_ascii_lowercase()
            && name
                .iter()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == b'-' || *c == b'.')
    }
}

impl Debug for AccountName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for AccountName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for AccountName {
    fn from(name: &str) -> Self {
        AccountName::new(name)
    }
}

/// A ticker of up to 8 ASCII characters packed little-endian into a `u64`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct AssetSymbol(u64);

impl AssetSymbol {
    /// The chain's native, liquid token.
    pub const NATIVE: AssetSymbol = AssetSymbol::from_ticker(b"DPOS");
    /// Vesting shares.
    pub const VESTS: AssetSymbol = AssetSymbol::from_ticker(b"VESTS");
    pub const USD: AssetSymbol = AssetSymbol::from_ticker(b"USD");
    pub const EUR: AssetSymbol = AssetSymbol::from_ticker(b"EUR");

    pub const fn from_ticker(ticker: &[u8]) -> Self {
        let mut packed = 0u64;
        let mut i = 0;
        while i < ticker.len() && i < 8 {
            packed |= (ticker[i] as u64) << (8 * i);
            i += 1;
        }
        AssetSymbol(packed)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Default for AssetSymbol {
    fn default() -> Self {
        AssetSymbol::NATIVE
    }
}

impl Debug for AssetSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for AssetSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        let ticker: String = bytes
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        f.write_str(&ticker)
    }
}

/// An amount of some asset, in its smallest unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Asset {
    pub amount: i64,
    pub symbol: AssetSymbol,
}

impl Asset {
    pub const fn new(amount: i64, symbol: AssetSymbol) -> Self {
        Self { amount, symbol }
    }

    pub const fn native(amount: i64) -> Self {
        Self::new(amount, AssetSymbol::NATIVE)
    }

    pub const fn vests(amount: i64) -> Self {
        Self::new(amount, AssetSymbol::VESTS)
    }

    /// Add two amounts of the same asset. Returns `None` on a symbol mismatch or an overflow.
    pub fn checked_add(&self, other: &Asset) -> Option<Asset> {
        if self.symbol != other.symbol {
            return None;
        }
        Some(Asset::new(self.amount.checked_add(other.amount)?, self.symbol))
    }

    /// Subtract two amounts of the same asset. Returns `None` on a symbol mismatch or an overflow.
    pub fn checked_sub(&self, other: &Asset) -> Option<Asset> {
        if self.symbol != other.symbol {
            return None;
        }
        Some(Asset::new(self.amount.checked_sub(other.amount)?, self.symbol))
    }
}

impl Display for Asset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.symbol)
    }
}

/// An exchange rate: `base` is worth `quote`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Price {
    pub base: Asset,
    pub quote: Asset,
}

impl Price {
    pub const fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    pub fn is_null(&self) -> bool {
        self.base.amount == 0 || self.quote.amount == 0
    }

    /// Compare two prices over the same asset pair by their ratio, without rounding.
    pub fn cmp_ratio(&self, other: &Price) -> Ordering {
        let lhs = self.base.amount as i128 * other.quote.amount as i128;
        let rhs = other.base.amount as i128 * self.quote.amount as i128;
        lhs.cmp(&rhs)
    }
}

/// A protocol version. Ordering is lexicographic over `(major, minor, patch)`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The hardfork version this version implements, i.e., this version with the patch number zeroed.
    pub const fn hardfork_version(&self) -> Version {
        Version::new(self.major, self.minor, 0)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
