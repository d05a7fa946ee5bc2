/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Weighted multi-signature authorities and the check that a set of signatures satisfies them.
//!
//! An [`Authority`] is satisfied when the weights of the keys that signed, plus the weights of the accounts
//! whose own active authority is (recursively) satisfied, reach its `weight_threshold`. Account recursion
//! is bounded by a maximum depth.
//!
//! Ed25519 public keys cannot be recovered from signatures, so [`verify_authority`] matches signatures
//! against the candidate keys of the authorities being checked. Every signature must end up used by some
//! key; a transaction carrying a signature that contributes nothing is rejected.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};

use super::basic::AccountName;
use super::crypto_primitives::{PublicKeyBytes, SignatureBytes};

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Authority {
    pub weight_threshold: u32,
    pub account_auths: BTreeMap<AccountName, u16>,
    pub key_auths: BTreeMap<PublicKeyBytes, u16>,
}

impl Authority {
    pub fn new(weight_threshold: u32) -> Authority {
        Authority {
            weight_threshold,
            account_auths: BTreeMap::new(),
            key_auths: BTreeMap::new(),
        }
    }

    /// An authority satisfied by a single signature from `key`.
    pub fn single_key(key: PublicKeyBytes) -> Authority {
        let mut authority = Authority::new(1);
        authority.key_auths.insert(key, 1);
        authority
    }

    pub fn with_key(mut self, key: PublicKeyBytes, weight: u16) -> Authority {
        self.key_auths.insert(key, weight);
        self
    }

    pub fn with_account(mut self, account: AccountName, weight: u16) -> Authority {
        self.account_auths.insert(account, weight);
        self
    }

    /// Whether the authority can never be satisfied, even if every key and account signs.
    pub fn is_impossible(&self) -> bool {
        let total: u64 = self
            .key_auths
            .values()
            .chain(self.account_auths.values())
            .map(|weight| *weight as u64)
            .sum();
        total < self.weight_threshold as u64
    }

    pub fn is_valid(&self) -> bool {
        self.account_auths.keys().all(AccountName::is_valid)
    }
}

/// The authorities that must have signed a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequiredAuthorities {
    pub active: BTreeSet<AccountName>,
    pub owner: BTreeSet<AccountName>,
    pub other: Vec<Authority>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorityError {
    MissingActiveAuthority(AccountName),
    MissingOwnerAuthority(AccountName),
    MissingOtherAuthority,
    UnknownAccount(AccountName),
    IrrelevantSignature,
}

impl Display for AuthorityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityError::MissingActiveAuthority(account) => {
                write!(f, "missing active authority of {}", account)
            }
            AuthorityError::MissingOwnerAuthority(account) => {
                write!(f, "missing owner authority of {}", account)
            }
            AuthorityError::MissingOtherAuthority => write!(f, "missing required key authority"),
            AuthorityError::UnknownAccount(account) => write!(f, "unknown account {}", account),
            AuthorityError::IrrelevantSignature => {
                write!(f, "transaction carries an unnecessary signature")
            }
        }
    }
}

impl std::error::Error for AuthorityError {}

/// Check that `signatures` over `digest` satisfy every authority in `required`.
///
/// `get_active` and `get_owner` look up an account's current authorities. An owner authority also satisfies
/// an active requirement.
pub fn verify_authority<A, O>(
    required: &RequiredAuthorities,
    digest: &[u8],
    signatures: &[SignatureBytes],
    get_active: A,
    get_owner: O,
    max_recursion_depth: u32,
) -> Result<(), AuthorityError>
where
    A: Fn(&AccountName) -> Option<Authority>,
    O: Fn(&AccountName) -> Option<Authority>,
{
    let mut state = SignState::new(digest, signatures, &get_active, max_recursion_depth);

    for authority in &required.other {
        if !state.check(authority, 0)? {
            return Err(AuthorityError::MissingOtherAuthority);
        }
    }

    for account in &required.owner {
        let owner = get_owner(account).ok_or_else(|| AuthorityError::UnknownAccount(account.clone()))?;
        if !state.check(&owner, 0)? {
            return Err(AuthorityError::MissingOwnerAuthority(account.clone()));
        }
    }

    for account in &required.active {
        let active =
            get_active(account).ok_or_else(|| AuthorityError::UnknownAccount(account.clone()))?;
        if state.check(&active, 0)? {
            continue;
        }
        let owner = get_owner(account).ok_or_else(|| AuthorityError::UnknownAccount(account.clone()))?;
        if !state.check(&owner, 0)? {
            return Err(AuthorityError::MissingActiveAuthority(account.clone()));
        }
    }

    if state.used.iter().any(|used| !used) {
        return Err(AuthorityError::IrrelevantSignature);
    }
    Ok(())
}

struct SignState<'a, A> {
    digest: &'a [u8],
    signatures: &'a [SignatureBytes],
    used: Vec<bool>,
    signed_by: HashMap<PublicKeyBytes, bool>,
    get_active: &'a A,
    max_recursion_depth: u32,
}

impl<'a, A> SignState<'a, A>
where
    A: Fn(&AccountName) -> Option<Authority>,
{
    fn new(
        digest: &'a [u8],
        signatures: &'a [SignatureBytes],
        get_active: &'a A,
        max_recursion_depth: u32,
    ) -> Self {
        SignState {
            digest,
            signatures,
            used: vec![false; signatures.len()],
            signed_by: HashMap::new(),
            get_active,
            max_recursion_depth,
        }
    }

    fn key_signed(&mut self, key: &PublicKeyBytes) -> bool {
        if let Some(signed) = self.signed_by.get(key) {
            return *signed;
        }
        let position = self
            .signatures
            .iter()
            .position(|signature| key.verifies(self.digest, signature));
        if let Some(position) = position {
            self.used[position] = true;
        }
        self.signed_by.insert(*key, position.is_some());
        position.is_some()
    }

    fn check(&mut self, authority: &Authority, depth: u32) -> Result<bool, AuthorityError> {
        let threshold = authority.weight_threshold as u64;
        let mut total = 0u64;

        for (key, weight) in &authority.key_auths {
            if self.key_signed(key) {
                total += *weight as u64;
                if total >= threshold {
                    return Ok(true);
                }
            }
        }

        if depth < self.max_recursion_depth {
            for (account, weight) in &authority.account_auths {
                let active = match (self.get_active)(account) {
                    Some(active) => active,
                    None => return Err(AuthorityError::UnknownAccount(account.clone())),
                };
                if self.check(&active, depth + 1)? {
                    total += *weight as u64;
                    if total >= threshold {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(total >= threshold)
    }
}
