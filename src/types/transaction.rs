/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the transaction types and their associated methods.
//!
//! A transaction anchors itself to a recent block through `ref_block_num` (the low 16 bits of the block's
//! number) and `ref_block_prefix` (the second 32-bit word of the block's id). A transaction whose anchor
//! does not match the chain's record of that block cannot be replayed onto another fork.

use borsh::{BorshDeserialize, BorshSerialize};
use std::ops::Deref;

use super::authority::{verify_authority, Authority, AuthorityError, RequiredAuthorities};
use super::basic::{borsh_bytes, hash_parts, AccountName, BlockId, ChainId, Timestamp, TransactionId};
use super::crypto_primitives::{Keypair, SignatureBytes};
use super::operation::{Operation, ValidationError};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: Timestamp,
    pub operations: Vec<Operation>,
}

impl Transaction {
    pub fn new(expiration: Timestamp, operations: Vec<Operation>) -> Transaction {
        Transaction {
            ref_block_num: 0,
            ref_block_prefix: 0,
            expiration,
            operations,
        }
    }

    pub fn id(&self) -> TransactionId {
        TransactionId::new(hash_parts(&[&borsh_bytes(self)]))
    }

    /// The digest that signatures over this transaction on the chain identified by `chain_id` sign.
    pub fn sig_digest(&self, chain_id: &ChainId) -> [u8; 32] {
        hash_parts(&[&chain_id.bytes(), &borsh_bytes(self)])
    }

    /// Anchor this transaction to the block identified by `reference_block`.
    pub fn set_reference_block(&mut self, reference_block: &BlockId) {
        self.ref_block_num = reference_block.num().ref_num();
        self.ref_block_prefix = reference_block.ref_prefix();
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.operations.is_empty() {
            return Err(ValidationError::NoOperations);
        }
        self.operations.iter().try_for_each(Operation::validate)
    }

    pub fn required_authorities(&self) -> RequiredAuthorities {
        let mut required = RequiredAuthorities::default();
        for op in &self.operations {
            op.required_authorities(&mut required);
        }
        required
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<SignatureBytes>,
}

impl SignedTransaction {
    pub fn new(transaction: Transaction) -> SignedTransaction {
        SignedTransaction {
            transaction,
            signatures: Vec::new(),
        }
    }

    /// Append a signature by `keypair` for the chain identified by `chain_id`.
    pub fn sign(&mut self, keypair: &Keypair, chain_id: &ChainId) {
        let digest = self.transaction.sig_digest(chain_id);
        self.signatures.push(keypair.sign(&digest));
    }

    /// Size of the signed transaction in its serialized form.
    pub fn size(&self) -> usize {
        borsh_bytes(self).len()
    }

    /// Check the transaction's signatures against the authorities it requires.
    pub fn verify_authority<A, O>(
        &self,
        chain_id: &ChainId,
        get_active: A,
        get_owner: O,
        max_recursion_depth: u32,
    ) -> Result<(), AuthorityError>
    where
        A: Fn(&AccountName) -> Option<Authority>,
        O: Fn(&AccountName) -> Option<Authority>,
    {
        verify_authority(
            &self.transaction.required_authorities(),
            &self.transaction.sig_digest(chain_id),
            &self.signatures,
            get_active,
            get_owner,
            max_recursion_depth,
        )
    }
}

impl Deref for SignedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}
