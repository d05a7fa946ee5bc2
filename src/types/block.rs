/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{borsh_bytes, hash_parts, AccountName, BlockId, BlockNumber, Timestamp, Version};
use super::crypto_primitives::{Keypair, PublicKeyBytes, SignatureBytes};
use super::transaction::SignedTransaction;

/// Protocol-version signals a witness attaches to the headers of the blocks it produces.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BlockHeaderExtension {
    /// The version of the software the witness is running.
    Version(Version),
    /// The witness's vote for the next hardfork and when it should activate.
    HardforkVersionVote { version: Version, time: Timestamp },
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub previous: BlockId,
    pub timestamp: Timestamp,
    pub witness: AccountName,
    pub transaction_merkle_root: [u8; 32],
    pub extensions: Vec<BlockHeaderExtension>,
}

impl BlockHeader {
    /// The number of this block: one more than the number encoded in `previous`.
    pub fn num(&self) -> BlockNumber {
        self.previous.num() + 1
    }

    pub fn id(&self) -> BlockId {
        BlockId::from_hash(self.num(), self.digest())
    }

    /// The digest the witness signs.
    pub fn digest(&self) -> [u8; 32] {
        hash_parts(&[&borsh_bytes(self)])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub witness_signature: SignatureBytes,
    pub transactions: Vec<SignedTransaction>,
}

impl SignedBlock {
    /// Create an unsigned block with the merkle root computed over `transactions`.
    pub fn new(
        previous: BlockId,
        timestamp: Timestamp,
        witness: AccountName,
        transactions: Vec<SignedTransaction>,
    ) -> SignedBlock {
        let mut block = SignedBlock {
            header: BlockHeader {
                previous,
                timestamp,
                witness,
                transaction_merkle_root: [0u8; 32],
                extensions: Vec::new(),
            },
            witness_signature: SignatureBytes::default(),
            transactions,
        };
        block.header.transaction_merkle_root = block.calculate_merkle_root();
        block
    }

    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    pub fn num(&self) -> BlockNumber {
        self.header.num()
    }

    pub fn previous(&self) -> BlockId {
        self.header.previous
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    pub fn witness(&self) -> &AccountName {
        &self.header.witness
    }

    /// Sign the header with the witness's block signing key.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.witness_signature = keypair.sign(&self.header.digest());
    }

    /// Whether the witness signature was made by `signing_key`.
    pub fn validate_signee(&self, signing_key: &PublicKeyBytes) -> bool {
        signing_key.verifies(&self.header.digest(), &self.witness_signature)
    }

    /// The merkle root over the hashes of the block's signed transactions. Pairs are hashed level by level;
    /// an odd node at the end of a level is carried up unchanged. An empty block has an all-zero root.
    pub fn calculate_merkle_root(&self) -> [u8; 32] {
        if self.transactions.is_empty() {
            return [0u8; 32];
        }

        let mut level: Vec<[u8; 32]> = self
            .transactions
            .iter()
            .map(|tx| hash_parts(&[&borsh_bytes(tx)]))
            .collect();

        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_parts(&[left, right]),
                    [single] => *single,
                    _ => unreachable!(),
                })
                .collect();
        }
        level[0]
    }

    /// Size of the block in its serialized form.
    pub fn size(&self) -> usize {
        borsh_bytes(self).len()
    }
}
