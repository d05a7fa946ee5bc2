//! A chain opened over a [`MemDB`] and a temporary block log directory, together with the keys of its
//! witnesses and accounts, and a record of the events it fired.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use dpos_chain::chain::{Chain, ChainError, ChainSpec, Genesis, SkipFlags};
use dpos_chain::config::Configuration;
use dpos_chain::events::{
    AppliedBlockEvent, IrreversibleBlockEvent, PendingTransactionEvent, PostApplyOperationEvent,
    PreApplyOperationEvent, ReindexDoneEvent, SwitchForkEvent,
};
use dpos_chain::types::basic::{
    AccountName, Asset, BlockId, BlockNumber, ChainId, Timestamp, TransactionId,
};
use dpos_chain::types::block::SignedBlock;
use dpos_chain::types::crypto_primitives::Keypair;
use dpos_chain::types::operation::{Operation, TransferOperation};
use dpos_chain::types::transaction::{SignedTransaction, Transaction};

use super::evaluators::test_evaluators;
use super::mem_db::MemDB;

/// Aligned to the block interval, so that block `n` of an unbroken chain is produced at
/// `GENESIS_TIME + n * BLOCK_INTERVAL`.
pub(crate) const GENESIS_TIME: Timestamp = Timestamp::new(1_600_000_200);
pub(crate) const BLOCK_INTERVAL: u32 = 3;
pub(crate) const INITIAL_SUPPLY: i64 = 1_000_000;
pub(crate) const INIT_MINER: &str = "initminer";

pub(crate) fn keypair_of(seed: u8) -> Keypair {
    Keypair::from_secret([seed; 32])
}

pub(crate) fn init_miner() -> AccountName {
    AccountName::from(INIT_MINER)
}

/// A small-scale configuration: a few witnesses per round, and irreversibility trailing the head by the
/// round size.
pub(crate) fn test_configuration() -> Configuration {
    Configuration::builder()
        .chain_id(ChainId::from_name("dpos-chain-tests"))
        .block_interval(BLOCK_INTERVAL)
        .max_witnesses(5)
        .min_feeds(1)
        .feed_interval_blocks(5)
        .hardfork_required_witnesses(1)
        .build()
}

/// A genesis with `initminer` holding the whole supply and `extra_witnesses` further witnesses named
/// `witness1`, `witness2`, ....
pub(crate) fn test_genesis(extra_witnesses: u8) -> (Genesis, Vec<(AccountName, Keypair)>) {
    let init_keypair = keypair_of(1);
    let mut genesis = Genesis::new(GENESIS_TIME, INITIAL_SUPPLY, init_keypair.public());
    let mut keys = vec![(init_miner(), init_keypair)];
    for i in 1..=extra_witnesses {
        let name = AccountName::new(format!("witness{}", i));
        let keypair = keypair_of(i + 1);
        genesis = genesis.with_witness(name.clone(), keypair.public());
        keys.push((name, keypair));
    }
    (genesis, keys)
}

/// What the chain's event handlers saw.
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    pub(crate) applied_blocks: Arc<Mutex<Vec<BlockNumber>>>,
    pub(crate) irreversible_blocks: Arc<Mutex<Vec<BlockNumber>>>,
    pub(crate) switched_forks: Arc<Mutex<Vec<(BlockId, BlockId)>>>,
    pub(crate) virtual_operations: Arc<Mutex<Vec<Operation>>>,
    pub(crate) pending_transactions: Arc<Mutex<Vec<TransactionId>>>,
    pub(crate) reindex_done: Arc<Mutex<Vec<(bool, BlockNumber)>>>,
    /// The fee payer of every real operation, as seen right before it was applied.
    pub(crate) fee_payers: Arc<Mutex<Vec<Option<AccountName>>>>,
}

impl EventLog {
    pub(crate) fn irreversible_blocks(&self) -> Vec<BlockNumber> {
        self.irreversible_blocks.lock().unwrap().clone()
    }

    pub(crate) fn virtual_operations(&self) -> Vec<Operation> {
        self.virtual_operations.lock().unwrap().clone()
    }

    pub(crate) fn fee_payers(&self) -> Vec<Option<AccountName>> {
        self.fee_payers.lock().unwrap().clone()
    }
}

/// Open a chain with the test evaluators and invariant validation, recording its events in `events`.
pub(crate) fn open_chain(
    kv_store: MemDB,
    data_dir: &Path,
    configuration: Configuration,
    genesis: Genesis,
    events: &EventLog,
) -> Result<Chain<MemDB>, ChainError> {
    let applied_blocks = events.applied_blocks.clone();
    let irreversible_blocks = events.irreversible_blocks.clone();
    let switched_forks = events.switched_forks.clone();
    let virtual_operations = events.virtual_operations.clone();
    let pending_transactions = events.pending_transactions.clone();
    let reindex_done = events.reindex_done.clone();
    let fee_payers = events.fee_payers.clone();

    ChainSpec::builder()
        .kv_store(kv_store)
        .data_dir(data_dir.to_path_buf())
        .configuration(configuration)
        .genesis(genesis)
        .evaluators(test_evaluators())
        .validate_invariants(true)
        .on_applied_block(move |event: &AppliedBlockEvent| {
            applied_blocks.lock().unwrap().push(event.block.num())
        })
        .on_irreversible_block(move |event: &IrreversibleBlockEvent| {
            irreversible_blocks.lock().unwrap().push(event.block_num)
        })
        .on_switch_fork(move |event: &SwitchForkEvent| {
            switched_forks
                .lock()
                .unwrap()
                .push((event.old_head, event.new_head))
        })
        .on_pre_apply_operation(move |event: &PreApplyOperationEvent| {
            if !event.operation.is_virtual() {
                fee_payers.lock().unwrap().push(event.context.fee_payer.clone())
            }
        })
        .on_post_apply_operation(move |event: &PostApplyOperationEvent| {
            if event.operation.is_virtual() {
                virtual_operations
                    .lock()
                    .unwrap()
                    .push(event.operation.clone())
            }
        })
        .on_pending_transaction(move |event: &PendingTransactionEvent| {
            pending_transactions.lock().unwrap().push(event.trx_id)
        })
        .on_reindex_done(move |event: &ReindexDoneEvent| {
            reindex_done
                .lock()
                .unwrap()
                .push((event.success, event.last_block_number))
        })
        .build()
        .open()
}

pub(crate) struct TestChain {
    pub(crate) chain: Chain<MemDB>,
    pub(crate) kv_store: MemDB,
    pub(crate) events: EventLog,
    configuration: Configuration,
    genesis: Genesis,
    keys: HashMap<AccountName, Keypair>,
    data_dir: TempDir,
}

impl TestChain {
    pub(crate) fn new(
        configuration: Configuration,
        genesis: Genesis,
        keys: Vec<(AccountName, Keypair)>,
    ) -> TestChain {
        let data_dir = tempfile::tempdir().unwrap();
        let kv_store = MemDB::new();
        let events = EventLog::default();
        let chain = open_chain(
            kv_store.clone(),
            data_dir.path(),
            configuration.clone(),
            genesis.clone(),
            &events,
        )
        .unwrap();
        TestChain {
            chain,
            kv_store,
            events,
            configuration,
            genesis,
            keys: keys.into_iter().collect(),
            data_dir,
        }
    }

    /// A chain with `initminer` as its only witness.
    pub(crate) fn single_witness() -> TestChain {
        let (genesis, keys) = test_genesis(0);
        TestChain::new(test_configuration(), genesis, keys)
    }

    /// Close the chain and open it again over the same key-value store and block log.
    pub(crate) fn reopen(self) -> TestChain {
        let TestChain {
            chain,
            kv_store,
            events,
            configuration,
            genesis,
            keys,
            data_dir,
        } = self;
        chain.close().unwrap();
        let chain = open_chain(
            kv_store.clone(),
            data_dir.path(),
            configuration.clone(),
            genesis.clone(),
            &events,
        )
        .unwrap();
        TestChain {
            chain,
            kv_store,
            events,
            configuration,
            genesis,
            keys,
            data_dir,
        }
    }

    /// Open a second, independent chain from the same configuration and genesis, with its own storage.
    pub(crate) fn sibling(&self) -> TestChain {
        TestChain::new(
            self.configuration.clone(),
            self.genesis.clone(),
            self.keys
                .iter()
                .map(|(name, keypair)| (name.clone(), keypair.clone()))
                .collect(),
        )
    }

    /// Take the chain out, together with the directory its block log lives in.
    pub(crate) fn into_parts(self) -> (Chain<MemDB>, TempDir) {
        (self.chain, self.data_dir)
    }

    pub(crate) fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub(crate) fn add_key(&mut self, name: &str, keypair: Keypair) {
        self.keys.insert(AccountName::from(name), keypair);
    }

    pub(crate) fn keypair(&self, name: &str) -> &Keypair {
        &self.keys[&AccountName::from(name)]
    }

    /// Produce a block in the first slot after the head whose witness this chain holds the key of.
    pub(crate) fn produce_block(&mut self) -> SignedBlock {
        let slot = (1..)
            .find(|slot| {
                let witness = self.chain.get_scheduled_witness(*slot).unwrap();
                self.keys.contains_key(&witness)
            })
            .unwrap();
        self.produce_block_at_slot(slot)
    }

    pub(crate) fn produce_block_at_slot(&mut self, slot: u32) -> SignedBlock {
        self.try_produce_block_at_slot(slot).unwrap()
    }

    pub(crate) fn try_produce_block_at_slot(&mut self, slot: u32) -> Result<SignedBlock, ChainError> {
        let when = self.chain.get_slot_time(slot)?;
        let witness = self.chain.get_scheduled_witness(slot)?;
        let keypair = self.keys[&witness].clone();
        self.chain
            .generate_block(when, &witness, &keypair, SkipFlags::empty())
    }

    pub(crate) fn produce_blocks(&mut self, count: u32) -> Vec<SignedBlock> {
        (0..count).map(|_| self.produce_block()).collect()
    }

    /// A transaction of `operations` anchored to the head block, expiring a minute after it, and signed
    /// by `signer`.
    pub(crate) fn transaction(&self, operations: Vec<Operation>, signer: &str) -> SignedTransaction {
        let expiration = self.chain.head_block_time().unwrap() + 60;
        let mut transaction = Transaction::new(expiration, operations);
        transaction.set_reference_block(&self.chain.head_block_id().unwrap());
        self.sign(transaction, signer)
    }

    pub(crate) fn sign(&self, transaction: Transaction, signer: &str) -> SignedTransaction {
        let mut signed = SignedTransaction::new(transaction);
        signed.sign(self.keypair(signer), &self.configuration.chain_id);
        signed
    }

    pub(crate) fn push_transaction(
        &mut self,
        operations: Vec<Operation>,
        signer: &str,
    ) -> Result<SignedTransaction, ChainError> {
        let trx = self.transaction(operations, signer);
        self.chain
            .push_transaction(trx.clone(), SkipFlags::empty())?;
        Ok(trx)
    }

    pub(crate) fn transfer(&mut self, from: &str, to: &str, amount: i64) -> Result<SignedTransaction, ChainError> {
        self.push_transaction(vec![transfer_operation(from, to, amount)], from)
    }

    pub(crate) fn balance(&self, name: &str) -> i64 {
        self.chain
            .get_account(&AccountName::from(name))
            .unwrap()
            .balance
            .amount
    }

    pub(crate) fn head_block_num(&self) -> u32 {
        self.chain.head_block_num().unwrap().int()
    }

    pub(crate) fn state_hash(&self) -> [u8; 32] {
        self.chain.store().content_hash()
    }
}

pub(crate) fn transfer_operation(from: &str, to: &str, amount: i64) -> Operation {
    Operation::Transfer(TransferOperation {
        from: AccountName::from(from),
        to: AccountName::from(to),
        amount: Asset::native(amount),
        memo: String::new(),
    })
}
