/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of the block and transaction pipeline: producing and pushing blocks, the pending transaction
//! pool, fork switches, and the checks blocks and transactions must pass.

use std::collections::BTreeMap;
use std::thread;

use log::LevelFilter;

use dpos_chain::chain::{ChainError, ErrorClass, SharedChain, SkipFlags};
use dpos_chain::config::{Configuration, ConfigurationError, StoragePolicy};
use dpos_chain::evaluator::EvaluatorError;
use dpos_chain::state::StoreError;
use dpos_chain::types::authority::{Authority, AuthorityError};
use dpos_chain::types::basic::{AccountName, Asset, BlockId, BlockNumber, ChainId};
use dpos_chain::types::block::SignedBlock;
use dpos_chain::types::operation::{AccountCreateOperation, Operation, OperationTag, ValidationError};
use dpos_chain::types::transaction::{SignedTransaction, Transaction};

mod common;

use common::logging::{log_with_head, setup_logger};
use common::mem_db::MemDB;
use common::test_chain::{
    init_miner, keypair_of, open_chain, test_configuration, test_genesis, transfer_operation, EventLog,
    TestChain, INITIAL_SUPPLY, INIT_MINER,
};

/// Create `name` with a single-key authority from `seed`, and hand its key to the test chain.
fn create_account(test_chain: &mut TestChain, name: &str, seed: u8) {
    let keypair = keypair_of(seed);
    let op = Operation::AccountCreate(AccountCreateOperation {
        fee: Asset::native(0),
        creator: init_miner(),
        new_account_name: AccountName::from(name),
        owner: Authority::single_key(keypair.public()),
        active: Authority::single_key(keypair.public()),
        memo_key: keypair.public(),
        json_metadata: String::new(),
    });
    test_chain.push_transaction(vec![op], INIT_MINER).unwrap();
    test_chain.add_key(name, keypair);
}

/// A single witness produces an unbroken run of blocks, each in the first slot after the head.
#[test]
fn produce_blocks_test() {
    setup_logger(LevelFilter::Info);
    let mut test_chain = TestChain::single_witness();
    let blocks = test_chain.produce_blocks(5);

    assert_eq!(test_chain.head_block_num(), 5);
    assert_eq!(test_chain.chain.head_block_id().unwrap(), blocks[4].id());
    assert_eq!(
        test_chain.chain.head_block_time().unwrap(),
        blocks[4].timestamp()
    );
    for (block, num) in blocks.iter().zip(1..) {
        assert_eq!(block.num(), BlockNumber::new(num));
        assert_eq!(block.witness(), &init_miner());
    }

    let dgp = test_chain.chain.dynamic_global_properties().unwrap();
    assert_eq!(dgp.recent_slots_filled, 0b11111);
    assert_eq!(dgp.participation_count, 5);
    assert_eq!(dgp.current_aslot, 5);
    assert_eq!(dgp.current_witness, init_miner());
    assert_eq!(test_chain.chain.get_witness(&init_miner()).unwrap().total_missed, 0);

    assert_eq!(
        *test_chain.events.applied_blocks.lock().unwrap(),
        (1..=5).map(BlockNumber::new).collect::<Vec<_>>()
    );
    log_with_head(&blocks[4].id().bytes(), "produced five blocks");
}

/// Transactions go to the pending pool, are included in the next block, and leave the pool once the
/// block is applied.
#[test]
fn pending_transactions_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_block();
    create_account(&mut test_chain, "alice", 10);
    let trx = test_chain.transfer(INIT_MINER, "alice", 400).unwrap();

    assert_eq!(test_chain.chain.pending_transactions().len(), 2);
    assert_eq!(test_chain.balance("alice"), 400);
    assert_eq!(test_chain.balance(INIT_MINER), INITIAL_SUPPLY - 400);
    assert!(test_chain.chain.is_known_transaction(&trx.id()).unwrap());
    assert_eq!(test_chain.events.pending_transactions.lock().unwrap().len(), 2);

    let block = test_chain.produce_block();
    assert_eq!(block.transactions.len(), 2);
    assert_eq!(block.transactions[1], trx);
    assert!(test_chain.chain.pending_transactions().is_empty());
    assert_eq!(test_chain.balance("alice"), 400);

    // The new account can spend what it received.
    test_chain.transfer("alice", INIT_MINER, 150).unwrap();
    test_chain.produce_block();
    assert_eq!(test_chain.balance("alice"), 250);

    // Clearing the pool undoes the pending changes.
    test_chain.transfer("alice", INIT_MINER, 50).unwrap();
    assert_eq!(test_chain.balance("alice"), 200);
    test_chain.chain.clear_pending().unwrap();
    assert_eq!(test_chain.balance("alice"), 250);
    assert!(test_chain.chain.pending_transactions().is_empty());
}

/// A transaction is only applied once, whether it is still pending or already in a block.
#[test]
fn duplicate_transaction_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_block();
    let trx = test_chain.transfer(INIT_MINER, "temp", 10).unwrap();

    let result = test_chain.chain.push_transaction(trx.clone(), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::DuplicateTransaction(id)) if id == trx.id()));

    test_chain.produce_block();
    let result = test_chain.chain.push_transaction(trx, SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::DuplicateTransaction(_))));
    assert_eq!(test_chain.balance("temp"), 10);
}

/// With the duplicate check skipped, the same transaction can be pushed again. Block production checks
/// for duplicates regardless.
#[test]
fn skipped_duplicate_check_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_block();
    let trx = test_chain.transaction(vec![transfer_operation(INIT_MINER, "temp", 10)], INIT_MINER);

    for _ in 0..2 {
        test_chain
            .chain
            .push_transaction(trx.clone(), SkipFlags::TRANSACTION_DUPE_CHECK)
            .unwrap();
    }
    assert_eq!(test_chain.chain.pending_transactions().len(), 2);
    assert_eq!(test_chain.balance("temp"), 20);

    let block = test_chain.produce_block();
    assert_eq!(block.transactions, vec![trx]);
    assert_eq!(test_chain.balance("temp"), 10);
}

/// Transactions must refer to a recent block of this chain, and expire within the allowed window.
#[test]
fn tapos_and_expiration_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_blocks(2);
    let head_time = test_chain.chain.head_block_time().unwrap();
    let head_id = test_chain.chain.head_block_id().unwrap();
    let ops = vec![transfer_operation(INIT_MINER, "temp", 1)];

    let mut wrong_prefix = Transaction::new(head_time + 60, ops.clone());
    wrong_prefix.set_reference_block(&head_id);
    wrong_prefix.ref_block_prefix ^= 1;
    let result = test_chain
        .chain
        .push_transaction(test_chain.sign(wrong_prefix, INIT_MINER), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::TaposMismatch { ref_block_num: 2 })));

    let mut expired = Transaction::new(head_time, ops.clone());
    expired.set_reference_block(&head_id);
    let result = test_chain
        .chain
        .push_transaction(test_chain.sign(expired, INIT_MINER), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::TransactionExpired { .. })));

    let max_expiration = test_chain.chain.configuration().max_time_until_expiration;
    let mut too_far = Transaction::new(head_time + max_expiration + 1, ops.clone());
    too_far.set_reference_block(&head_id);
    let result = test_chain
        .chain
        .push_transaction(test_chain.sign(too_far, INIT_MINER), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::ExpirationTooFar { .. })));

    // Without the TAPOS check, the reference block is not looked up.
    let mut unanchored = Transaction::new(head_time + 60, ops);
    unanchored.ref_block_num = 7;
    let unanchored = test_chain.sign(unanchored, INIT_MINER);
    test_chain
        .chain
        .push_transaction(unanchored, SkipFlags::TAPOS_CHECK)
        .unwrap();
    assert_eq!(test_chain.balance("temp"), 1);
}

/// A transaction must be signed by the authorities of the accounts it spends from, and by nobody else.
#[test]
fn transaction_authority_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_block();
    let chain_id = test_chain.chain.configuration().chain_id;

    let unsigned = SignedTransaction::new(
        test_chain
            .transaction(vec![transfer_operation(INIT_MINER, "temp", 1)], INIT_MINER)
            .transaction,
    );
    let result = test_chain.chain.push_transaction(unsigned.clone(), SkipFlags::empty());
    assert!(matches!(
        result,
        Err(ChainError::Authority(AuthorityError::MissingActiveAuthority(account))) if account == init_miner()
    ));

    let mut wrong_key = unsigned.clone();
    wrong_key.sign(&keypair_of(9), &chain_id);
    let result = test_chain.chain.push_transaction(wrong_key, SkipFlags::empty());
    assert!(matches!(
        result,
        Err(ChainError::Authority(AuthorityError::MissingActiveAuthority(_)))
    ));

    let mut extra_signature = unsigned.clone();
    extra_signature.sign(&keypair_of(1), &chain_id);
    extra_signature.sign(&keypair_of(9), &chain_id);
    let result = test_chain.chain.push_transaction(extra_signature, SkipFlags::empty());
    assert!(matches!(
        result,
        Err(ChainError::Authority(AuthorityError::IrrelevantSignature))
    ));

    // A signature for another chain does not count.
    let mut other_chain = unsigned.clone();
    other_chain.sign(&keypair_of(1), &ChainId::from_name("another-chain"));
    let result = test_chain.chain.push_transaction(other_chain, SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::Authority(_))));

    let mut signed = unsigned;
    signed.sign(&keypair_of(1), &chain_id);
    test_chain
        .chain
        .push_transaction(signed, SkipFlags::empty())
        .unwrap();
}

/// Malformed, oversized, and rejected transactions leave the pending state as it was.
#[test]
fn rejected_transaction_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_block();
    test_chain.transfer(INIT_MINER, "temp", 5).unwrap();
    let before = test_chain.state_hash();

    let result = test_chain.transfer(INIT_MINER, "temp", 0);
    assert!(matches!(
        result,
        Err(ChainError::Validation(ValidationError::NonPositiveAmount(_)))
    ));

    let result = test_chain.transfer(INIT_MINER, "temp", INITIAL_SUPPLY);
    assert!(matches!(
        result,
        Err(ChainError::Evaluator(EvaluatorError::Rejected(_)))
    ));

    let result = test_chain.transfer(INIT_MINER, "nobody", 5);
    assert!(matches!(result, Err(ChainError::Evaluator(_))));

    let result = test_chain.push_transaction(vec![], INIT_MINER);
    assert!(matches!(
        result,
        Err(ChainError::Validation(ValidationError::NoOperations))
    ));

    let mut oversized = transfer_operation(INIT_MINER, "temp", 5);
    if let Operation::Transfer(op) = &mut oversized {
        op.memo = "m".repeat(10_000);
    }
    let result = test_chain.push_transaction(vec![oversized], INIT_MINER);
    assert!(matches!(result, Err(ChainError::TransactionTooLarge { .. })));

    assert_eq!(test_chain.state_hash(), before);
    assert_eq!(test_chain.chain.pending_transactions().len(), 1);
}

/// Two chains that apply the same blocks end up in the same state.
#[test]
fn deterministic_state_test() {
    let mut producer = TestChain::single_witness();
    let mut follower = producer.sibling();

    let mut blocks = producer.produce_blocks(2);
    create_account(&mut producer, "alice", 10);
    producer.transfer(INIT_MINER, "alice", 1000).unwrap();
    blocks.push(producer.produce_block());
    producer.transfer("alice", "temp", 300).unwrap();
    blocks.push(producer.produce_block_at_slot(4));
    blocks.extend(producer.produce_blocks(3));

    for block in blocks {
        let switched = follower.chain.push_block(block, SkipFlags::empty()).unwrap();
        assert!(!switched);
    }
    assert_eq!(
        follower.chain.head_block_id().unwrap(),
        producer.chain.head_block_id().unwrap()
    );
    assert_eq!(follower.balance("alice"), 700);
    assert_eq!(follower.state_hash(), producer.state_hash());
}

/// A block that fails to apply is rejected as a whole: the state, the head, and the fork database are
/// as they were before it was pushed.
#[test]
fn invalid_block_is_atomic_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_blocks(2);
    let before = test_chain.state_hash();
    let head_id = test_chain.chain.head_block_id().unwrap();

    let good = test_chain.transaction(vec![transfer_operation(INIT_MINER, "temp", 10)], INIT_MINER);
    let overdrawn = test_chain.transaction(
        vec![transfer_operation(INIT_MINER, "temp", INITIAL_SUPPLY)],
        INIT_MINER,
    );
    let when = test_chain.chain.get_slot_time(1).unwrap();
    let mut block = SignedBlock::new(head_id, when, init_miner(), vec![good, overdrawn]);
    block.sign(&keypair_of(1));

    let result = test_chain.chain.push_block(block.clone(), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::Evaluator(_))));
    assert_eq!(test_chain.state_hash(), before);
    assert_eq!(test_chain.chain.head_block_id().unwrap(), head_id);
    assert_eq!(test_chain.chain.fork_db().head().unwrap().id, head_id);
    assert!(!test_chain.chain.is_known_block(&block.id()).unwrap());
    assert_eq!(test_chain.balance("temp"), 0);

    test_chain.produce_block();
    assert_eq!(test_chain.head_block_num(), 3);
}

/// Blocks are checked against the head, the witness schedule, and the witness's signing key.
#[test]
fn block_header_checks_test() {
    let (genesis, keys) = test_genesis(2);
    let mut test_chain = TestChain::new(test_configuration(), genesis, keys);
    let witness1 = AccountName::from("witness1");

    // The genesis schedule hands slot 1 to the second witness.
    assert_eq!(test_chain.chain.get_scheduled_witness(1).unwrap(), witness1);
    let slot_1 = test_chain.chain.get_slot_time(1).unwrap();

    let result = test_chain
        .chain
        .generate_block(slot_1, &init_miner(), &keypair_of(1), SkipFlags::empty());
    assert!(matches!(
        result,
        Err(ChainError::WrongWitness { scheduled, got }) if scheduled == witness1 && got == init_miner()
    ));

    let result = test_chain
        .chain
        .generate_block(slot_1, &witness1, &keypair_of(1), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::WrongSigningKey { .. })));

    let head_time = test_chain.chain.head_block_time().unwrap();
    let result = test_chain
        .chain
        .generate_block(head_time, &witness1, &keypair_of(2), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::NoSlot { .. })));

    let mut badly_signed = SignedBlock::new(BlockId::ZERO, slot_1, witness1.clone(), vec![]);
    badly_signed.sign(&keypair_of(1));
    let result = test_chain.chain.push_block(badly_signed, SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::BadWitnessSignature { .. })));

    let mut out_of_turn = SignedBlock::new(BlockId::ZERO, slot_1, init_miner(), vec![]);
    out_of_turn.sign(&keypair_of(1));
    let result = test_chain.chain.push_block(out_of_turn.clone(), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::WrongWitness { .. })));

    // Skipping the schedule check lets the same block through.
    test_chain
        .chain
        .push_block(out_of_turn, SkipFlags::WITNESS_SCHEDULE_CHECK)
        .unwrap();
    assert_eq!(test_chain.head_block_num(), 1);

    let block = test_chain.produce_block();
    let mut stale = SignedBlock::new(block.previous(), block.timestamp(), init_miner(), vec![]);
    stale.sign(&keypair_of(1));
    let result = test_chain.chain.push_block(stale, SkipFlags::FORK_DB);
    assert!(matches!(result, Err(ChainError::InvalidPrevious { .. })));

    let mut wrong_root = SignedBlock::new(block.id(), block.timestamp() + 3, init_miner(), vec![]);
    wrong_root.header.transaction_merkle_root = [7u8; 32];
    wrong_root.sign(&keypair_of(1));
    let result = test_chain.chain.push_block(wrong_root, SkipFlags::FORK_DB);
    assert!(matches!(result, Err(ChainError::MerkleMismatch { .. })));
    assert_eq!(test_chain.head_block_num(), 2);
}

/// Blocks up to the last checkpoint are applied without their signatures checked and without the fork
/// database, but must carry the checkpointed ids.
#[test]
fn checkpoint_test() {
    let mut producer = TestChain::single_witness();
    let blocks = producer.produce_blocks(3);

    let (genesis, keys) = test_genesis(0);
    let configuration = Configuration {
        checkpoints: BTreeMap::from([(BlockNumber::new(2), blocks[1].id())]),
        ..test_configuration()
    };
    let mut follower = TestChain::new(configuration, genesis.clone(), keys.clone());

    // Below the checkpoint, a block that does not build on the head is refused outright instead of
    // being kept aside as a fork.
    assert!(matches!(
        follower.chain.push_block(blocks[1].clone(), SkipFlags::empty()),
        Err(ChainError::InvalidPrevious { .. })
    ));
    assert!(!follower.chain.fork_db().is_known_block(&blocks[1].id()));

    // The header id does not cover the signature.
    let mut forged = blocks[0].clone();
    forged.sign(&keypair_of(9));
    assert_eq!(forged.id(), blocks[0].id());
    follower.chain.push_block(forged, SkipFlags::empty()).unwrap();
    follower
        .chain
        .push_block(blocks[1].clone(), SkipFlags::empty())
        .unwrap();
    assert_eq!(follower.chain.head_block_id().unwrap(), blocks[1].id());
    assert!(follower.chain.fork_db().is_known_block(&blocks[1].id()));

    // Past the checkpoint, every check applies again.
    let mut forged = blocks[2].clone();
    forged.sign(&keypair_of(9));
    assert!(matches!(
        follower.chain.push_block(forged, SkipFlags::empty()),
        Err(ChainError::BadWitnessSignature { .. })
    ));
    follower
        .chain
        .push_block(blocks[2].clone(), SkipFlags::empty())
        .unwrap();
    assert_eq!(follower.head_block_num(), 3);

    let wrong = Configuration {
        checkpoints: BTreeMap::from([(BlockNumber::new(1), blocks[1].id())]),
        ..test_configuration()
    };
    let mut follower = TestChain::new(wrong, genesis, keys);
    assert!(matches!(
        follower.chain.push_block(blocks[0].clone(), SkipFlags::empty()),
        Err(ChainError::CheckpointMismatch { block_num, .. }) if block_num == BlockNumber::new(1)
    ));
    assert_eq!(follower.head_block_num(), 0);
}

/// A longer fork takes over the head. The transactions of the blocks it pops go back to the pending pool.
#[test]
fn switch_fork_test() {
    let mut chain_a = TestChain::single_witness();
    let mut chain_b = chain_a.sibling();
    for block in chain_a.produce_blocks(2) {
        chain_b.chain.push_block(block, SkipFlags::empty()).unwrap();
    }
    let common_ancestor = chain_a.chain.head_block_id().unwrap();

    let trx = chain_a.transfer(INIT_MINER, "temp", 42).unwrap();
    let block_3 = chain_a.produce_block_at_slot(1);
    assert_eq!(block_3.transactions, vec![trx.clone()]);
    assert_eq!(chain_a.balance("temp"), 42);

    let fork_3 = chain_b.produce_block_at_slot(2);
    let fork_4 = chain_b.produce_block();

    // A fork of the same length does not take over.
    setup_logger(LevelFilter::Info);
    let switched = chain_a.chain.push_block(fork_3.clone(), SkipFlags::empty()).unwrap();
    assert!(!switched);
    assert_eq!(
        chain_a.chain.fork_db().fetch_block_by_number(BlockNumber::new(3)).len(),
        2
    );
    assert_eq!(chain_a.chain.head_block_id().unwrap(), block_3.id());
    assert_eq!(
        chain_a.chain.get_block_ids_on_fork(&fork_3.id()).unwrap(),
        vec![fork_3.id(), common_ancestor]
    );

    let switched = chain_a.chain.push_block(fork_4.clone(), SkipFlags::empty()).unwrap();
    assert!(switched);
    assert_eq!(chain_a.chain.head_block_id().unwrap(), fork_4.id());
    assert_eq!(
        *chain_a.events.switched_forks.lock().unwrap(),
        vec![(block_3.id(), fork_4.id())]
    );

    // The popped transfer applies again on the new fork, as a pending transaction.
    assert_eq!(chain_a.chain.pending_transactions(), &[trx]);
    assert_eq!(chain_a.balance("temp"), 42);
    chain_a.chain.clear_pending().unwrap();
    assert_eq!(chain_a.balance("temp"), 0);
    assert_eq!(chain_a.state_hash(), chain_b.state_hash());

    // Block 3 of the abandoned fork is still known, and can be switched back to.
    assert!(chain_a.chain.is_known_block(&block_3.id()).unwrap());
    assert_eq!(
        chain_a
            .chain
            .find_block_id_for_num(BlockNumber::new(3))
            .unwrap(),
        Some(fork_3.id())
    );
}

/// A longer fork whose last block fails to apply is abandoned: the original branch is applied again and
/// the failed block is forgotten.
#[test]
fn switch_to_invalid_fork_test() {
    let mut chain_a = TestChain::single_witness();
    let mut chain_b = chain_a.sibling();
    for block in chain_a.produce_blocks(2) {
        chain_b.chain.push_block(block, SkipFlags::empty()).unwrap();
    }

    chain_a.transfer(INIT_MINER, "temp", 42).unwrap();
    chain_a.produce_block_at_slot(1);
    let head = chain_a.produce_block();
    let before = chain_a.state_hash();

    let fork_3 = chain_b.produce_block_at_slot(2);
    let fork_4 = chain_b.produce_block();
    let overdrawn = chain_b.transaction(
        vec![transfer_operation(INIT_MINER, "temp", INITIAL_SUPPLY + 1)],
        INIT_MINER,
    );
    let when = chain_b.chain.get_slot_time(1).unwrap();
    let mut fork_5 = SignedBlock::new(fork_4.id(), when, init_miner(), vec![overdrawn]);
    fork_5.sign(&keypair_of(1));

    for block in [fork_3, fork_4] {
        let switched = chain_a.chain.push_block(block, SkipFlags::empty()).unwrap();
        assert!(!switched);
    }
    let result = chain_a.chain.push_block(fork_5.clone(), SkipFlags::empty());
    assert!(matches!(result, Err(ChainError::Evaluator(_))));

    assert_eq!(chain_a.chain.head_block_id().unwrap(), head.id());
    assert_eq!(chain_a.chain.fork_db().head().unwrap().id, head.id());
    assert_eq!(chain_a.state_hash(), before);
    assert_eq!(chain_a.balance("temp"), 42);
    assert!(!chain_a.chain.is_known_block(&fork_5.id()).unwrap());
    assert!(chain_a.events.switched_forks.lock().unwrap().is_empty());

    chain_a.produce_block();
    assert_eq!(chain_a.head_block_num(), 5);
}

/// Of two branches from a common ancestor at height 10, the 14-block one wins over the 13-block one as
/// soon as its last block arrives.
#[test]
fn long_fork_switch_test() {
    let mut chain_a = TestChain::single_witness();
    let mut chain_b = chain_a.sibling();
    for block in chain_a.produce_blocks(10) {
        chain_b.chain.push_block(block, SkipFlags::empty()).unwrap();
    }
    let common_ancestor = chain_a.chain.head_block_id().unwrap();

    let branch_a = chain_a.produce_blocks(3);
    let mut branch_b = vec![chain_b.produce_block_at_slot(2)];
    branch_b.extend(chain_b.produce_blocks(3));
    assert_eq!(chain_a.head_block_num(), 13);
    assert_eq!(chain_b.head_block_num(), 14);

    let (last, rest) = branch_b.split_last().unwrap();
    for block in rest {
        let switched = chain_a.chain.push_block(block.clone(), SkipFlags::empty()).unwrap();
        assert!(!switched);
        assert_eq!(chain_a.chain.head_block_id().unwrap(), branch_a[2].id());
    }
    let switched = chain_a.chain.push_block(last.clone(), SkipFlags::empty()).unwrap();
    assert!(switched);
    assert_eq!(chain_a.chain.head_block_id().unwrap(), last.id());
    assert_eq!(chain_a.head_block_num(), 14);

    assert_eq!(
        chain_a.chain.get_block_ids_on_fork(&branch_a[2].id()).unwrap(),
        vec![
            branch_a[2].id(),
            branch_a[1].id(),
            branch_a[0].id(),
            common_ancestor
        ]
    );
    assert_eq!(chain_a.state_hash(), chain_b.state_hash());
}

/// A fork that branches off below the last irreversible block is refused, however long it is.
#[test]
fn fork_below_irreversible_test() {
    let mut chain_a = TestChain::single_witness();
    let mut chain_b = chain_a.sibling();
    for block in chain_a.produce_blocks(6) {
        chain_b.chain.push_block(block, SkipFlags::empty()).unwrap();
    }

    let head = chain_a.produce_blocks(6).pop().unwrap();
    assert_eq!(chain_a.chain.last_irreversible_block_num().unwrap(), BlockNumber::new(7));

    let mut fork = vec![chain_b.produce_block_at_slot(2)];
    fork.extend(chain_b.produce_blocks(6));
    assert_eq!(chain_b.head_block_num(), 13);

    let (last, rest) = fork.split_last().unwrap();
    for block in rest {
        chain_a.chain.push_block(block.clone(), SkipFlags::empty()).unwrap();
    }
    let result = chain_a.chain.push_block(last.clone(), SkipFlags::empty());
    assert!(matches!(
        result,
        Err(ChainError::ForkBelowIrreversible { ancestor, last_irreversible })
            if ancestor == BlockNumber::new(6) && last_irreversible == BlockNumber::new(7)
    ));
    assert_eq!(chain_a.chain.head_block_id().unwrap(), head.id());
    assert_eq!(chain_a.chain.fork_db().head().unwrap().id, head.id());
    assert!(chain_a.events.switched_forks.lock().unwrap().is_empty());
}

/// Popping the head undoes it, keeps its transactions aside, and re-applies them after the next block.
#[test]
fn pop_block_test() {
    let mut test_chain = TestChain::single_witness();
    test_chain.produce_blocks(2);
    let before = test_chain.state_hash();
    let head_id = test_chain.chain.head_block_id().unwrap();

    let trx = test_chain.transfer(INIT_MINER, "temp", 7).unwrap();
    let block = test_chain.produce_block();

    let popped = test_chain.chain.pop_block().unwrap();
    assert_eq!(popped, block);
    assert_eq!(test_chain.chain.head_block_id().unwrap(), head_id);
    assert_eq!(test_chain.state_hash(), before);
    assert_eq!(test_chain.chain.popped_transactions(), &[trx.clone()]);
    assert_eq!(test_chain.balance("temp"), 0);

    test_chain.produce_block();
    assert!(test_chain.chain.popped_transactions().is_empty());
    assert_eq!(test_chain.chain.pending_transactions(), &[trx]);
    assert_eq!(test_chain.balance("temp"), 7);
}

/// Blocks can be looked up by number and id, whether reversible or irreversible.
#[test]
fn block_queries_test() {
    let mut test_chain = TestChain::single_witness();
    let blocks = test_chain.produce_blocks(8);

    // With five witnesses per round, the last irreversible block trails the head by five.
    assert_eq!(
        test_chain.chain.last_irreversible_block_num().unwrap(),
        BlockNumber::new(3)
    );
    assert_eq!(test_chain.chain.block_log().head_num(), BlockNumber::new(3));

    for block in &blocks {
        assert_eq!(
            test_chain.chain.fetch_block_by_number(block.num()).unwrap().as_ref(),
            Some(block)
        );
        assert_eq!(
            test_chain.chain.fetch_block_by_id(&block.id()).unwrap().as_ref(),
            Some(block)
        );
        assert_eq!(
            test_chain.chain.get_block_id_for_num(block.num()).unwrap(),
            block.id()
        );
        assert!(test_chain.chain.is_known_block(&block.id()).unwrap());
    }
    assert_eq!(
        test_chain
            .chain
            .find_block_id_for_num(BlockNumber::new(0))
            .unwrap(),
        Some(BlockId::ZERO)
    );
    assert_eq!(
        test_chain
            .chain
            .find_block_id_for_num(BlockNumber::new(9))
            .unwrap(),
        None
    );
    assert!(matches!(
        test_chain.chain.get_block_id_for_num(BlockNumber::new(9)),
        Err(ChainError::UnknownBlockNumber(_))
    ));
    assert!(test_chain
        .chain
        .fetch_block_by_number(BlockNumber::new(9))
        .unwrap()
        .is_none());

    let slot = test_chain.chain.get_slot_at_time(blocks[7].timestamp() + 7).unwrap();
    assert_eq!(slot, 2);
    assert_eq!(
        test_chain.chain.get_slot_time(2).unwrap(),
        blocks[7].timestamp() + 6
    );
}

/// Blocks pushed through a shared handle from another thread are visible to readers.
#[test]
fn shared_chain_test() {
    let mut producer = TestChain::single_witness();
    let follower = producer.sibling();
    let blocks = producer.produce_blocks(4);
    let (chain, _data_dir) = follower.into_parts();
    let shared = SharedChain::new(chain);

    let writer = shared.clone();
    let handle = thread::spawn(move || {
        for block in blocks {
            writer.push_block(block, SkipFlags::empty()).unwrap();
        }
    });
    handle.join().unwrap();

    assert_eq!(shared.read().head_block_num().unwrap(), BlockNumber::new(4));
    assert_eq!(
        shared.read().head_block_id().unwrap(),
        producer.chain.head_block_id().unwrap()
    );

    let trx = producer.transfer(INIT_MINER, "temp", 3).unwrap();
    shared.push_transaction(trx, SkipFlags::empty()).unwrap();
    assert_eq!(shared.read().pending_transactions().len(), 1);
}

/// Block assembly postpones transactions that do not fit, drops invalid ones, and stops on errors that
/// leave the node unable to continue.
#[test]
fn error_class_test() {
    let block_full = ChainError::BlockFull {
        size: 100,
        remaining: 10,
    };
    assert_eq!(block_full.class(), ErrorClass::Postponable);

    let missing = ChainError::Evaluator(EvaluatorError::Store(StoreError::NotFound { table: "account" }));
    assert_eq!(missing.class(), ErrorClass::Skippable);
    assert_eq!(
        ChainError::Evaluator(EvaluatorError::rejected("no")).class(),
        ErrorClass::Skippable
    );
    assert_eq!(ChainError::NothingToPop.class(), ErrorClass::Skippable);

    let unpaid = ChainError::InsufficientFee {
        payer: init_miner(),
        fee: 10,
        balance: 5,
    };
    assert_eq!(unpaid.class(), ErrorClass::Skippable);
    assert_eq!(
        ChainError::Configuration(ConfigurationError::ZeroBlockInterval).class(),
        ErrorClass::Fatal
    );

    let exhausted = ChainError::Store(StoreError::OutOfSpace { capacity: 1024 });
    assert_eq!(exhausted.class(), ErrorClass::Fatal);
    assert_eq!(
        ChainError::InvariantViolation(String::from("supply")).class(),
        ErrorClass::Fatal
    );
    assert_eq!(
        ChainError::MissingIrreversibleBlock(BlockNumber::new(1)).class(),
        ErrorClass::Fatal
    );
}

/// A chain opened with little storage grows it as the state fills up instead of refusing work.
#[test]
fn storage_growth_test() {
    let configuration = Configuration {
        storage: StoragePolicy::builder().initial_size_bytes(2048).build(),
        ..test_configuration()
    };
    let (genesis, keys) = test_genesis(0);
    let mut test_chain = TestChain::new(configuration, genesis, keys);
    test_chain.produce_block();

    for amount in 1..=200 {
        test_chain.transfer(INIT_MINER, "temp", amount).unwrap();
    }
    test_chain.produce_block();

    let store = test_chain.chain.store();
    assert!(store.capacity_bytes() > 2048);
    assert!(store.used_bytes() <= store.capacity_bytes());
    assert_eq!(test_chain.balance("temp"), (1..=200).sum::<i64>());
    test_chain.chain.validate_invariants().unwrap();
}

/// A chain does not open with parameters it cannot run with.
#[test]
fn configuration_validation_test() {
    let open = |configuration: Configuration, extra_witnesses: u8| {
        let data_dir = tempfile::tempdir().unwrap();
        let (genesis, _) = test_genesis(extra_witnesses);
        open_chain(
            MemDB::new(),
            data_dir.path(),
            configuration,
            genesis,
            &EventLog::default(),
        )
        .err()
    };

    let zero_interval = Configuration {
        block_interval: 0,
        ..test_configuration()
    };
    assert!(matches!(
        open(zero_interval, 0),
        Some(ChainError::Configuration(ConfigurationError::ZeroBlockInterval))
    ));
    assert!(matches!(
        open(test_configuration(), 5),
        Some(ChainError::Configuration(ConfigurationError::TooManyGenesisWitnesses {
            count: 6,
            max: 5
        }))
    ));

    let negative_fee = Configuration {
        operation_fees: BTreeMap::from([(OperationTag::Transfer, -1)]),
        ..test_configuration()
    };
    assert_eq!(
        negative_fee.validate(),
        Err(ConfigurationError::NegativeFee(OperationTag::Transfer, -1))
    );
    let unpaid_interest = Configuration {
        interest_rate: 100,
        interest_blocks: 0,
        ..test_configuration()
    };
    assert_eq!(unpaid_interest.validate(), Err(ConfigurationError::ZeroInterestBlocks));

    let no_feeds = Configuration {
        min_feeds: 0,
        ..test_configuration()
    };
    assert_eq!(no_feeds.validate(), Ok(()));
}
