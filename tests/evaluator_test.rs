/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of operation dispatch: evaluator and interpreter registration, and how the chain applies the
//! custom operations of an application.

use std::path::Path;

use dpos_chain::chain::{Chain, ChainError, ChainSpec, SkipFlags};
use dpos_chain::evaluator::{
    CustomInterpreterRegistry, CustomOperationEvaluator, CustomOperationInterpreter, CustomPayload,
    EvaluationContext, EvaluatorError, EvaluatorRegistry, RegistryError,
};
use dpos_chain::objects::account::AccountByName;
use dpos_chain::objects::Account;
use dpos_chain::types::basic::AccountName;
use dpos_chain::types::operation::{CustomBinaryOperation, CustomJsonOperation, Operation, OperationTag};

mod common;

use common::evaluators::{test_evaluators, TransferEvaluator};
use common::mem_db::MemDB;
use common::test_chain::{
    init_miner, keypair_of, test_configuration, test_genesis, transfer_operation, TestChain,
    INITIAL_SUPPLY, INIT_MINER,
};

const TIP_APP: u64 = 7;

/// Moves the amount given as the JSON payload from the sender to each recipient.
struct TipInterpreter;

impl CustomOperationInterpreter for TipInterpreter {
    fn apply(
        &self,
        ctx: &mut EvaluationContext<'_>,
        payload: CustomPayload<'_>,
    ) -> Result<(), EvaluatorError> {
        let op = match payload {
            CustomPayload::Json(op) => op,
            CustomPayload::Binary(_) => return Err(EvaluatorError::rejected("tips are sent as JSON")),
        };
        let amount: i64 = op
            .json
            .trim()
            .parse()
            .map_err(|_| EvaluatorError::rejected(format!("{:?} is not an amount", op.json)))?;
        for recipient in &op.recipients {
            ctx.store
                .modify_by::<Account, AccountByName, _>(&op.sender, |account| {
                    account.balance.amount -= amount
                })?;
            ctx.store
                .modify_by::<Account, AccountByName, _>(recipient, |account| {
                    account.balance.amount += amount
                })?;
        }
        Ok(())
    }
}

fn tip(app_id: u64, json: &str, recipients: &[&str]) -> Operation {
    Operation::CustomJson(CustomJsonOperation {
        app_id,
        sender: init_miner(),
        recipients: recipients.iter().map(|name| AccountName::from(*name)).collect(),
        json: String::from(json),
    })
}

/// A single-witness chain like [`TestChain::single_witness`], which also interprets tips.
fn open_tipping_chain(data_dir: &Path) -> Chain<MemDB> {
    let mut interpreters = CustomInterpreterRegistry::new();
    interpreters.register(TIP_APP, TipInterpreter).unwrap();
    let (genesis, _) = test_genesis(0);
    ChainSpec::builder()
        .kv_store(MemDB::new())
        .data_dir(data_dir.to_path_buf())
        .configuration(test_configuration())
        .genesis(genesis)
        .evaluators(test_evaluators())
        .custom_interpreters(interpreters)
        .validate_invariants(true)
        .build()
        .open()
        .unwrap()
}

fn balance(chain: &Chain<MemDB>, name: &str) -> i64 {
    chain.get_account(&AccountName::from(name)).unwrap().balance.amount
}

/// Each operation variant and each application takes at most one handler.
#[test]
fn registry_conflicts_test() {
    let mut evaluators = EvaluatorRegistry::with_builtins();
    assert!(evaluators.is_registered(OperationTag::CustomJson));
    assert!(evaluators.is_registered(OperationTag::CustomBinary));
    assert!(evaluators.is_registered(OperationTag::SponsorFees));
    evaluators.register(TransferEvaluator).unwrap();
    assert_eq!(
        evaluators.register(TransferEvaluator),
        Err(RegistryError::DuplicateEvaluator(OperationTag::Transfer))
    );
    assert_eq!(
        evaluators.register(CustomOperationEvaluator::json()),
        Err(RegistryError::DuplicateEvaluator(OperationTag::CustomJson))
    );

    let mut interpreters = CustomInterpreterRegistry::new();
    interpreters.register(TIP_APP, TipInterpreter).unwrap();
    assert_eq!(
        interpreters.register(TIP_APP, TipInterpreter),
        Err(RegistryError::DuplicateInterpreter(TIP_APP))
    );
    assert!(interpreters.get(TIP_APP).is_some());
    assert!(interpreters.get(TIP_APP + 1).is_none());
}

/// An operation without an evaluator fails to dispatch, and a transaction carrying one is rejected.
#[test]
fn missing_evaluator_test() {
    let evaluators = EvaluatorRegistry::new();
    let transfer = transfer_operation(INIT_MINER, "temp", 1);
    assert!(matches!(
        evaluators.get(&transfer),
        Err(EvaluatorError::NoEvaluator(OperationTag::Transfer))
    ));

    let data_dir = tempfile::tempdir().unwrap();
    let (genesis, keys) = test_genesis(0);
    let mut chain = ChainSpec::builder()
        .kv_store(MemDB::new())
        .data_dir(data_dir.path())
        .configuration(test_configuration())
        .genesis(genesis.clone())
        .evaluators(EvaluatorRegistry::with_builtins())
        .build()
        .open()
        .unwrap();

    // Sign with a chain that has the same genesis.
    let signer = TestChain::new(test_configuration(), genesis, keys);
    let trx = signer.transaction(vec![transfer], INIT_MINER);
    assert!(matches!(
        chain.push_transaction(trx, SkipFlags::empty()),
        Err(ChainError::Evaluator(EvaluatorError::NoEvaluator(OperationTag::Transfer)))
    ));
    assert_eq!(balance(&chain, "temp"), 0);
}

/// Custom operations reach the interpreter registered for their application. Operations of other
/// applications are accepted and change nothing.
#[test]
fn custom_operation_routing_test() {
    let mut producer = TestChain::single_witness();
    let data_dir = tempfile::tempdir().unwrap();
    let mut tipping = open_tipping_chain(data_dir.path());

    producer
        .push_transaction(vec![tip(TIP_APP, "25", &["temp", "miners"])], INIT_MINER)
        .unwrap();
    let block = producer.produce_block();
    assert!(tipping.push_block(block, SkipFlags::empty()).unwrap());
    assert_eq!(balance(&tipping, "temp"), 25);
    assert_eq!(balance(&tipping, "miners"), 25);
    assert_eq!(balance(&tipping, INIT_MINER), INITIAL_SUPPLY - 50);

    // The producer has no interpreter for tips.
    assert_eq!(producer.balance("temp"), 0);

    let other_app = producer.transaction(vec![tip(TIP_APP + 1, "25", &["temp"])], INIT_MINER);
    tipping
        .push_transaction(other_app, SkipFlags::empty())
        .unwrap();
    assert_eq!(tipping.pending_transactions().len(), 1);
    assert_eq!(balance(&tipping, "temp"), 25);

    let binary = producer.transaction(
        vec![Operation::CustomBinary(CustomBinaryOperation {
            app_id: TIP_APP,
            sender: init_miner(),
            recipients: vec![AccountName::from("temp")],
            data: vec![25],
        })],
        INIT_MINER,
    );
    assert!(matches!(
        tipping.push_transaction(binary, SkipFlags::empty()),
        Err(ChainError::Evaluator(EvaluatorError::Rejected(_)))
    ));
    tipping.validate_invariants().unwrap();
}

/// A failing interpreter fails the transaction when the node accepts it into its pending pool, but is
/// logged and skipped when it comes in a block, with its partial changes undone.
#[test]
fn failing_custom_operation_test() {
    common::logging::setup_logger(log::LevelFilter::Warn);
    let mut producer = TestChain::single_witness();
    let data_dir = tempfile::tempdir().unwrap();
    let mut tipping = open_tipping_chain(data_dir.path());

    // The second recipient does not exist, after the first has been paid.
    let trx = producer.transaction(vec![tip(TIP_APP, "10", &["temp", "nobody"])], INIT_MINER);
    assert!(matches!(
        tipping.push_transaction(trx.clone(), SkipFlags::empty()),
        Err(ChainError::Evaluator(EvaluatorError::Store(_)))
    ));
    assert!(tipping.pending_transactions().is_empty());

    producer
        .chain
        .push_transaction(trx, SkipFlags::empty())
        .unwrap();
    let block = producer.produce_block();
    assert!(tipping.push_block(block.clone(), SkipFlags::empty()).unwrap());
    assert_eq!(tipping.head_block_id().unwrap(), block.id());
    assert!(tipping.is_known_transaction(&block.transactions[0].id()).unwrap());
    assert_eq!(balance(&tipping, "temp"), 0);
    assert_eq!(balance(&tipping, INIT_MINER), INITIAL_SUPPLY);
    tipping.validate_invariants().unwrap();
}

/// A transaction whose interpreter failed in a received block does not come back to the pending pool when
/// that block is popped: it is re-applied under the same rules as a newly pushed transaction, and dropped.
#[test]
fn failing_custom_operation_not_restored_test() {
    let mut producer = TestChain::single_witness();
    let data_dir = tempfile::tempdir().unwrap();
    let mut tipping = open_tipping_chain(data_dir.path());

    let trx = producer.transaction(vec![tip(TIP_APP, "10", &["temp", "nobody"])], INIT_MINER);
    producer
        .chain
        .push_transaction(trx.clone(), SkipFlags::empty())
        .unwrap();
    let block = producer.produce_block();
    tipping.push_block(block.clone(), SkipFlags::empty()).unwrap();

    tipping.pop_block().unwrap();
    assert_eq!(tipping.popped_transactions(), &[trx]);

    let when = tipping.get_slot_time(2).unwrap();
    let next = tipping
        .generate_block(when, &init_miner(), &keypair_of(1), SkipFlags::empty())
        .unwrap();
    assert!(next.transactions.is_empty());
    assert!(tipping.popped_transactions().is_empty());
    assert!(tipping.pending_transactions().is_empty());
    assert_eq!(balance(&tipping, "temp"), 0);
    tipping.validate_invariants().unwrap();
}
