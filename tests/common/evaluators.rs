//! Business rules for the operations the tests use: native transfers, vesting, account creation, witness
//! votes and updates, exchange rate feeds, escrow transfers, and account recovery requests. Every rule keeps the native supply
//! accounted for, so chains opened with these evaluators can run with invariant validation on.

use dpos_chain::config::{ACCOUNT_RECOVERY_REQUEST_EXPIRATION_PERIOD, VESTING_WITHDRAW_INTERVAL_SECONDS};
use dpos_chain::evaluator::{EvaluationContext, Evaluator, EvaluatorError, EvaluatorRegistry};
use dpos_chain::objects::account::AccountByName;
use dpos_chain::objects::escrow::EscrowByFromId;
use dpos_chain::objects::recovery::RecoveryRequestByAccount;
use dpos_chain::objects::witness::{VoteByAccountWitness, WitnessByOwner};
use dpos_chain::objects::{
    Account, AccountAuthority, AccountRecoveryRequest, DynamicGlobalProperties, Escrow, Witness,
    WitnessVote,
};
use dpos_chain::state::{Object, StateStore};
use dpos_chain::types::basic::{AccountName, Asset, AssetSymbol, Timestamp};
use dpos_chain::types::operation::{Operation, OperationTag};
use dpos_chain::witness_schedule::adjust_witness_votes;

/// Vesting withdrawals are paid out in this many installments.
pub(crate) const VESTING_WITHDRAW_INTERVALS: i64 = 4;

/// A registry with the built-in evaluators and every evaluator in this module.
pub(crate) fn test_evaluators() -> EvaluatorRegistry {
    let mut registry = EvaluatorRegistry::with_builtins();
    registry.register(TransferEvaluator).unwrap();
    registry.register(TransferToVestingEvaluator).unwrap();
    registry.register(WithdrawVestingEvaluator).unwrap();
    registry.register(AccountCreateEvaluator).unwrap();
    registry.register(AccountWitnessVoteEvaluator).unwrap();
    registry.register(WitnessUpdateEvaluator).unwrap();
    registry.register(FeedPublishEvaluator).unwrap();
    registry.register(EscrowTransferEvaluator).unwrap();
    registry.register(RequestAccountRecoveryEvaluator).unwrap();
    registry
}

fn wrong_operation(expected: OperationTag, op: &Operation) -> EvaluatorError {
    EvaluatorError::WrongOperation {
        expected,
        got: op.tag(),
    }
}

fn require_account(store: &StateStore, name: &AccountName) -> Result<(), EvaluatorError> {
    match store.find::<Account, AccountByName>(name)? {
        Some(_) => Ok(()),
        None => Err(EvaluatorError::rejected(format!(
            "account {} does not exist",
            name
        ))),
    }
}

fn debit(store: &mut StateStore, name: &AccountName, amount: Asset) -> Result<(), EvaluatorError> {
    let account = store.get::<Account, AccountByName>(name)?;
    let balance = account
        .balance
        .checked_sub(&amount)
        .filter(|balance| balance.amount >= 0)
        .ok_or_else(|| {
            EvaluatorError::rejected(format!(
                "{} has {}, cannot spend {}",
                name, account.balance, amount
            ))
        })?;
    store.modify_by::<Account, AccountByName, _>(name, |account| account.balance = balance)?;
    Ok(())
}

fn credit(store: &mut StateStore, name: &AccountName, amount: Asset) -> Result<(), EvaluatorError> {
    store.modify_by::<Account, AccountByName, _>(name, |account| {
        account.balance.amount += amount.amount
    })?;
    Ok(())
}

/// Move `amount` of the native asset into `name`'s vesting shares, one share per unit.
fn vest(store: &mut StateStore, name: &AccountName, amount: i64) -> Result<(), EvaluatorError> {
    store.modify_by::<Account, AccountByName, _>(name, |account| {
        account.vesting_shares.amount += amount
    })?;
    let dgp_id = store.singleton::<DynamicGlobalProperties>()?.id();
    store.modify::<DynamicGlobalProperties, _>(dgp_id, |dgp| {
        dgp.total_vesting_fund.amount += amount;
        dgp.total_vesting_shares.amount += amount;
    })?;
    adjust_witness_votes(store, name, amount)?;
    Ok(())
}

pub(crate) struct TransferEvaluator;

impl Evaluator for TransferEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::Transfer
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::Transfer(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        if op.amount.symbol != AssetSymbol::NATIVE {
            return Err(EvaluatorError::rejected("only the native asset can be transferred"));
        }
        require_account(ctx.store, &op.to)?;
        debit(ctx.store, &op.from, op.amount)?;
        credit(ctx.store, &op.to, op.amount)
    }
}

pub(crate) struct TransferToVestingEvaluator;

impl Evaluator for TransferToVestingEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::TransferToVesting
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::TransferToVesting(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        require_account(ctx.store, &op.to)?;
        debit(ctx.store, &op.from, op.amount)?;
        vest(ctx.store, &op.to, op.amount.amount)
    }
}

pub(crate) struct WithdrawVestingEvaluator;

impl Evaluator for WithdrawVestingEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::WithdrawVesting
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::WithdrawVesting(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        let account = ctx.store.get::<Account, AccountByName>(&op.account)?;
        let to_withdraw = op.vesting_shares.amount;
        if account.vesting_shares.amount < to_withdraw {
            return Err(EvaluatorError::rejected(format!(
                "{} has only {}",
                op.account, account.vesting_shares
            )));
        }

        let rate = if to_withdraw == 0 {
            0
        } else {
            (to_withdraw / VESTING_WITHDRAW_INTERVALS).max(1)
        };
        let next = if rate == 0 {
            Timestamp::MAX
        } else {
            ctx.head_block_time + VESTING_WITHDRAW_INTERVAL_SECONDS
        };
        ctx.store
            .modify_by::<Account, AccountByName, _>(&op.account, |account| {
                account.vesting_withdraw_rate = Asset::vests(rate);
                account.to_withdraw = to_withdraw;
                account.withdrawn = 0;
                account.next_vesting_withdrawal = next;
            })?;
        Ok(())
    }
}

pub(crate) struct AccountCreateEvaluator;

impl Evaluator for AccountCreateEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::AccountCreate
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::AccountCreate(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        if ctx
            .store
            .find::<Account, AccountByName>(&op.new_account_name)?
            .is_some()
        {
            return Err(EvaluatorError::rejected(format!(
                "account {} already exists",
                op.new_account_name
            )));
        }
        debit(ctx.store, &op.creator, op.fee)?;

        let now = ctx.head_block_time;
        ctx.store.create::<Account, _>(|account| {
            account.name = op.new_account_name.clone();
            account.memo_key = op.memo_key;
            account.recovery_account = op.creator.clone();
            account.created = now;
        })?;
        ctx.store.create::<AccountAuthority, _>(|authority| {
            authority.account = op.new_account_name.clone();
            authority.owner = op.owner.clone();
            authority.active = op.active.clone();
            authority.last_owner_update = now;
        })?;

        // The creation fee is vested in the new account.
        vest(ctx.store, &op.new_account_name, op.fee.amount)
    }
}

pub(crate) struct AccountWitnessVoteEvaluator;

impl Evaluator for AccountWitnessVoteEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::AccountWitnessVote
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::AccountWitnessVote(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        if ctx.store.find::<Witness, WitnessByOwner>(&op.witness)?.is_none() {
            return Err(EvaluatorError::rejected(format!("{} is not a witness", op.witness)));
        }
        let weight = ctx
            .store
            .get::<Account, AccountByName>(&op.account)?
            .vesting_shares
            .amount;
        let existing = ctx
            .store
            .find::<WitnessVote, VoteByAccountWitness>(&(op.account.clone(), op.witness.clone()))?
            .map(|vote| vote.id());

        match (op.approve, existing) {
            (true, None) => {
                ctx.store.create::<WitnessVote, _>(|vote| {
                    vote.account = op.account.clone();
                    vote.witness = op.witness.clone();
                })?;
                ctx.store
                    .modify_by::<Witness, WitnessByOwner, _>(&op.witness, |witness| {
                        witness.votes += weight
                    })?;
                ctx.store
                    .modify_by::<Account, AccountByName, _>(&op.account, |account| {
                        account.witnesses_voted_for += 1
                    })?;
            }
            (false, Some(id)) => {
                ctx.store.remove::<WitnessVote>(id)?;
                ctx.store
                    .modify_by::<Witness, WitnessByOwner, _>(&op.witness, |witness| {
                        witness.votes -= weight
                    })?;
                ctx.store
                    .modify_by::<Account, AccountByName, _>(&op.account, |account| {
                        account.witnesses_voted_for -= 1
                    })?;
            }
            (true, Some(_)) => {
                return Err(EvaluatorError::rejected("already voted for this witness"))
            }
            (false, None) => return Err(EvaluatorError::rejected("no vote to remove")),
        }
        Ok(())
    }
}

pub(crate) struct WitnessUpdateEvaluator;

impl Evaluator for WitnessUpdateEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::WitnessUpdate
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::WitnessUpdate(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        require_account(ctx.store, &op.owner)?;
        if ctx.store.find::<Witness, WitnessByOwner>(&op.owner)?.is_some() {
            ctx.store
                .modify_by::<Witness, WitnessByOwner, _>(&op.owner, |witness| {
                    witness.url = op.url.clone();
                    witness.signing_key = Some(op.block_signing_key);
                    witness.props = op.props.clone();
                })?;
        } else {
            let now = ctx.head_block_time;
            ctx.store.create::<Witness, _>(|witness| {
                witness.owner = op.owner.clone();
                witness.created = now;
                witness.url = op.url.clone();
                witness.signing_key = Some(op.block_signing_key);
                witness.props = op.props.clone();
                witness.hardfork_time_vote = now;
            })?;
        }
        Ok(())
    }
}

pub(crate) struct FeedPublishEvaluator;

impl Evaluator for FeedPublishEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::FeedPublish
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::FeedPublish(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        if op.exchange_rate.base.symbol != AssetSymbol::NATIVE {
            return Err(EvaluatorError::rejected("exchange rates are quoted for the native asset"));
        }
        if ctx.store.find::<Witness, WitnessByOwner>(&op.publisher)?.is_none() {
            return Err(EvaluatorError::rejected(format!("{} is not a witness", op.publisher)));
        }
        let now = ctx.head_block_time;
        ctx.store
            .modify_by::<Witness, WitnessByOwner, _>(&op.publisher, |witness| {
                witness
                    .exchange_rates
                    .insert(op.exchange_rate.quote.symbol, op.exchange_rate);
                witness.last_exchange_update = now;
            })?;
        Ok(())
    }
}

pub(crate) struct EscrowTransferEvaluator;

impl Evaluator for EscrowTransferEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::EscrowTransfer
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::EscrowTransfer(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        if op.ratification_deadline <= ctx.head_block_time {
            return Err(EvaluatorError::rejected("ratification deadline has passed"));
        }
        require_account(ctx.store, &op.to)?;
        require_account(ctx.store, &op.agent)?;
        if ctx
            .store
            .find::<Escrow, EscrowByFromId>(&(op.from.clone(), op.escrow_id))?
            .is_some()
        {
            return Err(EvaluatorError::rejected(format!(
                "escrow {} of {} already exists",
                op.escrow_id, op.from
            )));
        }

        let total = op
            .amount
            .checked_add(&op.escrow_fee)
            .ok_or_else(|| EvaluatorError::rejected("escrow amount overflows"))?;
        debit(ctx.store, &op.from, total)?;
        ctx.store.create::<Escrow, _>(|escrow| {
            escrow.escrow_id = op.escrow_id;
            escrow.from = op.from.clone();
            escrow.to = op.to.clone();
            escrow.agent = op.agent.clone();
            escrow.ratification_deadline = op.ratification_deadline;
            escrow.escrow_expiration = op.escrow_expiration;
            escrow.balance = op.amount;
            escrow.pending_fee = op.escrow_fee;
        })?;
        Ok(())
    }
}

/// Only an account's recovery account may ask to reset its owner authority. A new request replaces the
/// last one.
pub(crate) struct RequestAccountRecoveryEvaluator;

impl Evaluator for RequestAccountRecoveryEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::RequestAccountRecovery
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::RequestAccountRecovery(op) => op,
            _ => return Err(wrong_operation(self.tag(), op)),
        };
        let account = ctx.store.get::<Account, AccountByName>(&op.account_to_recover)?;
        if account.recovery_account != op.recovery_account {
            return Err(EvaluatorError::rejected(format!(
                "{} is not the recovery account of {}",
                op.recovery_account, op.account_to_recover
            )));
        }
        if let Some(request) = ctx
            .store
            .find::<AccountRecoveryRequest, RecoveryRequestByAccount>(&op.account_to_recover)?
        {
            let id = request.id();
            ctx.store.remove::<AccountRecoveryRequest>(id)?;
        }
        let expires = ctx.head_block_time + ACCOUNT_RECOVERY_REQUEST_EXPIRATION_PERIOD;
        ctx.store.create::<AccountRecoveryRequest, _>(|request| {
            request.account_to_recover = op.account_to_recover.clone();
            request.new_owner_authority = op.new_owner_authority.clone();
            request.expires = expires;
        })?;
        Ok(())
    }
}
