/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The closed set of protocol operations.
//!
//! [`Operation`] is a tagged union with one variant per protocol action. Every consumer matches on it
//! exhaustively, so adding a variant is a compile error at every site that has to handle it: the
//! authority computation, the stateless validation, the fee payer, and the
//! [evaluator registry](crate::evaluator) tag.
//!
//! Virtual operations ([`Operation::is_virtual`]) are never submitted in transactions. The chain emits
//! them through the operation notifications so that observers see state transitions that are not caused
//! by a transaction, e.g., a hardfork being applied.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use super::authority::{Authority, RequiredAuthorities};
use super::basic::{AccountName, Asset, AssetSymbol, Price, Timestamp};
use super::crypto_primitives::PublicKeyBytes;
use super::witness_properties::{decode_witness_properties, ChainProperties, WitnessPropertiesError};

pub const MAX_MEMO_SIZE: usize = 2048;
pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransferOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub amount: Asset,
    pub memo: String,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransferToVestingOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub amount: Asset,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WithdrawVestingOperation {
    pub account: AccountName,
    pub vesting_shares: Asset,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountCreateOperation {
    pub fee: Asset,
    pub creator: AccountName,
    pub new_account_name: AccountName,
    pub owner: Authority,
    pub active: Authority,
    pub memo_key: PublicKeyBytes,
    pub json_metadata: String,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountUpdateOperation {
    pub account: AccountName,
    pub owner: Option<Authority>,
    pub active: Option<Authority>,
    pub memo_key: Option<PublicKeyBytes>,
    pub json_metadata: String,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WitnessUpdateOperation {
    pub owner: AccountName,
    pub url: String,
    pub block_signing_key: PublicKeyBytes,
    pub props: ChainProperties,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WitnessSetPropertiesOperation {
    pub owner: AccountName,
    pub props: BTreeMap<String, Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountWitnessVoteOperation {
    pub account: AccountName,
    pub witness: AccountName,
    pub approve: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeedPublishOperation {
    pub publisher: AccountName,
    pub exchange_rate: Price,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EscrowTransferOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub escrow_id: u32,
    pub amount: Asset,
    pub escrow_fee: Asset,
    pub ratification_deadline: Timestamp,
    pub escrow_expiration: Timestamp,
    pub json_meta: String,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EscrowApproveOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub who: AccountName,
    pub escrow_id: u32,
    pub approve: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EscrowDisputeOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub who: AccountName,
    pub escrow_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EscrowReleaseOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub who: AccountName,
    pub receiver: AccountName,
    pub escrow_id: u32,
    pub amount: Asset,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RequestAccountRecoveryOperation {
    pub recovery_account: AccountName,
    pub account_to_recover: AccountName,
    pub new_owner_authority: Authority,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RecoverAccountOperation {
    pub account_to_recover: AccountName,
    pub new_owner_authority: Authority,
    pub recent_owner_authority: Authority,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChangeRecoveryAccountOperation {
    pub account_to_recover: AccountName,
    pub new_recovery_account: AccountName,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CustomJsonOperation {
    pub app_id: u64,
    pub sender: AccountName,
    pub recipients: Vec<AccountName>,
    pub json: String,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CustomBinaryOperation {
    pub app_id: u64,
    pub sender: AccountName,
    pub recipients: Vec<AccountName>,
    pub data: Vec<u8>,
}

/// Start or stop paying the operation fees of `sponsored`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SponsorFeesOperation {
    pub sponsor: AccountName,
    pub sponsored: AccountName,
    pub is_sponsoring: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HardforkOperation {
    pub hardfork_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ShutdownWitnessOperation {
    pub owner: AccountName,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FillVestingWithdrawOperation {
    pub account: AccountName,
    pub withdrawn: Asset,
    pub deposited: Asset,
}

/// The block's producer was paid the fees collected since the previous block, as vesting shares.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProducerRewardOperation {
    pub producer: AccountName,
    pub vesting_shares: Asset,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InterestOperation {
    pub owner: AccountName,
    pub interest: Asset,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Operation {
    Transfer(TransferOperation),
    TransferToVesting(TransferToVestingOperation),
    WithdrawVesting(WithdrawVestingOperation),
    AccountCreate(AccountCreateOperation),
    AccountUpdate(AccountUpdateOperation),
    WitnessUpdate(WitnessUpdateOperation),
    WitnessSetProperties(WitnessSetPropertiesOperation),
    AccountWitnessVote(AccountWitnessVoteOperation),
    FeedPublish(FeedPublishOperation),
    EscrowTransfer(EscrowTransferOperation),
    EscrowApprove(EscrowApproveOperation),
    EscrowDispute(EscrowDisputeOperation),
    EscrowRelease(EscrowReleaseOperation),
    RequestAccountRecovery(RequestAccountRecoveryOperation),
    RecoverAccount(RecoverAccountOperation),
    ChangeRecoveryAccount(ChangeRecoveryAccountOperation),
    CustomJson(CustomJsonOperation),
    CustomBinary(CustomBinaryOperation),
    SponsorFees(SponsorFeesOperation),

    // Virtual operations.
    Hardfork(HardforkOperation),
    ShutdownWitness(ShutdownWitnessOperation),
    FillVestingWithdraw(FillVestingWithdrawOperation),
    ProducerReward(ProducerRewardOperation),
    Interest(InterestOperation),
}

/// The variant tag of an [`Operation`]. Evaluators are registered per tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationTag {
    Transfer,
    TransferToVesting,
    WithdrawVesting,
    AccountCreate,
    AccountUpdate,
    WitnessUpdate,
    WitnessSetProperties,
    AccountWitnessVote,
    FeedPublish,
    EscrowTransfer,
    EscrowApprove,
    EscrowDispute,
    EscrowRelease,
    RequestAccountRecovery,
    RecoverAccount,
    ChangeRecoveryAccount,
    CustomJson,
    CustomBinary,
    SponsorFees,
    Hardfork,
    ShutdownWitness,
    FillVestingWithdraw,
    ProducerReward,
    Interest,
}

impl Display for OperationTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Operation {
    pub fn tag(&self) -> OperationTag {
        match self {
            Operation::Transfer(_) => OperationTag::Transfer,
            Operation::TransferToVesting(_) => OperationTag::TransferToVesting,
            Operation::WithdrawVesting(_) => OperationTag::WithdrawVesting,
            Operation::AccountCreate(_) => OperationTag::AccountCreate,
            Operation::AccountUpdate(_) => OperationTag::AccountUpdate,
            Operation::WitnessUpdate(_) => OperationTag::WitnessUpdate,
            Operation::WitnessSetProperties(_) => OperationTag::WitnessSetProperties,
            Operation::AccountWitnessVote(_) => OperationTag::AccountWitnessVote,
            Operation::FeedPublish(_) => OperationTag::FeedPublish,
            Operation::EscrowTransfer(_) => OperationTag::EscrowTransfer,
            Operation::EscrowApprove(_) => OperationTag::EscrowApprove,
            Operation::EscrowDispute(_) => OperationTag::EscrowDispute,
            Operation::EscrowRelease(_) => OperationTag::EscrowRelease,
            Operation::RequestAccountRecovery(_) => OperationTag::RequestAccountRecovery,
            Operation::RecoverAccount(_) => OperationTag::RecoverAccount,
            Operation::ChangeRecoveryAccount(_) => OperationTag::ChangeRecoveryAccount,
            Operation::CustomJson(_) => OperationTag::CustomJson,
            Operation::CustomBinary(_) => OperationTag::CustomBinary,
            Operation::SponsorFees(_) => OperationTag::SponsorFees,
            Operation::Hardfork(_) => OperationTag::Hardfork,
            Operation::ShutdownWitness(_) => OperationTag::ShutdownWitness,
            Operation::FillVestingWithdraw(_) => OperationTag::FillVestingWithdraw,
            Operation::ProducerReward(_) => OperationTag::ProducerReward,
            Operation::Interest(_) => OperationTag::Interest,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(
            self,
            Operation::Hardfork(_)
                | Operation::ShutdownWitness(_)
                | Operation::FillVestingWithdraw(_)
                | Operation::ProducerReward(_)
                | Operation::Interest(_)
        )
    }

    /// The account that pays any fee required by this operation. Virtual operations have none.
    pub fn fee_payer(&self) -> Option<&AccountName> {
        match self {
            Operation::Transfer(op) => Some(&op.from),
            Operation::TransferToVesting(op) => Some(&op.from),
            Operation::WithdrawVesting(op) => Some(&op.account),
            Operation::AccountCreate(op) => Some(&op.creator),
            Operation::AccountUpdate(op) => Some(&op.account),
            Operation::WitnessUpdate(op) => Some(&op.owner),
            Operation::WitnessSetProperties(op) => Some(&op.owner),
            Operation::AccountWitnessVote(op) => Some(&op.account),
            Operation::FeedPublish(op) => Some(&op.publisher),
            Operation::EscrowTransfer(op) => Some(&op.from),
            Operation::EscrowApprove(op) => Some(&op.who),
            Operation::EscrowDispute(op) => Some(&op.who),
            Operation::EscrowRelease(op) => Some(&op.who),
            Operation::RequestAccountRecovery(op) => Some(&op.recovery_account),
            Operation::RecoverAccount(op) => Some(&op.account_to_recover),
            Operation::ChangeRecoveryAccount(op) => Some(&op.account_to_recover),
            Operation::CustomJson(op) => Some(&op.sender),
            Operation::CustomBinary(op) => Some(&op.sender),
            Operation::SponsorFees(op) => Some(&op.sponsor),
            Operation::Hardfork(_)
            | Operation::ShutdownWitness(_)
            | Operation::FillVestingWithdraw(_)
            | Operation::ProducerReward(_)
            | Operation::Interest(_) => None,
        }
    }

    /// Add the authorities that must have signed a transaction containing this operation to `required`.
    pub fn required_authorities(&self, required: &mut RequiredAuthorities) {
        match self {
            Operation::Transfer(op) => {
                required.active.insert(op.from.clone());
            }
            Operation::TransferToVesting(op) => {
                required.active.insert(op.from.clone());
            }
            Operation::WithdrawVesting(op) => {
                required.active.insert(op.account.clone());
            }
            Operation::AccountCreate(op) => {
                required.active.insert(op.creator.clone());
            }
            Operation::AccountUpdate(op) => {
                if op.owner.is_some() {
                    required.owner.insert(op.account.clone());
                } else {
                    required.active.insert(op.account.clone());
                }
            }
            Operation::WitnessUpdate(op) => {
                required.active.insert(op.owner.clone());
            }
            Operation::WitnessSetProperties(op) => {
                // Authorized by the witness's current signing key rather than by an account authority.
                if let Ok(update) = decode_witness_properties(&op.props) {
                    required.other.push(Authority::single_key(update.key));
                }
            }
            Operation::AccountWitnessVote(op) => {
                required.active.insert(op.account.clone());
            }
            Operation::FeedPublish(op) => {
                required.active.insert(op.publisher.clone());
            }
            Operation::EscrowTransfer(op) => {
                required.active.insert(op.from.clone());
            }
            Operation::EscrowApprove(op) => {
                required.active.insert(op.who.clone());
            }
            Operation::EscrowDispute(op) => {
                required.active.insert(op.who.clone());
            }
            Operation::EscrowRelease(op) => {
                required.active.insert(op.who.clone());
            }
            Operation::RequestAccountRecovery(op) => {
                required.active.insert(op.recovery_account.clone());
            }
            Operation::RecoverAccount(op) => {
                required.other.push(op.new_owner_authority.clone());
                required.other.push(op.recent_owner_authority.clone());
            }
            Operation::ChangeRecoveryAccount(op) => {
                required.owner.insert(op.account_to_recover.clone());
            }
            Operation::CustomJson(op) => {
                required.active.insert(op.sender.clone());
            }
            Operation::CustomBinary(op) => {
                required.active.insert(op.sender.clone());
            }
            Operation::SponsorFees(op) => {
                required.active.insert(op.sponsor.clone());
            }
            Operation::Hardfork(_)
            | Operation::ShutdownWitness(_)
            | Operation::FillVestingWithdraw(_)
            | Operation::ProducerReward(_)
            | Operation::Interest(_) => {}
        }
    }

    /// Stateless validation of the operation's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Operation::Transfer(op) => {
                valid_name(&op.from)?;
                valid_name(&op.to)?;
                positive(&op.amount)?;
                if op.amount.symbol == AssetSymbol::VESTS {
                    return Err(ValidationError::WrongSymbol(op.amount.symbol));
                }
                if op.memo.len() >= MAX_MEMO_SIZE {
                    return Err(ValidationError::MemoTooLong);
                }
                Ok(())
            }
            Operation::TransferToVesting(op) => {
                valid_name(&op.from)?;
                valid_name(&op.to)?;
                positive(&op.amount)?;
                native(&op.amount)
            }
            Operation::WithdrawVesting(op) => {
                valid_name(&op.account)?;
                if op.vesting_shares.symbol != AssetSymbol::VESTS {
                    return Err(ValidationError::WrongSymbol(op.vesting_shares.symbol));
                }
                if op.vesting_shares.amount < 0 {
                    return Err(ValidationError::NonPositiveAmount(op.vesting_shares));
                }
                Ok(())
            }
            Operation::AccountCreate(op) => {
                valid_name(&op.creator)?;
                valid_name(&op.new_account_name)?;
                native(&op.fee)?;
                if op.fee.amount < 0 {
                    return Err(ValidationError::NonPositiveAmount(op.fee));
                }
                valid_authority(&op.owner)?;
                valid_authority(&op.active)
            }
            Operation::AccountUpdate(op) => {
                valid_name(&op.account)?;
                if let Some(owner) = &op.owner {
                    valid_authority(owner)?;
                }
                if let Some(active) = &op.active {
                    valid_authority(active)?;
                }
                Ok(())
            }
            Operation::WitnessUpdate(op) => {
                valid_name(&op.owner)?;
                if op.url.is_empty() || op.url.len() > MAX_URL_LENGTH {
                    return Err(ValidationError::Malformed("witness url"));
                }
                native(&op.props.account_creation_fee)
            }
            Operation::WitnessSetProperties(op) => {
                valid_name(&op.owner)?;
                decode_witness_properties(&op.props)
                    .map(|_| ())
                    .map_err(ValidationError::WitnessProperties)
            }
            Operation::AccountWitnessVote(op) => {
                valid_name(&op.account)?;
                valid_name(&op.witness)
            }
            Operation::FeedPublish(op) => {
                valid_name(&op.publisher)?;
                if op.exchange_rate.is_null() {
                    return Err(ValidationError::Malformed("null exchange rate"));
                }
                Ok(())
            }
            Operation::EscrowTransfer(op) => {
                valid_name(&op.from)?;
                valid_name(&op.to)?;
                valid_name(&op.agent)?;
                positive(&op.amount)?;
                native(&op.amount)?;
                if op.escrow_fee.amount < 0 || op.escrow_fee.symbol != op.amount.symbol {
                    return Err(ValidationError::WrongSymbol(op.escrow_fee.symbol));
                }
                if op.from == op.agent || op.to == op.agent {
                    return Err(ValidationError::Malformed("escrow agent must be a third party"));
                }
                if op.ratification_deadline >= op.escrow_expiration {
                    return Err(ValidationError::Malformed(
                        "ratification deadline must be before escrow expiration",
                    ));
                }
                Ok(())
            }
            Operation::EscrowApprove(op) => {
                valid_name(&op.who)?;
                if op.who != op.to && op.who != op.agent {
                    return Err(ValidationError::Malformed("only to or agent may approve"));
                }
                Ok(())
            }
            Operation::EscrowDispute(op) => {
                valid_name(&op.who)?;
                if op.who != op.from && op.who != op.to {
                    return Err(ValidationError::Malformed("only from or to may dispute"));
                }
                Ok(())
            }
            Operation::EscrowRelease(op) => {
                valid_name(&op.who)?;
                valid_name(&op.receiver)?;
                positive(&op.amount)?;
                if op.receiver != op.from && op.receiver != op.to {
                    return Err(ValidationError::Malformed("receiver must be from or to"));
                }
                Ok(())
            }
            Operation::RequestAccountRecovery(op) => {
                valid_name(&op.recovery_account)?;
                valid_name(&op.account_to_recover)?;
                valid_authority(&op.new_owner_authority)
            }
            Operation::RecoverAccount(op) => {
                valid_name(&op.account_to_recover)?;
                if op.new_owner_authority == op.recent_owner_authority {
                    return Err(ValidationError::Malformed(
                        "cannot recover to the recent owner authority",
                    ));
                }
                valid_authority(&op.new_owner_authority)?;
                valid_authority(&op.recent_owner_authority)
            }
            Operation::ChangeRecoveryAccount(op) => {
                valid_name(&op.account_to_recover)?;
                valid_name(&op.new_recovery_account)
            }
            Operation::CustomJson(op) => {
                valid_name(&op.sender)?;
                op.recipients.iter().try_for_each(valid_name)
            }
            Operation::CustomBinary(op) => {
                valid_name(&op.sender)?;
                op.recipients.iter().try_for_each(valid_name)
            }
            Operation::SponsorFees(op) => {
                valid_name(&op.sponsor)?;
                valid_name(&op.sponsored)?;
                if op.sponsor == op.sponsored {
                    return Err(ValidationError::Malformed("an account cannot sponsor itself"));
                }
                Ok(())
            }
            Operation::Hardfork(_)
            | Operation::ShutdownWitness(_)
            | Operation::FillVestingWithdraw(_)
            | Operation::ProducerReward(_)
            | Operation::Interest(_) => Err(ValidationError::VirtualOperation(self.tag())),
        }
    }
}

fn valid_name(name: &AccountName) -> Result<(), ValidationError> {
    if name.is_valid() {
        Ok(())
    } else {
        Err(ValidationError::InvalidAccountName(name.clone()))
    }
}

fn positive(amount: &Asset) -> Result<(), ValidationError> {
    if amount.amount > 0 {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveAmount(*amount))
    }
}

fn native(amount: &Asset) -> Result<(), ValidationError> {
    if amount.symbol == AssetSymbol::NATIVE {
        Ok(())
    } else {
        Err(ValidationError::WrongSymbol(amount.symbol))
    }
}

fn valid_authority(authority: &Authority) -> Result<(), ValidationError> {
    if !authority.is_valid() {
        return Err(ValidationError::Malformed("authority names an invalid account"));
    }
    if authority.is_impossible() {
        return Err(ValidationError::ImpossibleAuthority);
    }
    Ok(())
}

/// Reasons an operation or transaction fails stateless validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    InvalidAccountName(AccountName),
    NonPositiveAmount(Asset),
    WrongSymbol(AssetSymbol),
    MemoTooLong,
    ImpossibleAuthority,
    VirtualOperation(OperationTag),
    NoOperations,
    WitnessProperties(WitnessPropertiesError),
    Malformed(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidAccountName(name) => write!(f, "invalid account name {:?}", name),
            ValidationError::NonPositiveAmount(amount) => {
                write!(f, "amount {} must be positive", amount)
            }
            ValidationError::WrongSymbol(symbol) => write!(f, "asset {} not allowed here", symbol),
            ValidationError::MemoTooLong => write!(f, "memo is too long"),
            ValidationError::ImpossibleAuthority => write!(f, "authority can never be satisfied"),
            ValidationError::VirtualOperation(tag) => {
                write!(f, "virtual operation {} cannot be submitted", tag)
            }
            ValidationError::NoOperations => write!(f, "transaction has no operations"),
            ValidationError::WitnessProperties(err) => Display::fmt(err, f),
            ValidationError::Malformed(reason) => f.write_str(reason),
        }
    }
}

impl std::error::Error for ValidationError {}
