/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The dispatch boundary between the chain and the business rules of each operation.
//!
//! The chain does not know what a transfer or a vote does. It routes each [`Operation`] to the
//! [`Evaluator`] registered for the operation's [tag](OperationTag) in the [`EvaluatorRegistry`], and
//! treats the evaluator's result as the operation's result. At most one evaluator may be registered per
//! tag; a conflicting registration is an error the caller gets while building the registry, before the
//! chain opens.
//!
//! ## Custom operations
//!
//! [`Operation::CustomJson`] and [`Operation::CustomBinary`] carry opaque payloads for applications built
//! on the chain. The built-in [`CustomOperationEvaluator`] routes them to the
//! [`CustomOperationInterpreter`] registered for the payload's application id. Each interpreter runs in its
//! own undo session, and its failures are logged and swallowed unless the node is producing a block.
//!
//! ## Fee sponsorship
//!
//! [`Operation::SponsorFees`] changes who pays an account's operation fees, which the chain itself reads
//! when it charges a fee. Its evaluator, [`SponsorFeesEvaluator`], is built in too.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};

use crate::objects::account::AccountByName;
use crate::objects::economics::SponsorBySponsored;
use crate::objects::{Account, FeeSponsor};
use crate::state::{Object, StateStore, StoreError};
use crate::types::basic::{BlockNumber, Timestamp};
use crate::types::operation::{
    CustomBinaryOperation, CustomJsonOperation, Operation, OperationTag,
};

/// What an evaluator sees of the chain while applying an operation.
pub struct EvaluationContext<'a> {
    pub store: &'a mut StateStore,
    pub head_block_time: Timestamp,
    pub head_block_num: BlockNumber,
    /// Whether the operation is being applied while this node assembles a block.
    pub is_producing: bool,
    pub(crate) custom_interpreters: &'a CustomInterpreterRegistry,
}

/// Applies the business rules of one operation variant.
pub trait Evaluator: Send + Sync {
    /// The operation variant this evaluator handles.
    fn tag(&self) -> OperationTag;

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError>;
}

#[derive(Default)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<OperationTag, Box<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> EvaluatorRegistry {
        EvaluatorRegistry::default()
    }

    /// A registry with the built-in [`CustomOperationEvaluator`]s and [`SponsorFeesEvaluator`] already
    /// registered.
    pub fn with_builtins() -> EvaluatorRegistry {
        let mut registry = EvaluatorRegistry::new();
        registry
            .evaluators
            .insert(OperationTag::CustomJson, Box::new(CustomOperationEvaluator::json()));
        registry.evaluators.insert(
            OperationTag::CustomBinary,
            Box::new(CustomOperationEvaluator::binary()),
        );
        registry
            .evaluators
            .insert(OperationTag::SponsorFees, Box::new(SponsorFeesEvaluator));
        registry
    }

    pub fn register(&mut self, evaluator: impl Evaluator + 'static) -> Result<(), RegistryError> {
        let tag = evaluator.tag();
        if self.evaluators.contains_key(&tag) {
            return Err(RegistryError::DuplicateEvaluator(tag));
        }
        self.evaluators.insert(tag, Box::new(evaluator));
        Ok(())
    }

    pub fn is_registered(&self, tag: OperationTag) -> bool {
        self.evaluators.contains_key(&tag)
    }

    pub fn get(&self, op: &Operation) -> Result<&dyn Evaluator, EvaluatorError> {
        self.evaluators
            .get(&op.tag())
            .map(|evaluator| evaluator.as_ref())
            .ok_or(EvaluatorError::NoEvaluator(op.tag()))
    }

    pub fn dispatch(
        &self,
        ctx: &mut EvaluationContext<'_>,
        op: &Operation,
    ) -> Result<(), EvaluatorError> {
        self.get(op)?.apply(ctx, op)
    }
}

/// The payload of a custom operation, as handed to an interpreter.
#[derive(Clone, Copy, Debug)]
pub enum CustomPayload<'a> {
    Json(&'a CustomJsonOperation),
    Binary(&'a CustomBinaryOperation),
}

/// Applies the custom operations of one application.
pub trait CustomOperationInterpreter: Send + Sync {
    fn apply(
        &self,
        ctx: &mut EvaluationContext<'_>,
        payload: CustomPayload<'_>,
    ) -> Result<(), EvaluatorError>;
}

#[derive(Default)]
pub struct CustomInterpreterRegistry {
    interpreters: HashMap<u64, Box<dyn CustomOperationInterpreter>>,
}

impl CustomInterpreterRegistry {
    pub fn new() -> CustomInterpreterRegistry {
        CustomInterpreterRegistry::default()
    }

    pub fn register(
        &mut self,
        app_id: u64,
        interpreter: impl CustomOperationInterpreter + 'static,
    ) -> Result<(), RegistryError> {
        if self.interpreters.contains_key(&app_id) {
            return Err(RegistryError::DuplicateInterpreter(app_id));
        }
        self.interpreters.insert(app_id, Box::new(interpreter));
        Ok(())
    }

    pub fn get(&self, app_id: u64) -> Option<&dyn CustomOperationInterpreter> {
        self.interpreters
            .get(&app_id)
            .map(|interpreter| interpreter.as_ref())
    }
}

/// Routes custom operations to the interpreter registered for their application id. Operations for
/// applications without an interpreter are accepted and do nothing.
pub struct CustomOperationEvaluator {
    tag: OperationTag,
}

impl CustomOperationEvaluator {
    pub fn json() -> CustomOperationEvaluator {
        CustomOperationEvaluator {
            tag: OperationTag::CustomJson,
        }
    }

    pub fn binary() -> CustomOperationEvaluator {
        CustomOperationEvaluator {
            tag: OperationTag::CustomBinary,
        }
    }
}

impl Evaluator for CustomOperationEvaluator {
    fn tag(&self) -> OperationTag {
        self.tag
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let (app_id, payload) = match op {
            Operation::CustomJson(op) => (op.app_id, CustomPayload::Json(op)),
            Operation::CustomBinary(op) => (op.app_id, CustomPayload::Binary(op)),
            _ => {
                return Err(EvaluatorError::WrongOperation {
                    expected: self.tag,
                    got: op.tag(),
                })
            }
        };

        let interpreters = ctx.custom_interpreters;
        let interpreter = match interpreters.get(app_id) {
            Some(interpreter) => interpreter,
            None => return Ok(()),
        };

        let revision = ctx.store.begin_session();
        match interpreter.apply(ctx, payload) {
            Ok(()) => {
                ctx.store.squash_session(revision)?;
                Ok(())
            }
            Err(err) => {
                ctx.store.undo_session(revision)?;
                if ctx.is_producing {
                    Err(err)
                } else {
                    log::warn!("Custom operation for app {} failed: {}", app_id, err);
                    Ok(())
                }
            }
        }
    }
}

/// Starts or ends a fee sponsorship. An account has at most one sponsor, and only its sponsor can end the
/// sponsorship.
pub struct SponsorFeesEvaluator;

impl Evaluator for SponsorFeesEvaluator {
    fn tag(&self) -> OperationTag {
        OperationTag::SponsorFees
    }

    fn apply(&self, ctx: &mut EvaluationContext<'_>, op: &Operation) -> Result<(), EvaluatorError> {
        let op = match op {
            Operation::SponsorFees(op) => op,
            _ => {
                return Err(EvaluatorError::WrongOperation {
                    expected: OperationTag::SponsorFees,
                    got: op.tag(),
                })
            }
        };
        for name in [&op.sponsor, &op.sponsored] {
            if ctx.store.find::<Account, AccountByName>(name)?.is_none() {
                return Err(EvaluatorError::rejected(format!("account {} does not exist", name)));
            }
        }

        let existing = ctx
            .store
            .find::<FeeSponsor, SponsorBySponsored>(&op.sponsored)?
            .cloned();
        match (op.is_sponsoring, existing) {
            (true, None) => {
                ctx.store.create::<FeeSponsor, _>(|sponsorship| {
                    sponsorship.sponsor = op.sponsor.clone();
                    sponsorship.sponsored = op.sponsored.clone();
                })?;
            }
            (true, Some(existing)) => {
                return Err(EvaluatorError::rejected(format!(
                    "{} is already sponsored by {}",
                    op.sponsored, existing.sponsor
                )))
            }
            (false, Some(existing)) if existing.sponsor == op.sponsor => {
                ctx.store.remove::<FeeSponsor>(existing.id())?;
            }
            (false, _) => {
                return Err(EvaluatorError::rejected(format!(
                    "{} does not sponsor {}",
                    op.sponsor, op.sponsored
                )))
            }
        }
        Ok(())
    }
}

/// Why an operation could not be applied.
#[derive(Debug)]
pub enum EvaluatorError {
    /// The operation breaks a business rule.
    Rejected(String),
    NoEvaluator(OperationTag),
    WrongOperation {
        expected: OperationTag,
        got: OperationTag,
    },
    Store(StoreError),
}

impl EvaluatorError {
    pub fn rejected(reason: impl Into<String>) -> EvaluatorError {
        EvaluatorError::Rejected(reason.into())
    }
}

impl Display for EvaluatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EvaluatorError::Rejected(reason) => write!(f, "operation rejected: {}", reason),
            EvaluatorError::NoEvaluator(tag) => write!(f, "no evaluator registered for {}", tag),
            EvaluatorError::WrongOperation { expected, got } => write!(
                f,
                "evaluator for {} was handed a {} operation",
                expected, got
            ),
            EvaluatorError::Store(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for EvaluatorError {}

impl From<StoreError> for EvaluatorError {
    fn from(value: StoreError) -> Self {
        EvaluatorError::Store(value)
    }
}

/// A conflicting registration, reported while the registries are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateEvaluator(OperationTag),
    DuplicateInterpreter(u64),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateEvaluator(tag) => {
                write!(f, "an evaluator for {} is already registered", tag)
            }
            RegistryError::DuplicateInterpreter(app_id) => {
                write!(f, "an interpreter for app {} is already registered", app_id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
