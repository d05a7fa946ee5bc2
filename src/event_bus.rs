/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Synchronous dispatch of [events](crate::events) to their handlers.

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) pre_apply_operation_handlers: Vec<HandlerPtr<PreApplyOperationEvent>>,
    pub(crate) post_apply_operation_handlers: Vec<HandlerPtr<PostApplyOperationEvent>>,
    pub(crate) applied_block_handlers: Vec<HandlerPtr<AppliedBlockEvent>>,
    pub(crate) pending_transaction_handlers: Vec<HandlerPtr<PendingTransactionEvent>>,
    pub(crate) pre_apply_transaction_handlers: Vec<HandlerPtr<PreApplyTransactionEvent>>,
    pub(crate) applied_transaction_handlers: Vec<HandlerPtr<AppliedTransactionEvent>>,
    pub(crate) irreversible_block_handlers: Vec<HandlerPtr<IrreversibleBlockEvent>>,
    pub(crate) switch_fork_handlers: Vec<HandlerPtr<SwitchForkEvent>>,
    pub(crate) reindex_start_handlers: Vec<HandlerPtr<ReindexStartEvent>>,
    pub(crate) reindex_done_handlers: Vec<HandlerPtr<ReindexDoneEvent>>,
}

/// Push the user's handler, then the default logger if logging is enabled.
fn add_handlers<T: Logger>(
    handlers: &mut Vec<HandlerPtr<T>>,
    log_events: bool,
    user_handler: Option<HandlerPtr<T>>,
) {
    if let Some(handler) = user_handler {
        handlers.push(handler)
    }
    if log_events {
        handlers.push(T::get_logger())
    }
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        pre_apply_operation_handler: Option<HandlerPtr<PreApplyOperationEvent>>,
        post_apply_operation_handler: Option<HandlerPtr<PostApplyOperationEvent>>,
        applied_block_handler: Option<HandlerPtr<AppliedBlockEvent>>,
        pending_transaction_handler: Option<HandlerPtr<PendingTransactionEvent>>,
        pre_apply_transaction_handler: Option<HandlerPtr<PreApplyTransactionEvent>>,
        applied_transaction_handler: Option<HandlerPtr<AppliedTransactionEvent>>,
        irreversible_block_handler: Option<HandlerPtr<IrreversibleBlockEvent>>,
        switch_fork_handler: Option<HandlerPtr<SwitchForkEvent>>,
        reindex_start_handler: Option<HandlerPtr<ReindexStartEvent>>,
        reindex_done_handler: Option<HandlerPtr<ReindexDoneEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers::default();
        add_handlers(&mut handlers.pre_apply_operation_handlers, log_events, pre_apply_operation_handler);
        add_handlers(&mut handlers.post_apply_operation_handlers, log_events, post_apply_operation_handler);
        add_handlers(&mut handlers.applied_block_handlers, log_events, applied_block_handler);
        add_handlers(&mut handlers.pending_transaction_handlers, log_events, pending_transaction_handler);
        add_handlers(
            &mut handlers.pre_apply_transaction_handlers,
            log_events,
            pre_apply_transaction_handler,
        );
        add_handlers(&mut handlers.applied_transaction_handlers, log_events, applied_transaction_handler);
        add_handlers(&mut handlers.irreversible_block_handlers, log_events, irreversible_block_handler);
        add_handlers(&mut handlers.switch_fork_handlers, log_events, switch_fork_handler);
        add_handlers(&mut handlers.reindex_start_handlers, log_events, reindex_start_handler);
        add_handlers(&mut handlers.reindex_done_handlers, log_events, reindex_done_handler);
        handlers
    }

    /// Whether any handler is registered for operation events. Building those events clones the operation,
    /// so the pipeline skips it when nobody listens.
    pub(crate) fn wants_operation_events(&self) -> bool {
        !self.pre_apply_operation_handlers.is_empty() || !self.post_apply_operation_handlers.is_empty()
    }

    pub(crate) fn wants_transaction_events(&self) -> bool {
        !self.pending_transaction_handlers.is_empty() || !self.pre_apply_transaction_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::PreApplyOperation(event) => self
                .pre_apply_operation_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::PostApplyOperation(event) => self
                .post_apply_operation_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::AppliedBlock(event) => self
                .applied_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::PendingTransaction(event) => self
                .pending_transaction_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::PreApplyTransaction(event) => self
                .pre_apply_transaction_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::AppliedTransaction(event) => self
                .applied_transaction_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::IrreversibleBlock(event) => self
                .irreversible_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::SwitchFork(event) => self
                .switch_fork_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReindexStart(event) => self
                .reindex_start_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReindexDone(event) => self
                .reindex_done_handlers
                .iter()
                .for_each(|handler| handler(&event)),
        }
    }
}
