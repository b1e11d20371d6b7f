//! # Transaction Driver
//!
//! Storage operations run under optimistic transactions: the body executes
//! against a snapshot, and commit fails with [`StoreError::Conflict`] when a
//! concurrent commit overlapped its footprint. [`TransactionService::run`]
//! owns the begin/body/commit cycle and transparently retries the whole body
//! a bounded number of times on conflict; any other error rolls back and
//! propagates immediately.
//!
//! Conflicts are recognized by downcasting the error report back to
//! [`StoreError`], so a conflict stays retryable no matter how much context
//! has been wrapped around it on the way up.
//!
//! ## Callbacks
//!
//! A [`TxnContext`] carries four callback stacks: pre-commit, post-commit,
//! post-rollback, and post-end. Stacks run in LIFO order. Callbacks
//! registered during an attempt are consumed by that attempt's commit or
//! rollback; a retried body re-registers its own. Post-end runs exactly once
//! when the operation finishes, however it finished, and only the surviving
//! attempt's post-end registrations fire: a retry discards the failed
//! attempt's along with its commit hooks. Callback failures are accumulated
//! and reported without masking the original error.

use crate::store::{KeyValueStore, StoreError, StoreTransaction};
use eyre::{ensure, Report, Result};
use tracing::{debug, warn};

/// Upper bound on attempts for one operation before a conflict is returned
/// to the caller.
pub const MAX_TRANSACTION_RETRIES: usize = 10;

type Callback = Box<dyn FnOnce() -> Result<()>>;

/// Per-operation transaction state: the active flag plus callback stacks.
#[derive(Default)]
pub struct TxnContext {
    active: bool,
    pre_commit: Vec<Callback>,
    post_commit: Vec<Callback>,
    post_rollback: Vec<Callback>,
    post_end: Vec<Callback>,
}

impl std::fmt::Debug for TxnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnContext")
            .field("active", &self.active)
            .field("pre_commit", &self.pre_commit.len())
            .field("post_commit", &self.post_commit.len())
            .field("post_rollback", &self.post_rollback.len())
            .field("post_end", &self.post_end.len())
            .finish()
    }
}

impl TxnContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Runs just before commit; a failure aborts the transaction.
    pub fn on_pre_commit(&mut self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.pre_commit.push(Box::new(callback));
    }

    pub fn on_post_commit(&mut self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.post_commit.push(Box::new(callback));
    }

    pub fn on_post_rollback(&mut self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.post_rollback.push(Box::new(callback));
    }

    /// Runs exactly once when the operation ends, committed or not.
    pub fn on_post_end(&mut self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.post_end.push(Box::new(callback));
    }

    fn run_stack(stack: &mut Vec<Callback>) -> Vec<Report> {
        let mut errors = Vec::new();
        while let Some(callback) = stack.pop() {
            if let Err(err) = callback() {
                errors.push(err);
            }
        }
        errors
    }

    fn run_pre_commit(&mut self) -> Vec<Report> {
        Self::run_stack(&mut self.pre_commit)
    }

    fn run_post_commit(&mut self) -> Vec<Report> {
        Self::run_stack(&mut self.post_commit)
    }

    fn run_post_rollback(&mut self) -> Vec<Report> {
        // Pending commit hooks from the failed attempt are dropped.
        self.pre_commit.clear();
        self.post_commit.clear();
        Self::run_stack(&mut self.post_rollback)
    }

    fn run_post_end(&mut self) -> Vec<Report> {
        Self::run_stack(&mut self.post_end)
    }
}

fn is_conflict(err: &Report) -> bool {
    err.downcast_ref::<StoreError>()
        .map(StoreError::is_conflict)
        .unwrap_or(false)
}

/// Attaches accumulated callback failures to an outcome without masking it.
fn fold_errors<T>(outcome: Result<T>, errors: Vec<Report>, stage: &str) -> Result<T> {
    if errors.is_empty() {
        return outcome;
    }
    let combined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    let combined = combined.join("; ");
    match outcome {
        Ok(_) => Err(eyre::eyre!("{} callback failed: {}", stage, combined)),
        Err(err) => Err(err.wrap_err(format!("{} callback also failed: {}", stage, combined))),
    }
}

#[derive(Debug, Clone)]
pub struct TransactionService {
    max_retries: usize,
}

impl Default for TransactionService {
    fn default() -> Self {
        Self {
            max_retries: MAX_TRANSACTION_RETRIES,
        }
    }
}

impl TransactionService {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    /// Runs `body` in a transaction, retrying on optimistic conflict up to
    /// the configured bound. Transactions do not nest: a context already
    /// inside `run` rejects a second entry.
    pub fn run<'s, S, T, F>(&self, store: &'s S, ctx: &mut TxnContext, mut body: F) -> Result<T>
    where
        S: KeyValueStore,
        F: FnMut(&mut S::Txn<'s>, &mut TxnContext) -> Result<T>,
    {
        ensure!(!ctx.active, "transactions do not nest");
        ctx.active = true;

        // Post-end hooks registered by an attempt are discarded with it on
        // retry, so only the surviving attempt's hooks fire at the end.
        let post_end_mark = ctx.post_end.len();
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let mut txn = store.begin();
            match body(&mut txn, ctx) {
                Ok(value) => {
                    let pre_errors = ctx.run_pre_commit();
                    if !pre_errors.is_empty() {
                        txn.rollback();
                        let rollback_errors = ctx.run_post_rollback();
                        break fold_errors(
                            fold_errors(Err(eyre::eyre!("transaction aborted")), pre_errors, "pre-commit"),
                            rollback_errors,
                            "post-rollback",
                        );
                    }
                    match txn.commit() {
                        Ok(()) => {
                            break fold_errors(Ok(value), ctx.run_post_commit(), "post-commit");
                        }
                        Err(err) if err.is_conflict() && attempt < self.max_retries => {
                            debug!(attempt, "optimistic conflict at commit, retrying");
                            for cb_err in ctx.run_post_rollback() {
                                warn!("post-rollback callback failed during retry: {}", cb_err);
                            }
                            ctx.post_end.truncate(post_end_mark);
                        }
                        Err(err) => {
                            let rollback_errors = ctx.run_post_rollback();
                            break fold_errors(
                                Err(Report::new(err)),
                                rollback_errors,
                                "post-rollback",
                            );
                        }
                    }
                }
                Err(err) => {
                    txn.rollback();
                    if is_conflict(&err) && attempt < self.max_retries {
                        debug!(attempt, "optimistic conflict in body, retrying");
                        for cb_err in ctx.run_post_rollback() {
                            warn!("post-rollback callback failed during retry: {}", cb_err);
                        }
                        ctx.post_end.truncate(post_end_mark);
                        continue;
                    }
                    let rollback_errors = ctx.run_post_rollback();
                    break fold_errors(Err(err), rollback_errors, "post-rollback");
                }
            }
        };

        ctx.active = false;
        fold_errors(outcome, ctx.run_post_end(), "post-end")
    }
}
