//! # Storage Engine
//!
//! The write path and scans over the physical store. The engine owns a
//! pluggable ordered key-value store and a row codec, reads frozen catalog
//! metadata, and never mutates schema.
//!
//! ## Write path
//!
//! ```text
//! insert ──▶ validate ──▶ place (parent lookup / orphan form)
//!        ──▶ uniqueness checks ──▶ row + index writes
//!        ──▶ orphan adoption ──▶ group-index refresh
//! ```
//!
//! Every public operation runs under the transaction driver: the body
//! executes against a snapshot and is retried as a whole on optimistic
//! conflict. The `*_in` variants run inside a caller-provided transaction
//! for composition (several operations, one commit).

pub mod delete;
pub mod index_build;
pub mod indexes;
pub mod insert;
pub mod keys;
pub mod row;
pub mod scan;
pub mod txn;
pub mod update;

pub use row::{BasicCodec, Row, RowCodec};
pub use scan::ScannedRow;
pub use txn::{TransactionService, TxnContext, MAX_TRANSACTION_RETRIES};

use crate::schema::catalog::Catalog;
use crate::schema::table::TableDef;
use crate::schema::{GroupId, IndexId, TableId};
use crate::store::KeyValueStore;
use crate::types::Value;
use eyre::{bail, ensure, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempt bound for optimistic-conflict retries.
    pub max_transaction_retries: usize,
    /// Rows scanned between cancellation checks in scan-driven operations.
    pub scan_cancellation_interval: usize,
    /// Cooperative cancellation for the engine's scan-driven write sweeps:
    /// orphan adoption, subtree re-keys, cascades, and truncation. Bulk
    /// index builds take their own per-build token instead.
    pub cancellation: CancellationToken,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transaction_retries: MAX_TRANSACTION_RETRIES,
            scan_cancellation_interval: 1024,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Cooperative cancellation flag for long-running scans.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub struct StorageEngine<S: KeyValueStore, C: RowCodec = BasicCodec> {
    store: S,
    codec: C,
    config: EngineConfig,
    txns: TransactionService,
}

impl<S: KeyValueStore> StorageEngine<S, BasicCodec> {
    pub fn new(store: S) -> Self {
        Self::with_codec(store, BasicCodec, EngineConfig::default())
    }
}

impl<S: KeyValueStore, C: RowCodec> StorageEngine<S, C> {
    pub fn with_codec(store: S, codec: C, config: EngineConfig) -> Self {
        let txns = TransactionService::new(config.max_transaction_retries);
        Self {
            store,
            codec,
            config,
            txns,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cancellation check for scan-driven write sweeps, honored every
    /// `scan_cancellation_interval` rows. `seen == 0` checks too, so a
    /// token cancelled before the sweep aborts it before any work.
    pub(crate) fn sweep_checkpoint(&self, seen: usize, operation: &str) -> Result<()> {
        let interval = self.config.scan_cancellation_interval.max(1);
        if seen % interval == 0 && self.config.cancellation.is_cancelled() {
            bail!("{operation} was cancelled");
        }
        Ok(())
    }

    // --- retry-wrapped entry points --------------------------------------

    pub fn insert(&self, catalog: &Catalog, ctx: &mut TxnContext, row: &Row) -> Result<()> {
        self.txns
            .run(&self.store, ctx, |txn, _| self.insert_in(txn, catalog, row))
    }

    pub fn update(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        old: &Row,
        new: &Row,
    ) -> Result<()> {
        self.txns
            .run(&self.store, ctx, |txn, _| self.update_in(txn, catalog, old, new))
    }

    pub fn delete(&self, catalog: &Catalog, ctx: &mut TxnContext, row: &Row) -> Result<usize> {
        self.txns
            .run(&self.store, ctx, |txn, _| self.delete_in(txn, catalog, row))
    }

    pub fn truncate_group(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        group: GroupId,
    ) -> Result<usize> {
        self.txns.run(&self.store, ctx, |txn, _| {
            self.truncate_group_in(txn, catalog, group)
        })
    }

    pub fn build_index(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        index: IndexId,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.txns.run(&self.store, ctx, |txn, _| {
            self.build_index_in(txn, catalog, index, cancel)
        })
    }

    pub fn group_scan(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        group: GroupId,
    ) -> Result<Vec<ScannedRow>> {
        self.txns
            .run(&self.store, ctx, |txn, _| self.group_scan_in(txn, catalog, group))
    }

    pub fn table_scan(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        table: TableId,
    ) -> Result<Vec<ScannedRow>> {
        self.txns
            .run(&self.store, ctx, |txn, _| self.table_scan_in(txn, catalog, table))
    }

    pub fn index_scan(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        index: IndexId,
        prefix_values: &[Value],
    ) -> Result<Vec<ScannedRow>> {
        self.txns.run(&self.store, ctx, |txn, _| {
            self.index_scan_in(txn, catalog, index, prefix_values)
        })
    }

    pub fn fetch(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        table: TableId,
        pk_values: &[Value],
    ) -> Result<Option<Vec<Value>>> {
        self.txns.run(&self.store, ctx, |txn, _| {
            self.fetch_in(txn, catalog, table, pk_values)
        })
    }

    pub fn descendants_of(
        &self,
        catalog: &Catalog,
        ctx: &mut TxnContext,
        table: TableId,
        pk_values: &[Value],
    ) -> Result<Vec<ScannedRow>> {
        self.txns.run(&self.store, ctx, |txn, _| {
            self.descendants_in(txn, catalog, table, pk_values)
        })
    }
}

/// Checks a full row (hidden columns included) against column constraints.
pub(crate) fn validate_row(table: &TableDef, values: &[Value]) -> Result<()> {
    ensure!(
        values.len() == table.columns().len(),
        "row for table '{}' has {} values, expected {}",
        table.name(),
        values.len(),
        table.columns().len()
    );
    for (col, value) in table.columns().iter().zip(values) {
        if value.is_null() {
            ensure!(
                col.is_nullable(),
                "null value in non-nullable column '{}' of table '{}'",
                col.name(),
                table.name()
            );
            continue;
        }
        ensure!(
            value.matches_type(col.data_type()),
            "type mismatch for column '{}' of table '{}': expected {}, got {}",
            col.name(),
            table.name(),
            col.data_type(),
            value
                .data_type()
                .map(|d| d.name())
                .unwrap_or("null")
        );
        if let Some(max) = col.max_length() {
            let len = match value {
                Value::Text(s) => Some(s.chars().count()),
                Value::Blob(b) => Some(b.len()),
                _ => None,
            };
            if let Some(len) = len {
                ensure!(
                    len <= max as usize,
                    "value too long for column '{}' of table '{}' ({} > {})",
                    col.name(),
                    table.name(),
                    len,
                    max
                );
            }
        }
    }
    Ok(())
}
