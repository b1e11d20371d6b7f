//! # arbordb - Hierarchically Clustered Storage Core
//!
//! arbordb is the storage core of a SQL engine that physically clusters a
//! tree of related tables (a customer with its orders and order items) into a
//! single ordered-key relation, the **group relation**. Rows are keyed by a
//! composite **hierarchical key (HKey)** derived from declared parent-child
//! joins, so a full ancestor-to-descendant subtree is one contiguous key
//! range and needs no join at read time.
//!
//! ## Quick Start
//!
//! ```ignore
//! use arbordb::{
//!     ColumnDef, DataType, MemStore, Row, SchemaBuilder, StorageEngine, TxnContext, Value,
//! };
//!
//! let mut builder = SchemaBuilder::new();
//! let customer = builder.add_table("app", "customer", vec![
//!     ColumnDef::new("cid", DataType::Int),
//!     ColumnDef::new("name", DataType::Text),
//! ])?;
//! builder.set_primary_key(customer, &["cid"])?;
//! let order = builder.add_table("app", "order", vec![
//!     ColumnDef::new("oid", DataType::Int),
//!     ColumnDef::new("cid", DataType::Int),
//! ])?;
//! builder.set_primary_key(order, &["oid"])?;
//! builder.declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])?;
//!
//! let group = builder.create_group("customers");
//! builder.assign_to_group(group, customer)?;
//! builder.assign_to_group(group, order)?;
//! let catalog = builder.finish()?;
//!
//! let engine = StorageEngine::new(MemStore::new());
//! let mut ctx = TxnContext::new();
//! engine.insert(&catalog, &mut ctx, &Row::new(customer, vec![Value::Int(1), Value::text("north")]))?;
//! engine.insert(&catalog, &mut ctx, &Row::new(order, vec![Value::Int(10), Value::Int(1)]))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   Schema Builder (copy-on-write mutations)   │
//! ├──────────────────────────────────────────────┤
//! │  Catalog: tables, joins, groups, indexes,    │
//! │  derived HKeys and index row mappings        │
//! ├──────────────────────────────────────────────┤
//! │  Storage Engine: hkey construction, row and  │
//! │  index writes, orphan adoption, cascades     │
//! ├──────────────────────────────────────────────┤
//! │  Transaction driver: begin/body/commit with  │
//! │  bounded retry on optimistic conflicts       │
//! ├──────────────────────────────────────────────┤
//! │  Ordered key-value store (pluggable;         │
//! │  MemStore reference implementation)          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`types`]: runtime values and column data types
//! - [`encoding`]: order-preserving, byte-comparable key encoding
//! - [`schema`]: catalog, joins, groups, hkey derivation, index mappings
//! - [`store`]: ordered key-value store traits and the in-memory store
//! - [`engine`]: the write path, scans, and the transaction/retry driver
//!
//! ## What arbordb is not
//!
//! SQL parsing/planning, expression evaluation, the on-disk schema
//! serialization format, and the network protocol are external collaborators.
//! The physical store is treated as a black-box sorted byte-string store with
//! cursors, prefix scans, and optimistic transactions.

pub mod encoding;
pub mod engine;
pub mod schema;
pub mod store;
pub mod types;

pub use engine::txn::{TransactionService, TxnContext, MAX_TRANSACTION_RETRIES};
pub use engine::{
    BasicCodec, CancellationToken, EngineConfig, Row, RowCodec, ScannedRow, StorageEngine,
};
pub use schema::builder::SchemaBuilder;
pub use schema::catalog::{Catalog, CatalogHolder};
pub use schema::table::{ColumnDef, TableDef};
pub use schema::{GroupId, IndexId, JoinId, TableId};
pub use store::memory::MemStore;
pub use store::{KeyValueStore, StoreError, StoreTransaction};
pub use types::{DataType, Value};
