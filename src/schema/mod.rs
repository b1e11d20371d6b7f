//! # Schema Graph
//!
//! This module implements arbordb's schema graph: tables, joins, groups, and
//! indexes, plus the derivation algorithms that turn declared parent-child
//! joins into per-table hierarchical keys and per-index row mappings.
//!
//! ## Architecture
//!
//! ```text
//! Catalog (arena of entities addressed by numeric ids)
//! ├── TableDef*   columns, primary key, parent/child joins, owning group
//! ├── JoinDef*    parent→child with ordered column pairs
//! ├── GroupDef*   root table, group relation, tree name
//! └── IndexDef*   table- or group-scoped, row↔hkey associations
//! ```
//!
//! Every "refers to" relationship (join endpoints, group membership, column
//! mirrors) is an id lookup into the catalog rather than an object reference,
//! so the deeply cyclic back-references of the model (group ↔ member table,
//! user column ↔ group column) stay acyclic in memory and trivially clone for
//! copy-on-write mutation.
//!
//! ## Lifecycle
//!
//! Schema objects are created and mutated only through [`builder::SchemaBuilder`],
//! which operates on a private copy of the catalog, re-derives group columns,
//! group indexes, hkeys, and index associations, validates the result, and
//! hands back a frozen [`catalog::Catalog`]. The storage engine reads frozen
//! metadata and never mutates it.

pub mod builder;
pub mod catalog;
pub mod group;
pub mod hkey;
pub mod index;
pub mod join;
pub mod table;
pub mod validate;

pub type TableId = u32;
pub type JoinId = u32;
pub type GroupId = u32;
pub type IndexId = u32;

/// Stable address of a column: owning table id plus ordinal position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: TableId,
    pub position: usize,
}

impl ColumnRef {
    pub fn new(table: TableId, position: usize) -> Self {
        Self { table, position }
    }
}
