//! # Table and Column Definitions
//!
//! Core schema definition types for tables and their columns.
//!
//! A column belonging to a grouped table carries a `group_column`
//! back-reference to the mirrored column materialized in the group relation;
//! the mirror carries the inverse `user_column` reference. Exactly one side
//! of that pair is ever set on a given column.
//!
//! A table with no declared primary key is given a hidden, internally
//! synthesized surrogate key column when it is frozen; the storage engine
//! assigns its values from a durable per-table counter at insert time.

use super::{ColumnRef, GroupId, IndexId, JoinId, TableId};
use crate::schema::hkey::HKey;
use crate::types::DataType;
use eyre::{ensure, Result};

/// Name of the hidden surrogate key column appended to PK-less tables.
pub const SURROGATE_KEY_COLUMN: &str = "__row_id";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
    position: usize,
    nullable: bool,
    max_length: Option<u32>,
    hidden: bool,
    group_column: Option<usize>,
    user_column: Option<ColumnRef>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            position: 0,
            nullable: true,
            max_length: None,
            hidden: false,
            group_column: None,
            user_column: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn max_length(&self) -> Option<u32> {
        self.max_length
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Position of this column's mirror in the owning group's relation.
    /// Set only on columns of grouped tables.
    pub fn group_column(&self) -> Option<usize> {
        self.group_column
    }

    /// Source table column of a group-relation column. Set only on relation
    /// columns; a mirror never itself has a further mirror.
    pub fn user_column(&self) -> Option<ColumnRef> {
        self.user_column
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub(crate) fn set_group_column(&mut self, mirror: Option<usize>) {
        self.group_column = mirror;
    }

    pub(crate) fn set_user_column(&mut self, source: Option<ColumnRef>) {
        self.user_column = source;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    id: TableId,
    schema_name: String,
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: Vec<usize>,
    surrogate_key: bool,
    parent_join: Option<JoinId>,
    child_joins: Vec<JoinId>,
    indexes: Vec<IndexId>,
    group: Option<GroupId>,
    ordinal: Option<u32>,
    hkey: Option<HKey>,
}

impl TableDef {
    pub fn new(
        id: TableId,
        schema_name: impl Into<String>,
        name: impl Into<String>,
        mut columns: Vec<ColumnDef>,
    ) -> Self {
        for (pos, col) in columns.iter_mut().enumerate() {
            col.set_position(pos);
        }
        Self {
            id,
            schema_name: schema_name.into(),
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            surrogate_key: false,
            parent_join: None,
            child_joins: Vec::new(),
            indexes: Vec::new(),
            group: None,
            ordinal: None,
            hkey: None,
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.name)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, position: usize) -> Result<&ColumnDef> {
        self.columns.get(position).ok_or_else(|| {
            eyre::eyre!(
                "column position {} out of range for table '{}'",
                position,
                self.name
            )
        })
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Declared primary key positions; empty for a PK-less table until its
    /// surrogate key is synthesized at freeze time.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    pub fn has_surrogate_key(&self) -> bool {
        self.surrogate_key
    }

    /// Number of user-visible (non-hidden) columns.
    pub fn declared_column_count(&self) -> usize {
        self.columns.iter().filter(|c| !c.is_hidden()).count()
    }

    pub fn parent_join(&self) -> Option<JoinId> {
        self.parent_join
    }

    pub fn child_joins(&self) -> &[JoinId] {
        &self.child_joins
    }

    pub fn indexes(&self) -> &[IndexId] {
        &self.indexes
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Group-relative table ordinal, assigned in pre-order when the group's
    /// columns are recomputed.
    pub fn ordinal(&self) -> Option<u32> {
        self.ordinal
    }

    pub fn hkey(&self) -> Result<&HKey> {
        self.hkey
            .as_ref()
            .ok_or_else(|| eyre::eyre!("table '{}' has no derived hkey", self.name))
    }

    pub(crate) fn set_primary_key(&mut self, positions: Vec<usize>) -> Result<()> {
        for pos in &positions {
            ensure!(
                *pos < self.columns.len(),
                "primary key position {} out of range for table '{}'",
                pos,
                self.name
            );
        }
        self.primary_key = positions;
        Ok(())
    }

    /// Appends the hidden surrogate key column and makes it the primary key.
    pub(crate) fn synthesize_surrogate_key(&mut self) {
        debug_assert!(self.primary_key.is_empty());
        let pos = self.columns.len();
        let mut col = ColumnDef::new(SURROGATE_KEY_COLUMN, DataType::Int)
            .not_null()
            .hidden();
        col.set_position(pos);
        self.columns.push(col);
        self.primary_key = vec![pos];
        self.surrogate_key = true;
    }

    pub(crate) fn set_parent_join(&mut self, join: Option<JoinId>) {
        self.parent_join = join;
    }

    pub(crate) fn add_child_join(&mut self, join: JoinId) {
        if !self.child_joins.contains(&join) {
            self.child_joins.push(join);
        }
    }

    pub(crate) fn remove_child_join(&mut self, join: JoinId) {
        self.child_joins.retain(|j| *j != join);
    }

    pub(crate) fn add_index(&mut self, index: IndexId) {
        if !self.indexes.contains(&index) {
            self.indexes.push(index);
        }
    }

    pub(crate) fn set_group(&mut self, group: Option<GroupId>) {
        self.group = group;
    }

    pub(crate) fn set_ordinal(&mut self, ordinal: Option<u32>) {
        self.ordinal = ordinal;
    }

    pub(crate) fn set_hkey(&mut self, hkey: Option<HKey>) {
        self.hkey = hkey;
    }

    pub(crate) fn column_mut(&mut self, position: usize) -> &mut ColumnDef {
        &mut self.columns[position]
    }
}
