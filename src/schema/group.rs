//! # Group Definitions
//!
//! A group is a maximal connected set of tables linked by joins, rooted at
//! the one member with no parent join. It owns exactly one **group
//! relation**: the physical clustered storage object whose columns mirror
//! every member table's columns in pre-order, and whose rows are keyed by
//! hkey.
//!
//! A group whose membership currently has zero or multiple roots (mid-DDL)
//! is structurally incomplete: its relation columns are cleared and it is
//! not queryable, but this is a transient state rather than an error.
//!
//! The group's **tree name** partitions the physical key space. Tree names
//! are globally unique within a catalog; collisions get a deterministic
//! numeric suffix so repeated catalog loads reproduce the same layout.

use super::{ColumnRef, GroupId, TableId};
use crate::schema::table::ColumnDef;

/// A synthesized index on the group relation, mirroring a member table's
/// index with columns translated to their relation mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationIndex {
    pub name: String,
    /// Positions into the group relation's column list.
    pub columns: Vec<usize>,
    pub unique: bool,
}

/// The clustered storage object owned by a group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupRelation {
    columns: Vec<ColumnDef>,
}

impl GroupRelation {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub(crate) fn clear(&mut self) {
        self.columns.clear();
    }

    /// Appends a mirror of `source`, returning the mirror's relation
    /// position. The mirror is named `table$column` and carries the
    /// user-column back-reference.
    pub(crate) fn push_mirror(
        &mut self,
        table_name: &str,
        source: &ColumnDef,
        source_ref: ColumnRef,
    ) -> usize {
        let position = self.columns.len();
        let mut mirror = ColumnDef::new(
            format!("{}${}", table_name, source.name()),
            source.data_type(),
        );
        if let Some(len) = source.max_length() {
            mirror = mirror.with_max_length(len);
        }
        if !source.is_nullable() {
            mirror = mirror.not_null();
        }
        mirror.set_position(position);
        mirror.set_user_column(Some(source_ref));
        self.columns.push(mirror);
        position
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupDef {
    id: GroupId,
    name: String,
    tree_name: String,
    root: Option<TableId>,
    relation: GroupRelation,
    relation_indexes: Vec<RelationIndex>,
}

impl GroupDef {
    pub fn new(id: GroupId, name: impl Into<String>, tree_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tree_name: tree_name.into(),
            root: None,
            relation: GroupRelation::default(),
            relation_indexes: Vec::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree_name(&self) -> &str {
        &self.tree_name
    }

    /// The unique root table, or `None` while the group is structurally
    /// incomplete.
    pub fn root(&self) -> Option<TableId> {
        self.root
    }

    pub fn relation(&self) -> &GroupRelation {
        &self.relation
    }

    pub fn relation_indexes(&self) -> &[RelationIndex] {
        &self.relation_indexes
    }

    pub(crate) fn set_root(&mut self, root: Option<TableId>) {
        self.root = root;
    }

    pub(crate) fn relation_mut(&mut self) -> &mut GroupRelation {
        &mut self.relation
    }

    pub(crate) fn set_relation_indexes(&mut self, indexes: Vec<RelationIndex>) {
        self.relation_indexes = indexes;
    }
}

/// Picks a globally unique tree name: the base name itself, or the base with
/// the smallest deterministic `$n` suffix not yet taken.
pub(crate) fn disambiguate_tree_name(base: &str, taken: &[&str]) -> String {
    if !taken.contains(&base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}${}", base, n);
        if !taken.iter().any(|t| *t == candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn tree_name_collisions_get_deterministic_suffix() {
        assert_eq!(disambiguate_tree_name("orders", &[]), "orders");
        assert_eq!(disambiguate_tree_name("orders", &["orders"]), "orders$2");
        assert_eq!(
            disambiguate_tree_name("orders", &["orders", "orders$2"]),
            "orders$3"
        );
    }

    #[test]
    fn relation_mirror_carries_back_reference_and_name() {
        let mut relation = GroupRelation::default();
        let source = ColumnDef::new("cid", DataType::Int).not_null();
        let pos = relation.push_mirror("customer", &source, ColumnRef::new(7, 0));
        assert_eq!(pos, 0);
        let mirror = &relation.columns()[0];
        assert_eq!(mirror.name(), "customer$cid");
        assert_eq!(mirror.user_column(), Some(ColumnRef::new(7, 0)));
        assert!(!mirror.is_nullable());
        // The mirror never itself has a further mirror.
        assert_eq!(mirror.group_column(), None);
    }
}
