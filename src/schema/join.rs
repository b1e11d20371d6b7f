//! # Join Definitions
//!
//! A join is a directed parent→child relationship with an ordered list of
//! (parent column, child column) position pairs. Once grouped, the parent
//! side of the pairs must equal the parent table's primary key in the same
//! order; that invariant is what lets the child's own stored foreign-key
//! columns supply the parent's hkey segment values.
//!
//! A join may be declared before its parent table is known. Such a join is
//! held as a [`PendingJoin`] keyed by join name, with parent columns
//! referenced by *name*, and is resolved into a [`JoinDef`] when the parent
//! table appears.

use super::{GroupId, JoinId, TableId};

#[derive(Debug, Clone, PartialEq)]
pub struct JoinDef {
    id: JoinId,
    name: String,
    parent: TableId,
    child: TableId,
    /// Ordered (parent column position, child column position) pairs.
    pairs: Vec<(usize, usize)>,
    group: Option<GroupId>,
}

impl JoinDef {
    pub fn new(
        id: JoinId,
        name: impl Into<String>,
        parent: TableId,
        child: TableId,
        pairs: Vec<(usize, usize)>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parent,
            child,
            pairs,
            group: None,
        }
    }

    pub fn id(&self) -> JoinId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> TableId {
        self.parent
    }

    pub fn child(&self) -> TableId {
        self.child
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Child column position carrying the value of the given parent column,
    /// if the join covers it.
    pub fn child_column_for(&self, parent_position: usize) -> Option<usize> {
        self.pairs
            .iter()
            .find(|(p, _)| *p == parent_position)
            .map(|(_, c)| *c)
    }

    pub(crate) fn set_group(&mut self, group: Option<GroupId>) {
        self.group = group;
    }
}

/// A join declared before its parent table exists. Parent columns are held
/// by name until resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingJoin {
    pub name: String,
    /// Schema-qualified parent table name.
    pub parent_table: String,
    pub child: TableId,
    /// Ordered (parent column name, child column position) pairs.
    pub pairs: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_column_lookup_follows_pairs() {
        let join = JoinDef::new(1, "fk_order_customer", 1, 2, vec![(0, 1), (1, 3)]);
        assert_eq!(join.child_column_for(0), Some(1));
        assert_eq!(join.child_column_for(1), Some(3));
        assert_eq!(join.child_column_for(2), None);
    }
}
