//! # Catalog Validation
//!
//! A suite of structural checks run against a catalog before it is frozen.
//! Each check is a [`CatalogCheck`] reporting zero or more
//! [`ValidationFailure`]s; the suite collects every failure across every
//! check before erroring, so a single validation pass reports all problems
//! at once instead of the first.

use super::catalog::Catalog;
use super::index::IndexKind;
use eyre::{bail, Result};
use hashbrown::HashSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub message: String,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait CatalogCheck {
    fn name(&self) -> &'static str;
    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>);
}

/// Schema-qualified table names must be unique.
pub struct UniqueTableNames;

impl CatalogCheck for UniqueTableNames {
    fn name(&self) -> &'static str {
        "unique_table_names"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        let mut seen = HashSet::new();
        for table in catalog.tables() {
            if !seen.insert(table.qualified_name()) {
                failures.push(ValidationFailure::new(format!(
                    "duplicate table name '{}'",
                    table.qualified_name()
                )));
            }
        }
    }
}

/// Group tree names partition the physical key space and must be unique.
pub struct UniqueTreeNames;

impl CatalogCheck for UniqueTreeNames {
    fn name(&self) -> &'static str {
        "unique_tree_names"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        let mut seen = HashSet::new();
        for group in catalog.groups() {
            if !seen.insert(group.tree_name()) {
                failures.push(ValidationFailure::new(format!(
                    "duplicate group tree name '{}'",
                    group.tree_name()
                )));
            }
        }
    }
}

pub struct UniqueIndexNames;

impl CatalogCheck for UniqueIndexNames {
    fn name(&self) -> &'static str {
        "unique_index_names"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        let mut seen = HashSet::new();
        for index in catalog.indexes() {
            if !seen.insert(index.name()) {
                failures.push(ValidationFailure::new(format!(
                    "duplicate index name '{}'",
                    index.name()
                )));
            }
        }
    }
}

/// Every join declared before its parent table existed must have been
/// resolved by now; a leftover forward reference names an unknown table.
pub struct ResolvedJoins;

impl CatalogCheck for ResolvedJoins {
    fn name(&self) -> &'static str {
        "resolved_joins"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        for pending in catalog.pending_joins() {
            failures.push(ValidationFailure::new(format!(
                "join '{}' references unknown table '{}'",
                pending.name, pending.parent_table
            )));
        }
    }
}

/// For a grouped join, the parent side of the column pairs must equal the
/// parent table's primary key in declared order, with matching column types.
/// This is the invariant that lets a child row's own foreign-key fields
/// supply its parent hkey segment values.
pub struct JoinMatchesParentKey;

impl CatalogCheck for JoinMatchesParentKey {
    fn name(&self) -> &'static str {
        "join_matches_parent_key"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        for join in catalog.joins() {
            if join.group().is_none() {
                continue;
            }
            let (Ok(parent), Ok(child)) =
                (catalog.table(join.parent()), catalog.table(join.child()))
            else {
                failures.push(ValidationFailure::new(format!(
                    "join '{}' references a missing table",
                    join.name()
                )));
                continue;
            };

            let parent_side: Vec<usize> = join.pairs().iter().map(|(p, _)| *p).collect();
            if parent_side != parent.primary_key() {
                failures.push(ValidationFailure::new(format!(
                    "join '{}' does not match the primary key of parent table '{}'",
                    join.name(),
                    parent.name()
                )));
                continue;
            }
            for (parent_pos, child_pos) in join.pairs() {
                let (Ok(pc), Ok(cc)) = (parent.column(*parent_pos), child.column(*child_pos))
                else {
                    failures.push(ValidationFailure::new(format!(
                        "join '{}' references a column out of range",
                        join.name()
                    )));
                    continue;
                };
                if pc.data_type() != cc.data_type() {
                    failures.push(ValidationFailure::new(format!(
                        "join '{}': column '{}' ({}) does not match '{}' ({})",
                        join.name(),
                        pc.name(),
                        pc.data_type().name(),
                        cc.name(),
                        cc.data_type().name()
                    )));
                }
            }
        }
    }
}

/// A frozen group must have exactly one root and every member must be
/// reachable from it through grouped joins.
pub struct GroupStructure;

impl CatalogCheck for GroupStructure {
    fn name(&self) -> &'static str {
        "group_structure"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        for group in catalog.groups() {
            let members = catalog.group_members(group.id());
            if members.is_empty() {
                // Empty groups are allowed; tables may be assigned later.
                continue;
            }
            let Some(root) = group.root() else {
                failures.push(ValidationFailure::new(format!(
                    "group '{}' has no unique root",
                    group.name()
                )));
                continue;
            };

            let mut reached = HashSet::new();
            reached.insert(root);
            let mut stack = vec![root];
            while let Some(tid) = stack.pop() {
                let Ok(table) = catalog.table(tid) else {
                    continue;
                };
                for &jid in table.child_joins() {
                    let Ok(join) = catalog.join(jid) else {
                        continue;
                    };
                    if join.group() == Some(group.id()) && reached.insert(join.child()) {
                        stack.push(join.child());
                    }
                }
            }
            for &member in &members {
                if !reached.contains(&member) {
                    let name = catalog
                        .table(member)
                        .map(|t| t.name().to_string())
                        .unwrap_or_else(|_| member.to_string());
                    failures.push(ValidationFailure::new(format!(
                        "table '{}' in group '{}' is not reachable from the root",
                        name,
                        group.name()
                    )));
                }
            }
        }
    }
}

/// Group index columns must lie on a single root-to-leaf branch.
pub struct NoBranchingGroupIndex;

impl CatalogCheck for NoBranchingGroupIndex {
    fn name(&self) -> &'static str {
        "no_branching_group_index"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        for index in catalog.indexes() {
            let IndexKind::Group { tables, .. } = index.kind() else {
                continue;
            };
            for col in index.columns() {
                if !tables.contains(&col.column.table) {
                    failures.push(ValidationFailure::new(format!(
                        "group index '{}' column references table id {} outside its branch",
                        index.name(),
                        col.column.table
                    )));
                }
            }
            // Consecutive branch tables must be joined parent to child.
            for pair in tables.windows(2) {
                let joined = catalog
                    .table(pair[1])
                    .ok()
                    .and_then(|t| t.parent_join())
                    .and_then(|j| catalog.join(j).ok())
                    .map(|j| j.parent() == pair[0])
                    .unwrap_or(false);
                if !joined {
                    failures.push(ValidationFailure::new(format!(
                        "group index '{}' branch is not a parent-child chain",
                        index.name()
                    )));
                }
            }
        }
    }
}

/// Index columns must reference existing columns of existing tables.
pub struct IndexColumnsExist;

impl CatalogCheck for IndexColumnsExist {
    fn name(&self) -> &'static str {
        "index_columns_exist"
    }

    fn check(&self, catalog: &Catalog, failures: &mut Vec<ValidationFailure>) {
        for index in catalog.indexes() {
            for col in index.columns() {
                let exists = catalog
                    .table(col.column.table)
                    .and_then(|t| t.column(col.column.position))
                    .is_ok();
                if !exists {
                    failures.push(ValidationFailure::new(format!(
                        "index '{}' references a missing column (table id {}, position {})",
                        index.name(),
                        col.column.table,
                        col.column.position
                    )));
                }
            }
        }
    }
}

pub fn default_checks() -> Vec<Box<dyn CatalogCheck>> {
    vec![
        Box::new(UniqueTableNames),
        Box::new(UniqueTreeNames),
        Box::new(UniqueIndexNames),
        Box::new(ResolvedJoins),
        Box::new(JoinMatchesParentKey),
        Box::new(GroupStructure),
        Box::new(NoBranchingGroupIndex),
        Box::new(IndexColumnsExist),
    ]
}

/// Runs every check, collecting all failures before reporting.
pub fn run_checks(catalog: &Catalog, checks: &[&dyn CatalogCheck]) -> Result<()> {
    let mut failures = Vec::new();
    for check in checks {
        let before = failures.len();
        check.check(catalog, &mut failures);
        for failure in &failures[before..] {
            warn!(check = check.name(), "{}", failure.message);
        }
    }
    if failures.is_empty() {
        return Ok(());
    }
    let messages: Vec<&str> = failures.iter().map(|f| f.message.as_str()).collect();
    bail!("catalog validation failed: {}", messages.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builder::SchemaBuilder;
    use crate::schema::table::ColumnDef;
    use crate::types::DataType;

    #[test]
    fn unresolved_forward_reference_fails_validation() {
        let mut b = SchemaBuilder::new();
        let order = b
            .add_table(
                "app",
                "order",
                vec![
                    ColumnDef::new("oid", DataType::Int),
                    ColumnDef::new("cid", DataType::Int),
                ],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        b.declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])
            .unwrap();

        let err = b.finish().unwrap_err();
        assert!(err.to_string().contains("unknown table 'app.customer'"));
    }

    #[test]
    fn grouped_join_must_match_parent_primary_key() {
        let mut b = SchemaBuilder::new();
        let customer = b
            .add_table(
                "app",
                "customer",
                vec![
                    ColumnDef::new("cid", DataType::Int),
                    ColumnDef::new("name", DataType::Text),
                ],
            )
            .unwrap();
        b.set_primary_key(customer, &["cid"]).unwrap();
        let order = b
            .add_table(
                "app",
                "order",
                vec![
                    ColumnDef::new("oid", DataType::Int),
                    ColumnDef::new("customer_name", DataType::Text),
                ],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        // Joins on a non-key parent column.
        b.declare_join(
            "fk_order_customer",
            "app.customer",
            order,
            &[("name", "customer_name")],
        )
        .unwrap();
        let g = b.create_group("customers");
        b.assign_to_group(g, customer).unwrap();
        b.assign_to_group(g, order).unwrap();

        let err = b.finish().unwrap_err();
        assert!(err
            .to_string()
            .contains("does not match the primary key of parent table 'customer'"));
    }

    #[test]
    fn join_column_types_must_agree() {
        let mut b = SchemaBuilder::new();
        let customer = b
            .add_table("app", "customer", vec![ColumnDef::new("cid", DataType::Int)])
            .unwrap();
        b.set_primary_key(customer, &["cid"]).unwrap();
        let order = b
            .add_table(
                "app",
                "order",
                vec![
                    ColumnDef::new("oid", DataType::Int),
                    ColumnDef::new("cid", DataType::Text),
                ],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        b.declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])
            .unwrap();
        let g = b.create_group("customers");
        b.assign_to_group(g, customer).unwrap();
        b.assign_to_group(g, order).unwrap();

        let err = b.finish().unwrap_err();
        assert!(err.to_string().contains("does not match"));
        assert!(err.to_string().contains("int"));
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn all_failures_are_reported_together() {
        let mut b = SchemaBuilder::new();
        let a = b
            .add_table(
                "app",
                "a",
                vec![
                    ColumnDef::new("id", DataType::Int),
                    ColumnDef::new("p", DataType::Int),
                ],
            )
            .unwrap();
        b.set_primary_key(a, &["id"]).unwrap();
        b.declare_join("fk_a_m1", "app.m1", a, &[("id", "p")]).unwrap();
        let bt = b
            .add_table(
                "app",
                "b",
                vec![
                    ColumnDef::new("id", DataType::Int),
                    ColumnDef::new("p", DataType::Int),
                ],
            )
            .unwrap();
        b.set_primary_key(bt, &["id"]).unwrap();
        b.declare_join("fk_b_m2", "app.m2", bt, &[("id", "p")]).unwrap();

        let err = b.finish().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'app.m1'"));
        assert!(msg.contains("'app.m2'"));
    }
}
