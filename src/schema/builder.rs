//! # Schema Builder
//!
//! Incremental construction and mutation API for the schema graph, used by
//! catalog loading and DDL. Tables and joins may arrive in arbitrary order
//! (child before parent); joins whose parent is not yet known are parked as
//! forward references and resolved when the parent table appears.
//!
//! ## Copy-on-write
//!
//! A builder never edits a live catalog. [`SchemaBuilder::edit`] clones the
//! current catalog; all mutations apply to the private copy, and
//! [`SchemaBuilder::finish`] re-derives every group's columns, indexes,
//! ordinals, hkeys, and index associations, validates the result, and
//! returns a frozen catalog ready to be swapped in.
//!
//! ## Failure policy
//!
//! Structural errors (unknown entity, cycle, wrong group, branching group
//! index) are raised synchronously and leave no partial mutation behind:
//! group column and index regeneration only runs after the structural change
//! fully succeeds.

use super::catalog::Catalog;
use super::group::{disambiguate_tree_name, GroupDef, RelationIndex};
use super::hkey::derive_hkey;
use super::index::{IndexColumn, IndexDef, IndexKind};
use super::join::{JoinDef, PendingJoin};
use super::table::{ColumnDef, TableDef};
use super::validate::{default_checks, run_checks, CatalogCheck};
use super::{ColumnRef, GroupId, IndexId, JoinId, TableId};
use eyre::{bail, ensure, Result};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    work: Catalog,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            work: Catalog::new(),
        }
    }

    /// Starts a mutation against an existing catalog. The source is left
    /// untouched; the builder works on a private copy.
    pub fn edit(live: &Catalog) -> Self {
        let mut work = live.clone();
        work.set_frozen(false);
        Self { work }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.work
    }

    pub fn add_table(
        &mut self,
        schema_name: &str,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<TableId> {
        let qualified = format!("{}.{}", schema_name, name);
        ensure!(
            !self.work.table_exists(&qualified),
            "table '{}' already exists",
            qualified
        );
        let id = self.work.allocate_table_id();
        self.work
            .insert_table(TableDef::new(id, schema_name, name, columns));
        debug!(table = %qualified, id, "added table");

        // The new table may be the parent that pending forward-referenced
        // joins were waiting for.
        for pending in self.work.take_pending_joins_for(&qualified) {
            self.resolve_pending_join(pending)?;
        }
        Ok(id)
    }

    pub fn set_primary_key(&mut self, table: TableId, column_names: &[&str]) -> Result<()> {
        let t = self.work.table(table)?;
        let mut positions = Vec::with_capacity(column_names.len());
        for name in column_names {
            let pos = t.column_position(name).ok_or_else(|| {
                eyre::eyre!("column '{}' not found in table '{}'", name, t.name())
            })?;
            positions.push(pos);
        }
        self.work.table_mut(table)?.set_primary_key(positions)
    }

    /// Declares a parent→child join. `parent` is a schema-qualified table
    /// name; if that table is not yet known the join is held as a forward
    /// reference keyed by join name and `Ok(None)` is returned.
    pub fn declare_join(
        &mut self,
        name: &str,
        parent: &str,
        child: TableId,
        column_pairs: &[(&str, &str)],
    ) -> Result<Option<JoinId>> {
        let child_table = self.work.table(child)?;
        ensure!(
            child_table.parent_join().is_none(),
            "table '{}' already has a parent join; multiple parents are not allowed",
            child_table.name()
        );
        let mut child_positions = Vec::with_capacity(column_pairs.len());
        for (_, child_col) in column_pairs {
            let pos = child_table.column_position(child_col).ok_or_else(|| {
                eyre::eyre!(
                    "column '{}' not found in table '{}'",
                    child_col,
                    child_table.name()
                )
            })?;
            child_positions.push(pos);
        }

        if !self.work.table_exists(parent) {
            debug!(join = name, parent, "parking join as forward reference");
            self.work.push_pending_join(PendingJoin {
                name: name.to_string(),
                parent_table: parent.to_string(),
                child,
                pairs: column_pairs
                    .iter()
                    .zip(child_positions)
                    .map(|((p, _), c)| (p.to_string(), c))
                    .collect(),
            });
            return Ok(None);
        }

        let pending = PendingJoin {
            name: name.to_string(),
            parent_table: parent.to_string(),
            child,
            pairs: column_pairs
                .iter()
                .zip(child_positions)
                .map(|((p, _), c)| (p.to_string(), c))
                .collect(),
        };
        self.resolve_pending_join(pending).map(Some)
    }

    fn resolve_pending_join(&mut self, pending: PendingJoin) -> Result<JoinId> {
        let parent = self.work.table_by_name(&pending.parent_table)?;
        let parent_id = parent.id();
        let mut pairs = Vec::with_capacity(pending.pairs.len());
        for (parent_col, child_pos) in &pending.pairs {
            let parent_pos = parent.column_position(parent_col).ok_or_else(|| {
                eyre::eyre!(
                    "join '{}': column '{}' not found in parent table '{}'",
                    pending.name,
                    parent_col,
                    pending.parent_table
                )
            })?;
            pairs.push((parent_pos, *child_pos));
        }
        ensure!(
            self.work.table(pending.child)?.parent_join().is_none(),
            "join '{}': table id {} already has a parent join",
            pending.name,
            pending.child
        );
        // A join whose parent chain leads back to the child would loop.
        let mut cur = parent_id;
        loop {
            ensure!(
                cur != pending.child,
                "join '{}' would create a cycle",
                pending.name
            );
            match self.work.table(cur)?.parent_join() {
                Some(j) => cur = self.work.join(j)?.parent(),
                None => break,
            }
        }

        let id = self.work.allocate_join_id();
        self.work.insert_join(JoinDef::new(
            id,
            pending.name.clone(),
            parent_id,
            pending.child,
            pairs,
        ));
        self.work.table_mut(parent_id)?.add_child_join(id);
        self.work
            .table_mut(pending.child)?
            .set_parent_join(Some(id));
        debug!(join = %pending.name, id, "resolved join");
        Ok(id)
    }

    /// Creates a group. The group-relation tree name partitions the physical
    /// key space; collisions with existing tree names get a deterministic
    /// suffix so repeated catalog loads are reproducible.
    pub fn create_group(&mut self, name: &str) -> GroupId {
        let taken: Vec<&str> = self.work.groups().map(|g| g.tree_name()).collect();
        let tree_name = disambiguate_tree_name(name, &taken);
        let id = self.work.allocate_group_id();
        self.work.insert_group(GroupDef::new(id, name, tree_name));
        id
    }

    /// Assigns a table to a group. Fails if the table already belongs to a
    /// different group, or if its parent-join chain loops back to itself.
    pub fn assign_to_group(&mut self, group: GroupId, table: TableId) -> Result<()> {
        self.work.group(group)?;
        let t = self.work.table(table)?;
        if let Some(current) = t.group() {
            ensure!(
                current == group,
                "table '{}' is already in a different group",
                t.name()
            );
            return Ok(());
        }

        // Cycle check: walking root-ward from the table must never reach the
        // table again.
        let mut cur = table;
        loop {
            match self.work.table(cur)?.parent_join() {
                Some(j) => {
                    cur = self.work.join(j)?.parent();
                    ensure!(
                        cur != table,
                        "assigning table '{}' to group would create a cycle",
                        self.work.table(table)?.name()
                    );
                }
                None => break,
            }
        }

        self.work.table_mut(table)?.set_group(Some(group));
        self.mark_group_joins(group)?;
        self.recompute_group_columns(group)?;
        self.recompute_group_indexes(group)?;
        Ok(())
    }

    /// Tags every join whose both endpoints are members of the group.
    fn mark_group_joins(&mut self, group: GroupId) -> Result<()> {
        let join_ids: Vec<JoinId> = self.work.joins().map(|j| j.id()).collect();
        for id in join_ids {
            let join = self.work.join(id)?;
            let parent_in = self.work.table(join.parent())?.group() == Some(group);
            let child_in = self.work.table(join.child())?.group() == Some(group);
            if parent_in && child_in {
                self.work.join_mut(id)?.set_group(Some(group));
            }
        }
        Ok(())
    }

    /// Removes a join. If the join was inside a group, the group splits when
    /// no remaining join connects the two sides; each side is independently
    /// re-rooted and re-columned, and a table left with no joins and no
    /// group becomes ungrouped rather than deleted.
    pub fn remove_join(&mut self, join: JoinId) -> Result<()> {
        let def = self
            .work
            .remove_join(join)
            .ok_or_else(|| eyre::eyre!("join id {} not found", join))?;
        self.work.table_mut(def.parent())?.remove_child_join(join);
        self.work.table_mut(def.child())?.set_parent_join(None);

        let Some(group) = def.group() else {
            return Ok(());
        };

        let members = self.work.group_members(group);
        let components = self.connected_components(group, &members)?;
        let old_root = self.work.group(group)?.root();

        // The component holding the old root keeps the group; ties fall to
        // the component with the smallest table id.
        let keep = components
            .iter()
            .position(|c| old_root.map(|r| c.contains(&r)).unwrap_or(false))
            .unwrap_or(0);

        for (i, component) in components.iter().enumerate() {
            if i == keep {
                continue;
            }
            if component.len() == 1 && self.member_join_count(group, component[0])? == 0 {
                let tid = component[0];
                let t = self.work.table_mut(tid)?;
                t.set_group(None);
                t.set_ordinal(None);
                continue;
            }
            let root = self.component_root(group, component)?;
            let name = self.work.table(root)?.name().to_string();
            let new_group = self.create_group(&name);
            for &tid in component {
                self.work.table_mut(tid)?.set_group(Some(new_group));
            }
            self.mark_group_joins(new_group)?;
            self.recompute_group_columns(new_group)?;
            self.recompute_group_indexes(new_group)?;
        }

        self.mark_group_joins(group)?;
        self.recompute_group_columns(group)?;
        self.recompute_group_indexes(group)?;
        Ok(())
    }

    fn member_join_count(&self, group: GroupId, table: TableId) -> Result<usize> {
        let mut count = 0;
        for id in self.work.group_joins(group) {
            let join = self.work.join(id)?;
            if join.parent() == table || join.child() == table {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Undirected connected components of the group's members under its
    /// remaining joins, each sorted by table id.
    fn connected_components(
        &self,
        group: GroupId,
        members: &[TableId],
    ) -> Result<Vec<Vec<TableId>>> {
        let joins = self.work.group_joins(group);
        let mut components: Vec<Vec<TableId>> = Vec::new();
        let mut seen: Vec<TableId> = Vec::new();
        for &start in members {
            if seen.contains(&start) {
                continue;
            }
            let mut component = vec![start];
            let mut stack = vec![start];
            seen.push(start);
            while let Some(tid) = stack.pop() {
                for &jid in &joins {
                    let join = self.work.join(jid)?;
                    let other = if join.parent() == tid {
                        Some(join.child())
                    } else if join.child() == tid {
                        Some(join.parent())
                    } else {
                        None
                    };
                    if let Some(other) = other {
                        if members.contains(&other) && !seen.contains(&other) {
                            seen.push(other);
                            component.push(other);
                            stack.push(other);
                        }
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        Ok(components)
    }

    fn component_root(&self, group: GroupId, component: &[TableId]) -> Result<TableId> {
        for &tid in component {
            let t = self.work.table(tid)?;
            let rooted = match t.parent_join() {
                None => true,
                Some(j) => {
                    let parent = self.work.join(j)?.parent();
                    !component.contains(&parent) || self.work.join(j)?.group() != Some(group)
                }
            };
            if rooted {
                return Ok(tid);
            }
        }
        bail!("group component has no root")
    }

    /// Walks the group's join tree from its unique root in pre-order,
    /// assigning table ordinals and rebuilding the group relation's mirrored
    /// columns. A group with zero or multiple roots is structurally
    /// incomplete: its relation columns are cleared and it is skipped, which
    /// is a transient state rather than an error.
    pub fn recompute_group_columns(&mut self, group: GroupId) -> Result<()> {
        let members = self.work.group_members(group);

        // Drop stale mirror back-references before rebuilding.
        for &tid in &members {
            let t = self.work.table_mut(tid)?;
            for pos in 0..t.columns().len() {
                t.column_mut(pos).set_group_column(None);
            }
        }

        let mut roots = Vec::new();
        for &tid in &members {
            let t = self.work.table(tid)?;
            let is_root = match t.parent_join() {
                None => true,
                Some(j) => self.work.join(j)?.group() != Some(group),
            };
            if is_root {
                roots.push(tid);
            }
        }

        if roots.len() != 1 {
            debug!(group, roots = roots.len(), "group structurally incomplete");
            let g = self.work.group_mut(group)?;
            g.set_root(None);
            g.relation_mut().clear();
            for &tid in &members {
                self.work.table_mut(tid)?.set_ordinal(None);
            }
            return Ok(());
        }

        let root = roots[0];
        let order = self.pre_order(group, root)?;
        self.work.group_mut(group)?.set_root(Some(root));

        for (i, &tid) in order.iter().enumerate() {
            self.work.table_mut(tid)?.set_ordinal(Some(i as u32 + 1));
        }

        self.work.group_mut(group)?.relation_mut().clear();
        for &tid in &order {
            let t = self.work.table(tid)?;
            let table_name = t.name().to_string();
            let sources: Vec<ColumnDef> = t
                .columns()
                .iter()
                .filter(|c| !c.is_hidden())
                .cloned()
                .collect();
            for source in sources {
                let source_ref = ColumnRef::new(tid, source.position());
                let mirror_pos = self.work.group_mut(group)?.relation_mut().push_mirror(
                    &table_name,
                    &source,
                    source_ref,
                );
                self.work
                    .table_mut(tid)?
                    .column_mut(source.position())
                    .set_group_column(Some(mirror_pos));
            }
        }
        Ok(())
    }

    /// Synthesizes group-relation indexes mirroring every member table's
    /// indexes, columns translated to their relation mirrors. Index identity
    /// is content-based (the generated `table$index` name), so repeated
    /// recomputation is idempotent.
    pub fn recompute_group_indexes(&mut self, group: GroupId) -> Result<()> {
        let Some(root) = self.work.group(group)?.root() else {
            self.work.group_mut(group)?.set_relation_indexes(Vec::new());
            return Ok(());
        };
        let order = self.pre_order(group, root)?;
        let mut relation_indexes = Vec::new();
        for &tid in &order {
            let t = self.work.table(tid)?;
            for &idx_id in t.indexes() {
                let idx = self.work.index(idx_id)?;
                let mut columns = Vec::with_capacity(idx.columns().len());
                for col in idx.columns() {
                    let source = self.work.table(col.column.table)?.column(col.column.position)?;
                    let mirror = source.group_column().ok_or_else(|| {
                        eyre::eyre!(
                            "internal consistency error: column '{}' of table '{}' has no group mirror",
                            source.name(),
                            t.name()
                        )
                    })?;
                    columns.push(mirror);
                }
                relation_indexes.push(RelationIndex {
                    name: format!("{}${}", t.name(), idx.name()),
                    columns,
                    unique: idx.is_unique(),
                });
            }
        }
        self.work
            .group_mut(group)?
            .set_relation_indexes(relation_indexes);
        Ok(())
    }

    /// Pre-order walk of the group tree; children are visited in table-id
    /// order for determinism.
    fn pre_order(&self, group: GroupId, root: TableId) -> Result<Vec<TableId>> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(tid) = stack.pop() {
            order.push(tid);
            let t = self.work.table(tid)?;
            let mut children = Vec::new();
            for &jid in t.child_joins() {
                let join = self.work.join(jid)?;
                if self.work.table(join.child())?.group() == Some(group) {
                    children.push(join.child());
                }
            }
            children.sort_unstable();
            children.reverse();
            stack.extend(children);
        }
        Ok(order)
    }

    pub fn add_index(
        &mut self,
        table: TableId,
        name: &str,
        column_names: &[&str],
        unique: bool,
    ) -> Result<IndexId> {
        self.ensure_index_name_free(name)?;
        let t = self.work.table(table)?;
        let mut columns = Vec::with_capacity(column_names.len());
        for (i, col_name) in column_names.iter().enumerate() {
            let pos = t.column_position(col_name).ok_or_else(|| {
                eyre::eyre!("column '{}' not found in table '{}'", col_name, t.name())
            })?;
            columns.push(IndexColumn {
                column: ColumnRef::new(table, pos),
                position: i as u32,
                ascending: true,
                prefix_len: None,
            });
        }
        let id = self.work.allocate_index_id();
        self.work
            .insert_index(IndexDef::new(id, name, IndexKind::Table { table }, columns, unique));
        self.work.table_mut(table)?.add_index(id);
        Ok(id)
    }

    /// Adds a group index spanning columns from multiple tables of one
    /// group. The indexed tables must lie on a single ancestor/descendant
    /// branch; branching declarations are rejected.
    pub fn add_group_index(
        &mut self,
        group: GroupId,
        name: &str,
        columns: &[(TableId, &str)],
        unique: bool,
    ) -> Result<IndexId> {
        self.ensure_index_name_free(name)?;
        ensure!(!columns.is_empty(), "group index '{}' has no columns", name);
        let root = self
            .work
            .group(group)?
            .root()
            .ok_or_else(|| eyre::eyre!("group id {} has no root", group))?;

        let mut leaf = None;
        let mut leaf_depth = 0;
        for (table, _) in columns {
            let t = self.work.table(*table)?;
            ensure!(
                t.group() == Some(group),
                "table '{}' is not a member of group id {}",
                t.name(),
                group
            );
            let depth = self.depth_of(*table)?;
            if leaf.is_none() || depth > leaf_depth {
                leaf = Some(*table);
                leaf_depth = depth;
            }
        }
        let leaf = leaf.expect("columns is non-empty");

        // The branch runs from the group root to the deepest indexed table;
        // every indexed table must sit on it.
        let mut branch = vec![leaf];
        let mut cur = leaf;
        while let Some(j) = self.work.table(cur)?.parent_join() {
            cur = self.work.join(j)?.parent();
            branch.push(cur);
        }
        branch.reverse();
        ensure!(
            branch.first() == Some(&root),
            "group index '{}' leaf table is not reachable from the group root",
            name
        );
        for (table, _) in columns {
            ensure!(
                branch.contains(table),
                "group index '{}' would branch: table '{}' is not an ancestor or descendant of '{}'",
                name,
                self.work.table(*table)?.name(),
                self.work.table(leaf)?.name()
            );
        }

        let mut index_columns = Vec::with_capacity(columns.len());
        for (i, (table, col_name)) in columns.iter().enumerate() {
            let t = self.work.table(*table)?;
            let pos = t.column_position(col_name).ok_or_else(|| {
                eyre::eyre!("column '{}' not found in table '{}'", col_name, t.name())
            })?;
            index_columns.push(IndexColumn {
                column: ColumnRef::new(*table, pos),
                position: i as u32,
                ascending: true,
                prefix_len: None,
            });
        }

        let id = self.work.allocate_index_id();
        self.work.insert_index(IndexDef::new(
            id,
            name,
            IndexKind::Group {
                group,
                tables: branch,
            },
            index_columns,
            unique,
        ));
        Ok(id)
    }

    fn ensure_index_name_free(&self, name: &str) -> Result<()> {
        ensure!(
            self.work.index_by_name(name).is_err(),
            "index '{}' already exists",
            name
        );
        Ok(())
    }

    fn depth_of(&self, table: TableId) -> Result<usize> {
        let mut depth = 0;
        let mut cur = table;
        while let Some(j) = self.work.table(cur)?.parent_join() {
            cur = self.work.join(j)?.parent();
            depth += 1;
        }
        Ok(depth)
    }

    pub fn finish(self) -> Result<Catalog> {
        let checks = default_checks();
        let refs: Vec<&dyn CatalogCheck> = checks.iter().map(|c| c.as_ref()).collect();
        self.finish_with(&refs)
    }

    /// Re-derives all group metadata, hkeys, and index associations, runs
    /// the validation suite, and returns the frozen catalog.
    pub fn finish_with(mut self, checks: &[&dyn CatalogCheck]) -> Result<Catalog> {
        // PK-less tables get their synthesized surrogate key before any
        // derivation depends on primary keys.
        let table_ids: Vec<TableId> = {
            let mut ids: Vec<TableId> = self.work.tables().map(|t| t.id()).collect();
            ids.sort_unstable();
            ids
        };
        for &tid in &table_ids {
            if self.work.table(tid)?.primary_key().is_empty() {
                self.work.table_mut(tid)?.synthesize_surrogate_key();
            }
        }

        // Every table gets a primary-key index; for tables without a parent
        // join its key coincides with the hkey and no separate storage
        // object is kept.
        for &tid in &table_ids {
            let t = self.work.table(tid)?;
            let pkey_name = format!("{}_pkey", t.name());
            if self.work.index_by_name(&pkey_name).is_err() {
                let pk_names: Vec<String> = t
                    .primary_key()
                    .iter()
                    .map(|pos| t.columns()[*pos].name().to_string())
                    .collect();
                let refs: Vec<&str> = pk_names.iter().map(|s| s.as_str()).collect();
                self.add_index(tid, &pkey_name, &refs, true)?;
            }
        }

        let group_ids: Vec<GroupId> = {
            let mut ids: Vec<GroupId> = self.work.groups().map(|g| g.id()).collect();
            ids.sort_unstable();
            ids
        };
        for &gid in &group_ids {
            self.recompute_group_columns(gid)?;
        }

        for &tid in &table_ids {
            let hkey = derive_hkey(&self.work, tid)?;
            self.work.table_mut(tid)?.set_hkey(Some(hkey));
        }

        for &gid in &group_ids {
            self.recompute_group_indexes(gid)?;
        }

        let index_ids: Vec<IndexId> = {
            let mut ids: Vec<IndexId> = self.work.indexes().map(|i| i.id()).collect();
            ids.sort_unstable();
            ids
        };
        // Freezing only reads table definitions, which no longer change at
        // this point, so one snapshot serves every index.
        let snapshot = self.work.clone();
        for &iid in &index_ids {
            let equivalent = self.is_hkey_equivalent(iid)?;
            let idx = self.work.index_mut(iid)?;
            idx.set_hkey_equivalent(equivalent);
            idx.freeze(&snapshot)?;
        }

        run_checks(&self.work, checks)?;
        self.work.set_frozen(true);
        Ok(self.work)
    }

    /// An index is hkey-equivalent when it is the unique primary-key index
    /// of a table whose hkey is a single segment (no parent join), so the
    /// index key would duplicate the physical key.
    fn is_hkey_equivalent(&self, index: IndexId) -> Result<bool> {
        let idx = self.work.index(index)?;
        let IndexKind::Table { table } = *idx.kind() else {
            return Ok(false);
        };
        if !idx.is_unique() {
            return Ok(false);
        }
        let t = self.work.table(table)?;
        if t.parent_join().is_some() {
            return Ok(false);
        }
        let declared: Vec<usize> = idx
            .columns()
            .iter()
            .map(|c| c.column.position)
            .collect();
        Ok(declared == t.primary_key() && idx.columns().iter().all(|c| c.ascending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::hkey::FlatHKeyEntry;
    use crate::schema::index::{HKeySource, RowCompositionEntry};
    use crate::types::DataType;

    fn col(name: &str, dt: DataType) -> ColumnDef {
        ColumnDef::new(name, dt)
    }

    /// customer(cid PK, name) <- order(oid PK, cid FK, salesman) <- item(iid PK, oid FK)
    fn build_coi() -> (Catalog, TableId, TableId, TableId) {
        let mut b = SchemaBuilder::new();
        let customer = b
            .add_table(
                "app",
                "customer",
                vec![col("cid", DataType::Int), col("name", DataType::Text)],
            )
            .unwrap();
        b.set_primary_key(customer, &["cid"]).unwrap();
        let order = b
            .add_table(
                "app",
                "order",
                vec![
                    col("oid", DataType::Int),
                    col("cid", DataType::Int),
                    col("salesman", DataType::Text),
                ],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        let item = b
            .add_table(
                "app",
                "item",
                vec![col("iid", DataType::Int), col("oid", DataType::Int)],
            )
            .unwrap();
        b.set_primary_key(item, &["iid"]).unwrap();

        b.declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])
            .unwrap();
        b.declare_join("fk_item_order", "app.order", item, &[("oid", "oid")])
            .unwrap();

        let group = b.create_group("customers");
        b.assign_to_group(group, customer).unwrap();
        b.assign_to_group(group, order).unwrap();
        b.assign_to_group(group, item).unwrap();

        let catalog = b.finish().unwrap();
        (catalog, customer, order, item)
    }

    #[test]
    fn hkey_is_prefix_extension_of_parent_hkey() {
        let (catalog, customer, order, item) = build_coi();
        let c_hkey = catalog.table(customer).unwrap().hkey().unwrap();
        let o_hkey = catalog.table(order).unwrap().hkey().unwrap();
        let i_hkey = catalog.table(item).unwrap().hkey().unwrap();

        assert_eq!(c_hkey.segments().len(), 1);
        assert_eq!(o_hkey.segments().len(), 2);
        assert_eq!(i_hkey.segments().len(), 3);

        // Parent segments agree on table and ordinal.
        for (p, c) in c_hkey.segments().iter().zip(o_hkey.segments()) {
            assert_eq!(p.table, c.table);
            assert_eq!(p.ordinal, c.ordinal);
            assert_eq!(p.columns.len(), c.columns.len());
        }
        // Own segments carry only the non-contributed key columns.
        assert_eq!(o_hkey.own_segment().columns.len(), 1);
        assert_eq!(i_hkey.own_segment().columns.len(), 1);
    }

    #[test]
    fn hkey_sources_follow_the_join_chain() {
        let (catalog, _, order, item) = build_coi();
        let o_hkey = catalog.table(order).unwrap().hkey().unwrap();
        // The order's customer segment is sourced from its own cid field.
        assert_eq!(o_hkey.segments()[0].columns[0].source_field, Some(1));

        let i_hkey = catalog.table(item).unwrap().hkey().unwrap();
        // The item cannot source the customer's cid; only an ancestor lookup
        // can supply it.
        assert_eq!(i_hkey.segments()[0].columns[0].source_field, None);
        // But the order's oid is the item's own foreign key.
        assert_eq!(i_hkey.segments()[1].columns[0].source_field, Some(1));
    }

    #[test]
    fn compound_primary_key_carries_grandparent_values_down() {
        let mut b = SchemaBuilder::new();
        let customer = b
            .add_table("app", "customer", vec![col("cid", DataType::Int)])
            .unwrap();
        b.set_primary_key(customer, &["cid"]).unwrap();
        let order = b
            .add_table(
                "app",
                "order",
                vec![col("cid", DataType::Int), col("oid", DataType::Int)],
            )
            .unwrap();
        b.set_primary_key(order, &["cid", "oid"]).unwrap();
        let item = b
            .add_table(
                "app",
                "item",
                vec![
                    col("cid", DataType::Int),
                    col("oid", DataType::Int),
                    col("iid", DataType::Int),
                ],
            )
            .unwrap();
        b.set_primary_key(item, &["iid"]).unwrap();
        b.declare_join("fk_o_c", "app.customer", order, &[("cid", "cid")])
            .unwrap();
        b.declare_join(
            "fk_i_o",
            "app.order",
            item,
            &[("cid", "cid"), ("oid", "oid")],
        )
        .unwrap();
        let g = b.create_group("customers");
        b.assign_to_group(g, customer).unwrap();
        b.assign_to_group(g, order).unwrap();
        b.assign_to_group(g, item).unwrap();
        let catalog = b.finish().unwrap();

        let i_hkey = catalog.table(item).unwrap().hkey().unwrap();
        // With cid part of the order's primary key, the item's own row
        // carries the customer segment value: no ancestor lookup needed.
        assert_eq!(i_hkey.segments()[0].columns[0].source_field, Some(0));
    }

    #[test]
    fn forward_referenced_join_resolves_when_parent_appears() {
        let mut b = SchemaBuilder::new();
        let order = b
            .add_table(
                "app",
                "order",
                vec![col("oid", DataType::Int), col("cid", DataType::Int)],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        let pending = b
            .declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])
            .unwrap();
        assert!(pending.is_none());
        assert_eq!(b.catalog().pending_joins().len(), 1);

        let customer = b
            .add_table("app", "customer", vec![col("cid", DataType::Int)])
            .unwrap();
        assert!(b.catalog().pending_joins().is_empty());
        let order_def = b.catalog().table(order).unwrap();
        let join = b.catalog().join(order_def.parent_join().unwrap()).unwrap();
        assert_eq!(join.parent(), customer);
        assert_eq!(join.pairs(), &[(0, 1)]);
    }

    #[test]
    fn assigning_to_a_second_group_fails() {
        let mut b = SchemaBuilder::new();
        let t = b
            .add_table("app", "t", vec![col("id", DataType::Int)])
            .unwrap();
        b.set_primary_key(t, &["id"]).unwrap();
        let g1 = b.create_group("g1");
        let g2 = b.create_group("g2");
        b.assign_to_group(g1, t).unwrap();
        let err = b.assign_to_group(g2, t).unwrap_err();
        assert!(err.to_string().contains("already in a different group"));
    }

    #[test]
    fn join_cycle_is_rejected() {
        let mut b = SchemaBuilder::new();
        let a = b
            .add_table("app", "a", vec![col("id", DataType::Int), col("b_id", DataType::Int)])
            .unwrap();
        b.set_primary_key(a, &["id"]).unwrap();
        let bt = b
            .add_table("app", "b", vec![col("id", DataType::Int), col("a_id", DataType::Int)])
            .unwrap();
        b.set_primary_key(bt, &["id"]).unwrap();
        b.declare_join("fk_b_a", "app.a", bt, &[("id", "a_id")]).unwrap();
        let err = b
            .declare_join("fk_a_b", "app.b", a, &[("id", "b_id")])
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn tree_names_are_unique_and_deterministic() {
        let mut b = SchemaBuilder::new();
        let g1 = b.create_group("orders");
        let g2 = b.create_group("orders");
        assert_eq!(b.catalog().group(g1).unwrap().tree_name(), "orders");
        assert_eq!(b.catalog().group(g2).unwrap().tree_name(), "orders$2");
    }

    #[test]
    fn group_columns_mirror_members_in_pre_order() {
        let (catalog, customer, order, item) = build_coi();
        let group = catalog.table(customer).unwrap().group().unwrap();
        let g = catalog.group(group).unwrap();
        assert_eq!(g.root(), Some(customer));

        let names: Vec<&str> = g.relation().columns().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec![
                "customer$cid",
                "customer$name",
                "order$oid",
                "order$cid",
                "order$salesman",
                "item$iid",
                "item$oid"
            ]
        );

        // Back references are symmetric and never chained.
        let cust = catalog.table(customer).unwrap();
        let mirror_pos = cust.columns()[0].group_column().unwrap();
        let mirror = &g.relation().columns()[mirror_pos];
        assert_eq!(mirror.user_column(), Some(ColumnRef::new(customer, 0)));
        assert_eq!(mirror.group_column(), None);
        let _ = (order, item);
    }

    #[test]
    fn recomputing_group_metadata_twice_is_idempotent() {
        let (catalog, customer, _, _) = build_coi();
        let group = catalog.table(customer).unwrap().group().unwrap();

        let mut b = SchemaBuilder::edit(&catalog);
        b.recompute_group_columns(group).unwrap();
        b.recompute_group_indexes(group).unwrap();
        let once_cols = b.catalog().group(group).unwrap().relation().clone();
        let once_idx = b.catalog().group(group).unwrap().relation_indexes().to_vec();
        b.recompute_group_columns(group).unwrap();
        b.recompute_group_indexes(group).unwrap();
        assert_eq!(b.catalog().group(group).unwrap().relation(), &once_cols);
        assert_eq!(b.catalog().group(group).unwrap().relation_indexes(), &once_idx);
    }

    #[test]
    fn pk_less_table_gets_surrogate_key_and_hkey() {
        let mut b = SchemaBuilder::new();
        let log = b
            .add_table("app", "log", vec![col("msg", DataType::Text)])
            .unwrap();
        let g = b.create_group("log");
        b.assign_to_group(g, log).unwrap();
        let catalog = b.finish().unwrap();

        let t = catalog.table(log).unwrap();
        assert!(t.has_surrogate_key());
        let hkey = t.hkey().unwrap();
        assert_eq!(hkey.segments().len(), 1);
        assert_eq!(hkey.own_segment().columns.len(), 1);
        assert_eq!(
            hkey.own_segment().columns[0].column,
            ColumnRef::new(log, t.primary_key()[0])
        );
    }

    #[test]
    fn root_pk_index_is_hkey_equivalent_child_pk_index_is_not() {
        let (catalog, _, _, _) = build_coi();
        assert!(catalog
            .index_by_name("customer_pkey")
            .unwrap()
            .is_hkey_equivalent());
        assert!(!catalog
            .index_by_name("order_pkey")
            .unwrap()
            .is_hkey_equivalent());
    }

    #[test]
    fn branching_group_index_is_rejected() {
        let mut b = SchemaBuilder::new();
        let customer = b
            .add_table("app", "customer", vec![col("cid", DataType::Int)])
            .unwrap();
        b.set_primary_key(customer, &["cid"]).unwrap();
        let order = b
            .add_table(
                "app",
                "order",
                vec![col("oid", DataType::Int), col("cid", DataType::Int)],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        let address = b
            .add_table(
                "app",
                "address",
                vec![col("aid", DataType::Int), col("cid", DataType::Int)],
            )
            .unwrap();
        b.set_primary_key(address, &["aid"]).unwrap();
        b.declare_join("fk_o_c", "app.customer", order, &[("cid", "cid")])
            .unwrap();
        b.declare_join("fk_a_c", "app.customer", address, &[("cid", "cid")])
            .unwrap();
        let g = b.create_group("customers");
        b.assign_to_group(g, customer).unwrap();
        b.assign_to_group(g, order).unwrap();
        b.assign_to_group(g, address).unwrap();

        let err = b
            .add_group_index(g, "gidx_bad", &[(order, "oid"), (address, "aid")], false)
            .unwrap_err();
        assert!(err.to_string().contains("branch"));
    }

    #[test]
    fn removing_a_join_splits_the_group() {
        let mut b = SchemaBuilder::new();
        let customer = b
            .add_table("app", "customer", vec![col("cid", DataType::Int)])
            .unwrap();
        b.set_primary_key(customer, &["cid"]).unwrap();
        let order = b
            .add_table(
                "app",
                "order",
                vec![col("oid", DataType::Int), col("cid", DataType::Int)],
            )
            .unwrap();
        b.set_primary_key(order, &["oid"]).unwrap();
        let join = b
            .declare_join("fk_o_c", "app.customer", order, &[("cid", "cid")])
            .unwrap()
            .unwrap();
        let g = b.create_group("customers");
        b.assign_to_group(g, customer).unwrap();
        b.assign_to_group(g, order).unwrap();

        b.remove_join(join).unwrap();

        // The root side keeps the group; the orphaned side has no remaining
        // joins, so it becomes ungrouped rather than a new group.
        let cat = b.catalog();
        assert_eq!(cat.table(customer).unwrap().group(), Some(g));
        assert_eq!(cat.table(order).unwrap().group(), None);
        assert_eq!(cat.group(g).unwrap().root(), Some(customer));
    }

    #[test]
    fn index_row_composition_appends_missing_hkey_columns() {
        let (catalog, _, order, _) = build_coi();
        let idx = catalog.index_by_name("order_pkey").unwrap();
        let comp = idx.row_composition().unwrap();
        // Declared: oid. Appended: cid (the customer hkey segment value,
        // available as the order's own foreign-key field).
        assert_eq!(comp.len(), 2);
        assert_eq!(comp.entries()[0], RowCompositionEntry::Field(0));
        assert_eq!(comp.entries()[1], RowCompositionEntry::Field(1));

        let to_hkey = idx.to_hkey().unwrap();
        let hkey = catalog.table(order).unwrap().hkey().unwrap();
        assert_eq!(to_hkey.len(), hkey.flattened_len());
        assert!(matches!(to_hkey.entries()[0], HKeySource::Ordinal(_)));
        assert_eq!(to_hkey.entries()[1], HKeySource::IndexRow(1));
        assert!(matches!(to_hkey.entries()[2], HKeySource::Ordinal(_)));
        assert_eq!(to_hkey.entries()[3], HKeySource::IndexRow(0));
    }

    #[test]
    fn item_pk_index_carries_unsourceable_ancestor_value_from_hkey() {
        let (catalog, _, _, item) = build_coi();
        let idx = catalog.index_by_name("item_pkey").unwrap();
        let comp = idx.row_composition().unwrap();
        // Declared: iid. Appended: customer cid (only available from the
        // computed hkey) and order oid (the item's own foreign key).
        assert_eq!(comp.len(), 3);
        assert_eq!(comp.entries()[0], RowCompositionEntry::Field(0));
        assert!(matches!(
            comp.entries()[1],
            RowCompositionEntry::HKeyPosition(_)
        ));
        assert_eq!(comp.entries()[2], RowCompositionEntry::Field(1));

        let hkey = catalog.table(item).unwrap().hkey().unwrap();
        assert_eq!(idx.to_hkey().unwrap().len(), hkey.flattened_len());
        // Every value position of the hkey is reachable from the index row.
        for entry in idx.to_hkey().unwrap().entries() {
            assert!(!matches!(entry, HKeySource::Field(_)));
        }
        let flat = hkey.flattened();
        assert!(matches!(flat[0], FlatHKeyEntry::Ordinal(1)));
    }

    #[test]
    fn group_relation_indexes_are_content_named_mirrors() {
        let (catalog, customer, _, _) = build_coi();
        let group = catalog.table(customer).unwrap().group().unwrap();
        let g = catalog.group(group).unwrap();
        let names: Vec<&str> = g.relation_indexes().iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"customer$customer_pkey"));
        assert!(names.contains(&"order$order_pkey"));
        assert!(names.contains(&"item$item_pkey"));
    }
}
