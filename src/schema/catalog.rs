//! # Catalog
//!
//! The catalog is the arena holding every schema entity, addressed by
//! numeric id. All cross-entity relationships are id lookups, so the catalog
//! clones cheaply enough for copy-on-write mutation and has no reference
//! cycles.
//!
//! ## Concurrency
//!
//! A serving catalog is immutable. DDL goes through
//! [`super::builder::SchemaBuilder`], which edits a private clone and
//! produces a new frozen catalog; [`CatalogHolder`] swaps it in atomically
//! for subsequent operations. In-flight operations keep reading the `Arc`
//! they started with.

use super::group::GroupDef;
use super::index::{IndexDef, IndexKind};
use super::join::{JoinDef, PendingJoin};
use super::table::TableDef;
use super::{GroupId, IndexId, JoinId, TableId};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<TableId, TableDef>,
    table_names: HashMap<String, TableId>,
    joins: HashMap<JoinId, JoinDef>,
    groups: HashMap<GroupId, GroupDef>,
    indexes: HashMap<IndexId, IndexDef>,
    pending_joins: Vec<PendingJoin>,
    next_table_id: TableId,
    next_join_id: JoinId,
    next_group_id: GroupId,
    next_index_id: IndexId,
    frozen: bool,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            next_table_id: 1,
            next_join_id: 1,
            next_group_id: 1,
            next_index_id: 1,
            ..Default::default()
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn table(&self, id: TableId) -> Result<&TableDef> {
        self.tables
            .get(&id)
            .ok_or_else(|| eyre::eyre!("table id {} not found", id))
    }

    pub fn table_by_name(&self, qualified: &str) -> Result<&TableDef> {
        let id = self
            .table_names
            .get(qualified)
            .ok_or_else(|| eyre::eyre!("table '{}' not found", qualified))?;
        self.table(*id)
    }

    pub fn table_exists(&self, qualified: &str) -> bool {
        self.table_names.contains_key(qualified)
    }

    pub fn join(&self, id: JoinId) -> Result<&JoinDef> {
        self.joins
            .get(&id)
            .ok_or_else(|| eyre::eyre!("join id {} not found", id))
    }

    pub fn group(&self, id: GroupId) -> Result<&GroupDef> {
        self.groups
            .get(&id)
            .ok_or_else(|| eyre::eyre!("group id {} not found", id))
    }

    pub fn index(&self, id: IndexId) -> Result<&IndexDef> {
        self.indexes
            .get(&id)
            .ok_or_else(|| eyre::eyre!("index id {} not found", id))
    }

    pub fn index_by_name(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .values()
            .find(|i| i.name() == name)
            .ok_or_else(|| eyre::eyre!("index '{}' not found", name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn joins(&self) -> impl Iterator<Item = &JoinDef> {
        self.joins.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupDef> {
        self.groups.values()
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.values()
    }

    /// Member tables of a group, sorted by table id for determinism.
    pub fn group_members(&self, group: GroupId) -> Vec<TableId> {
        let mut members: Vec<TableId> = self
            .tables
            .values()
            .filter(|t| t.group() == Some(group))
            .map(|t| t.id())
            .collect();
        members.sort_unstable();
        members
    }

    /// Joins whose both endpoints are members of the group.
    pub fn group_joins(&self, group: GroupId) -> Vec<JoinId> {
        let mut joins: Vec<JoinId> = self
            .joins
            .values()
            .filter(|j| j.group() == Some(group))
            .map(|j| j.id())
            .collect();
        joins.sort_unstable();
        joins
    }

    /// Group indexes whose leaf (deepest) table is the given table; these
    /// are maintained when that table's rows change.
    pub fn group_indexes_with_leaf(&self, table: TableId) -> Vec<IndexId> {
        let mut out: Vec<IndexId> = self
            .indexes
            .values()
            .filter(|i| matches!(i.kind(), IndexKind::Group { .. }) && i.leaf_table() == table)
            .map(|i| i.id())
            .collect();
        out.sort_unstable();
        out
    }

    pub fn pending_joins(&self) -> &[PendingJoin] {
        &self.pending_joins
    }

    // --- builder-side mutators -------------------------------------------

    pub(crate) fn allocate_table_id(&mut self) -> TableId {
        let id = self.next_table_id;
        self.next_table_id += 1;
        id
    }

    pub(crate) fn allocate_join_id(&mut self) -> JoinId {
        let id = self.next_join_id;
        self.next_join_id += 1;
        id
    }

    pub(crate) fn allocate_group_id(&mut self) -> GroupId {
        let id = self.next_group_id;
        self.next_group_id += 1;
        id
    }

    pub(crate) fn allocate_index_id(&mut self) -> IndexId {
        let id = self.next_index_id;
        self.next_index_id += 1;
        id
    }

    pub(crate) fn insert_table(&mut self, table: TableDef) {
        self.table_names
            .insert(table.qualified_name(), table.id());
        self.tables.insert(table.id(), table);
    }

    pub(crate) fn insert_join(&mut self, join: JoinDef) {
        self.joins.insert(join.id(), join);
    }

    pub(crate) fn insert_group(&mut self, group: GroupDef) {
        self.groups.insert(group.id(), group);
    }

    pub(crate) fn insert_index(&mut self, index: IndexDef) {
        self.indexes.insert(index.id(), index);
    }

    pub(crate) fn remove_join(&mut self, id: JoinId) -> Option<JoinDef> {
        self.joins.remove(&id)
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> Result<&mut TableDef> {
        self.tables
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("table id {} not found", id))
    }

    pub(crate) fn join_mut(&mut self, id: JoinId) -> Result<&mut JoinDef> {
        self.joins
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("join id {} not found", id))
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> Result<&mut GroupDef> {
        self.groups
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("group id {} not found", id))
    }

    pub(crate) fn index_mut(&mut self, id: IndexId) -> Result<&mut IndexDef> {
        self.indexes
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("index id {} not found", id))
    }

    pub(crate) fn push_pending_join(&mut self, pending: PendingJoin) {
        self.pending_joins.push(pending);
    }

    /// Drains pending joins whose parent matches the given qualified name.
    pub(crate) fn take_pending_joins_for(&mut self, qualified: &str) -> Vec<PendingJoin> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for pending in self.pending_joins.drain(..) {
            if pending.parent_table == qualified {
                taken.push(pending);
            } else {
                kept.push(pending);
            }
        }
        self.pending_joins = kept;
        taken
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }
}

/// Holder for the live, in-service catalog. Mutations build a new catalog
/// and [`install`](CatalogHolder::install) it; readers grab an `Arc` and are
/// unaffected by later swaps.
#[derive(Debug)]
pub struct CatalogHolder {
    live: RwLock<Arc<Catalog>>,
}

impl CatalogHolder {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            live: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn current(&self) -> Arc<Catalog> {
        Arc::clone(&self.live.read())
    }

    pub fn install(&self, catalog: Catalog) {
        *self.live.write() = Arc::new(catalog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table::ColumnDef;
    use crate::types::DataType;

    #[test]
    fn lookups_name_the_missing_entity() {
        let catalog = Catalog::new();
        assert!(catalog.table(9).unwrap_err().to_string().contains("table id 9"));
        assert!(catalog
            .table_by_name("app.missing")
            .unwrap_err()
            .to_string()
            .contains("'app.missing'"));
        assert!(catalog.index_by_name("nope").is_err());
    }

    #[test]
    fn holder_swaps_catalogs_atomically() {
        let holder = CatalogHolder::new(Catalog::new());
        let before = holder.current();
        assert!(!before.table_exists("app.t"));

        let mut next = Catalog::new();
        let id = next.allocate_table_id();
        next.insert_table(TableDef::new(
            id,
            "app",
            "t",
            vec![ColumnDef::new("c", DataType::Int)],
        ));
        holder.install(next);

        // The old Arc still reads the old state; new reads see the new one.
        assert!(!before.table_exists("app.t"));
        assert!(holder.current().table_exists("app.t"));
    }
}
