//! # Index Definitions and Row/HKey Mappings
//!
//! An index is either table-scoped or group-scoped. A group index spans
//! columns from multiple tables of one group, restricted to a single
//! ancestor/descendant branch; branching declarations are rejected by the
//! builder. The two kinds are a closed variant ([`IndexKind`]), not an open
//! hierarchy.
//!
//! Once an index's columns are final they are sorted by declared position
//! and two association tables are computed in a single pass and frozen:
//!
//! - [`IndexRowComposition`]: for each position of the physical index row,
//!   where its value comes from when the row is written: a stored row field
//!   (flattened across the branch for group indexes) or an hkey position.
//!   The composition appends whatever hkey columns the declared columns do
//!   not already cover, so an index row always carries enough information to
//!   reconstruct the owning row's hkey without a second lookup.
//! - [`IndexToHKey`]: the inverse. For each position of the owning table's
//!   hkey, a literal table-ordinal constant, an index-row position, or a
//!   stored-row field. Used to rebuild an hkey directly from an index row
//!   during an index-driven scan.

use super::catalog::Catalog;
use super::hkey::FlatHKeyEntry;
use super::{ColumnRef, GroupId, IndexId, TableId};
use eyre::{ensure, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    Table {
        table: TableId,
    },
    /// Group index over one branch; `tables` runs root-side to leaf.
    Group {
        group: GroupId,
        tables: Vec<TableId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    pub column: ColumnRef,
    /// Declared position within the index.
    pub position: u32,
    pub ascending: bool,
    /// Optional truncation length for long variable-width values.
    pub prefix_len: Option<u32>,
}

/// Source of one physical index-row position at write time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowCompositionEntry {
    /// Field of the (branch-flattened) stored row.
    Field(usize),
    /// Position of the owning row's flattened hkey.
    HKeyPosition(usize),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexRowComposition {
    entries: Vec<RowCompositionEntry>,
}

impl IndexRowComposition {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RowCompositionEntry] {
        &self.entries
    }
}

/// Source of one flattened hkey position when rebuilding from an index row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HKeySource {
    /// Literal table-ordinal constant.
    Ordinal(u32),
    /// Value sits in the index row at this position.
    IndexRow(usize),
    /// Value sits in the stored row at this field. No current mapping emits
    /// this; it is the shape a covering optimization would use.
    Field(usize),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexToHKey {
    entries: Vec<HKeySource>,
}

impl IndexToHKey {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[HKeySource] {
        &self.entries
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    id: IndexId,
    name: String,
    kind: IndexKind,
    columns: Vec<IndexColumn>,
    unique: bool,
    hkey_equivalent: bool,
    row_composition: Option<IndexRowComposition>,
    to_hkey: Option<IndexToHKey>,
}

impl IndexDef {
    pub fn new(
        id: IndexId,
        name: impl Into<String>,
        kind: IndexKind,
        columns: Vec<IndexColumn>,
        unique: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            columns,
            unique,
            hkey_equivalent: false,
            row_composition: None,
            to_hkey: None,
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether the index key coincides with the physical hkey, making a
    /// separate storage object redundant.
    pub fn is_hkey_equivalent(&self) -> bool {
        self.hkey_equivalent
    }

    /// Branch tables root-side to leaf. A table index's branch is itself.
    pub fn branch_tables(&self) -> &[TableId] {
        match &self.kind {
            IndexKind::Table { table } => std::slice::from_ref(table),
            IndexKind::Group { tables, .. } => tables,
        }
    }

    /// The deepest table of the branch; its hkey keys the index rows.
    pub fn leaf_table(&self) -> TableId {
        *self
            .branch_tables()
            .last()
            .expect("index branch is never empty")
    }

    pub fn row_composition(&self) -> Result<&IndexRowComposition> {
        self.row_composition
            .as_ref()
            .ok_or_else(|| eyre::eyre!("index '{}' has no frozen row composition", self.name))
    }

    pub fn to_hkey(&self) -> Result<&IndexToHKey> {
        self.to_hkey
            .as_ref()
            .ok_or_else(|| eyre::eyre!("index '{}' has no frozen hkey association", self.name))
    }

    /// Flattened-row offset of a branch table's fields.
    pub fn flattened_offset(&self, catalog: &Catalog, table: TableId) -> Result<usize> {
        let mut offset = 0;
        for &tid in self.branch_tables() {
            if tid == table {
                return Ok(offset);
            }
            offset += catalog.table(tid)?.columns().len();
        }
        eyre::bail!(
            "table id {} is not on the branch of index '{}'",
            table,
            self.name
        )
    }

    pub(crate) fn set_hkey_equivalent(&mut self, equivalent: bool) {
        self.hkey_equivalent = equivalent;
    }

    /// Sorts columns by declared position and computes both association
    /// tables; they are immutable afterwards.
    pub(crate) fn freeze(&mut self, catalog: &Catalog) -> Result<()> {
        self.columns.sort_by_key(|c| c.position);
        let (composition, to_hkey) = compute_associations(catalog, self)?;
        self.row_composition = Some(composition);
        self.to_hkey = Some(to_hkey);
        Ok(())
    }
}

/// Single-pass computation of [`IndexRowComposition`] and [`IndexToHKey`].
/// Columns must already be sorted by declared position.
pub(crate) fn compute_associations(
    catalog: &Catalog,
    index: &IndexDef,
) -> Result<(IndexRowComposition, IndexToHKey)> {
    let leaf = index.leaf_table();
    let leaf_table = catalog.table(leaf)?;
    let leaf_offset = index.flattened_offset(catalog, leaf)?;
    let hkey = leaf_table.hkey()?;

    let mut comp: Vec<RowCompositionEntry> = Vec::with_capacity(index.columns().len());
    for col in index.columns() {
        let offset = index.flattened_offset(catalog, col.column.table)?;
        comp.push(RowCompositionEntry::Field(offset + col.column.position));
    }

    let mut to_hkey: Vec<HKeySource> = Vec::with_capacity(hkey.flattened_len());
    for (flat_pos, entry) in hkey.flattened().into_iter().enumerate() {
        match entry {
            FlatHKeyEntry::Ordinal(ord) => to_hkey.push(HKeySource::Ordinal(ord)),
            FlatHKeyEntry::Column(hc) => {
                let declared = index.columns().iter().position(|c| {
                    c.column == hc.column
                        || hc
                            .source_field
                            .map(|f| c.column == ColumnRef::new(leaf, f))
                            .unwrap_or(false)
                });
                if let Some(j) = declared {
                    to_hkey.push(HKeySource::IndexRow(j));
                    continue;
                }
                // Not among the declared columns: append it to the index row
                // so the hkey stays reconstructible. Prefer a stored field of
                // the flattened row over an hkey copy.
                let entry = if let Some(field) = hc.source_field {
                    RowCompositionEntry::Field(leaf_offset + field)
                } else if index.branch_tables().contains(&hc.column.table) {
                    RowCompositionEntry::Field(
                        index.flattened_offset(catalog, hc.column.table)? + hc.column.position,
                    )
                } else {
                    RowCompositionEntry::HKeyPosition(flat_pos)
                };
                let appended_at = comp.len();
                comp.push(entry);
                to_hkey.push(HKeySource::IndexRow(appended_at));
            }
        }
    }

    ensure!(
        to_hkey.len() == hkey.flattened_len(),
        "internal consistency error: hkey association for index '{}' has {} positions, hkey has {}",
        index.name(),
        to_hkey.len(),
        hkey.flattened_len()
    );

    Ok((
        IndexRowComposition { entries: comp },
        IndexToHKey { entries: to_hkey },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_helpers_cover_both_kinds() {
        let table_idx = IndexDef::new(1, "idx_a", IndexKind::Table { table: 7 }, vec![], false);
        assert_eq!(table_idx.branch_tables(), &[7]);
        assert_eq!(table_idx.leaf_table(), 7);

        let group_idx = IndexDef::new(
            2,
            "idx_b",
            IndexKind::Group {
                group: 1,
                tables: vec![3, 5, 9],
            },
            vec![],
            false,
        );
        assert_eq!(group_idx.leaf_table(), 9);
    }

    #[test]
    fn associations_are_unavailable_until_frozen() {
        let idx = IndexDef::new(1, "idx_a", IndexKind::Table { table: 1 }, vec![], false);
        assert!(idx.row_composition().is_err());
        assert!(idx.to_hkey().is_err());
    }
}
