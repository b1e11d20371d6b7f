//! # Hierarchical Key Derivation
//!
//! An hkey is the composite physical key of a table's rows: one segment per
//! table on the root-to-table path through parent joins. Each segment names
//! the table's group ordinal plus the key columns that table contributes
//! beyond what its parent segment already carries. Because a join's
//! foreign-key columns equal the parent's primary key, the parent's key
//! values never need re-listing in the child segment, which makes every
//! table's hkey a strict prefix extension of its parent's hkey, the
//! property that clusters descendants immediately after their ancestor in
//! key order.
//!
//! ## Value sourcing
//!
//! Each hkey column records the *defining* column (the owner table's key
//! column) plus, when one exists, the field of the keyed table's own row
//! that supplies the value (`source_field`). The source is found by mapping
//! the defining column down the join chain: the immediate parent's key
//! values are always present as the child's foreign-key fields; a
//! grandparent's contribution is present only when it is itself part of the
//! parent's primary key (compound-key designs). Columns without a source
//! must be obtained at write time by looking up the parent's primary-key
//! index; that is the orphan-row machinery in the storage engine.

use super::catalog::Catalog;
use super::{ColumnRef, TableId};
use eyre::{ensure, Result};
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq)]
pub struct HKeyColumn {
    /// The key column that defines this hkey position.
    pub column: ColumnRef,
    /// Field of the keyed table's own row supplying the value, when the
    /// join chain carries it down; `None` means an ancestor lookup is
    /// required at write time.
    pub source_field: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HKeySegment {
    pub table: TableId,
    pub ordinal: u32,
    pub columns: Vec<HKeyColumn>,
}

/// One flattened hkey position: the ordinal marker or a value column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlatHKeyEntry<'a> {
    Ordinal(u32),
    Column(&'a HKeyColumn),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HKey {
    segments: Vec<HKeySegment>,
}

impl HKey {
    pub fn segments(&self) -> &[HKeySegment] {
        &self.segments
    }

    /// The keyed table's own segment.
    pub fn own_segment(&self) -> &HKeySegment {
        self.segments.last().expect("hkey has at least one segment")
    }

    /// Total flattened length: one position per segment ordinal plus one per
    /// value column.
    pub fn flattened_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| 1 + s.columns.len())
            .sum()
    }

    /// Flattened length of the first `segments` segments.
    pub fn prefix_len(&self, segments: usize) -> usize {
        self.segments[..segments]
            .iter()
            .map(|s| 1 + s.columns.len())
            .sum()
    }

    /// All positions in flattened order.
    pub fn flattened(&self) -> Vec<FlatHKeyEntry<'_>> {
        let mut out = Vec::with_capacity(self.flattened_len());
        for seg in &self.segments {
            out.push(FlatHKeyEntry::Ordinal(seg.ordinal));
            for col in &seg.columns {
                out.push(FlatHKeyEntry::Column(col));
            }
        }
        out
    }

    /// Fields of the keyed table's own row that determine its hkey: sourced
    /// ancestor contributions (foreign keys) plus its own segment columns.
    pub fn key_determining_fields(&self) -> Vec<usize> {
        let mut fields: Vec<usize> = self
            .segments
            .iter()
            .flat_map(|s| s.columns.iter())
            .filter_map(|c| c.source_field)
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }
}

/// Derives the hkey for `table` by walking its parent-join chain root-ward.
/// Requires group ordinals to be assigned (or an ungrouped table, which gets
/// a single root segment with ordinal 1).
pub fn derive_hkey(catalog: &Catalog, table: TableId) -> Result<HKey> {
    // Root-to-table chain. The cycle guard is defensive; grouping already
    // rejects cycles.
    let mut chain: SmallVec<[TableId; 8]> = SmallVec::new();
    chain.push(table);
    let mut cur = table;
    while let Some(join_id) = catalog.table(cur)?.parent_join() {
        let join = catalog.join(join_id)?;
        cur = join.parent();
        ensure!(
            !chain.contains(&cur),
            "join cycle detected while deriving hkey for table id {}",
            table
        );
        chain.push(cur);
    }
    chain.reverse();

    let mut segments: Vec<HKeySegment> = Vec::new();
    for &tid in &chain {
        let t = catalog.table(tid)?;
        let ordinal = t.ordinal().unwrap_or(1);
        let own_join = t.parent_join().map(|j| catalog.join(j)).transpose()?;

        if let Some(join) = own_join {
            // Re-source every inherited hkey column through this table's
            // join: a value survives only if the parent field carrying it is
            // part of the parent's primary key, i.e. covered by the pairs.
            for seg in segments.iter_mut() {
                for hc in seg.columns.iter_mut() {
                    hc.source_field = hc
                        .source_field
                        .and_then(|parent_pos| join.child_column_for(parent_pos));
                }
            }
        }

        // Own segment: key columns not already contributed by the parent
        // segment through the join's foreign-key pairs.
        let contributed: SmallVec<[usize; 4]> = own_join
            .map(|j| j.pairs().iter().map(|(_, c)| *c).collect())
            .unwrap_or_default();
        let columns = t
            .primary_key()
            .iter()
            .filter(|pos| !contributed.contains(pos))
            .map(|pos| HKeyColumn {
                column: ColumnRef::new(tid, *pos),
                source_field: Some(*pos),
            })
            .collect();

        segments.push(HKeySegment {
            table: tid,
            ordinal,
            columns,
        });
    }

    Ok(HKey { segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_segment_hkey() -> HKey {
        HKey {
            segments: vec![
                HKeySegment {
                    table: 1,
                    ordinal: 1,
                    columns: vec![HKeyColumn {
                        column: ColumnRef::new(1, 0),
                        source_field: Some(1),
                    }],
                },
                HKeySegment {
                    table: 2,
                    ordinal: 2,
                    columns: vec![HKeyColumn {
                        column: ColumnRef::new(2, 0),
                        source_field: Some(0),
                    }],
                },
            ],
        }
    }

    #[test]
    fn flattened_interleaves_ordinals_and_columns() {
        let hkey = two_segment_hkey();
        assert_eq!(hkey.flattened_len(), 4);
        assert_eq!(hkey.prefix_len(1), 2);
        let flat = hkey.flattened();
        assert!(matches!(flat[0], FlatHKeyEntry::Ordinal(1)));
        assert!(matches!(flat[1], FlatHKeyEntry::Column(_)));
        assert!(matches!(flat[2], FlatHKeyEntry::Ordinal(2)));
    }

    #[test]
    fn key_determining_fields_are_sorted_and_deduplicated() {
        let hkey = two_segment_hkey();
        assert_eq!(hkey.key_determining_fields(), vec![0, 1]);
    }
}
