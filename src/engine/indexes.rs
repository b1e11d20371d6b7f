//! # Secondary Index Maintenance
//!
//! Index entries are store keys of the form `'i' + int(index id) + encoded
//! row values`, with an empty stored value: everything an index-driven scan
//! needs, including the owning row's hkey, is recoverable from the key via
//! the index's frozen associations.
//!
//! Group indexes over a multi-table branch flatten their row across the
//! branch, so computing an entry for a leaf row may fetch ancestor rows by
//! hkey prefix; a missing ancestor (orphan leaf) contributes NULLs. When an
//! ancestor row appears, disappears, or changes in place, the affected
//! descendant entries are recomputed with an explicit before/after override
//! of that ancestor's values, because the store only ever holds one of the
//! two states.

use super::keys::{group_prefix_for, index_prefix, segment_boundaries};
use super::row::{split_envelope, RowCodec};
use crate::encoding::{decode_values, encode_value};
use crate::schema::catalog::Catalog;
use crate::schema::index::{IndexDef, IndexKind, RowCompositionEntry};
use crate::schema::table::TableDef;
use crate::schema::TableId;
use crate::store::StoreTransaction;
use crate::types::Value;
use eyre::{ensure, Result};

/// All physically stored indexes keyed by rows of `table`: its table indexes
/// plus group indexes whose branch leaf is `table`. HKey-equivalent indexes
/// have no storage object and are excluded.
pub(crate) fn stored_indexes<'a>(catalog: &'a Catalog, table: &TableDef) -> Vec<&'a IndexDef> {
    let mut out = Vec::new();
    for &id in table.indexes() {
        if let Ok(idx) = catalog.index(id) {
            if !idx.is_hkey_equivalent() {
                out.push(idx);
            }
        }
    }
    for id in catalog.group_indexes_with_leaf(table.id()) {
        if let Ok(idx) = catalog.index(id) {
            out.push(idx);
        }
    }
    out
}

/// Store-key prefixes of every stored index keyed by rows of `table`, for
/// bulk removal.
pub(crate) fn index_prefix_entries(catalog: &Catalog, table: &TableDef) -> Vec<Vec<u8>> {
    stored_indexes(catalog, table)
        .iter()
        .map(|i| index_prefix(i.id()))
        .collect()
}

/// Substitution for one branch table while flattening: `Some(values)` uses
/// the given row instead of the stored one, `None` treats the row as absent.
pub(crate) type BranchOverride<'a> = Option<(TableId, Option<&'a [Value]>)>;

/// Values for each position of an index row keyed by a leaf-table row.
/// `hkey_bytes` is the row's current (or prospective) hkey.
pub(crate) fn index_row_values<T: StoreTransaction, C: RowCodec>(
    txn: &mut T,
    catalog: &Catalog,
    codec: &C,
    index: &IndexDef,
    leaf_values: &[Value],
    hkey_bytes: &[u8],
    override_row: BranchOverride<'_>,
) -> Result<Vec<Value>> {
    let hkey_flat = decode_values(hkey_bytes)?;

    let branch = index.branch_tables();
    let leaf_id = index.leaf_table();
    let mut flattened: Vec<Value> = Vec::new();
    if branch.len() == 1 {
        flattened.extend_from_slice(leaf_values);
    } else {
        // Branch tables align with the leaf's hkey segments, so each
        // ancestor row sits at a segment prefix of the leaf's key.
        let leaf_table = catalog.table(leaf_id)?;
        let hkey = leaf_table.hkey()?;
        let bounds = segment_boundaries(hkey, hkey_bytes)?;
        let prefix = group_prefix_for(catalog, leaf_table)?;
        for (i, &tid) in branch.iter().enumerate() {
            let t = catalog.table(tid)?;
            if tid == leaf_id {
                flattened.extend_from_slice(leaf_values);
                continue;
            }
            match override_row {
                Some((otid, replacement)) if otid == tid => match replacement {
                    Some(vals) => flattened.extend_from_slice(vals),
                    None => flattened.extend(vec![Value::Null; t.columns().len()]),
                },
                _ => {
                    let mut key = prefix.clone();
                    key.extend_from_slice(&hkey_bytes[..bounds[i + 1]]);
                    match txn.get(&key)? {
                        Some(stored) => {
                            let (_, body) = split_envelope(&stored)?;
                            flattened.extend(codec.decode(t, body)?);
                        }
                        None => flattened.extend(vec![Value::Null; t.columns().len()]),
                    }
                }
            }
        }
    }

    let composition = index.row_composition()?;
    let mut out = Vec::with_capacity(composition.len());
    for entry in composition.entries() {
        match entry {
            RowCompositionEntry::Field(f) => {
                out.push(flattened.get(*f).cloned().unwrap_or(Value::Null))
            }
            RowCompositionEntry::HKeyPosition(p) => {
                out.push(hkey_flat.get(*p).cloned().unwrap_or(Value::Null))
            }
        }
    }
    Ok(out)
}

pub(crate) fn index_entry_key(index: &IndexDef, row_values: &[Value]) -> Vec<u8> {
    let mut key = index_prefix(index.id());
    for v in row_values {
        encode_value(v, &mut key);
    }
    key
}

pub(crate) fn add_index_entries<T: StoreTransaction, C: RowCodec>(
    txn: &mut T,
    catalog: &Catalog,
    codec: &C,
    table: &TableDef,
    values: &[Value],
    hkey_bytes: &[u8],
) -> Result<()> {
    for index in stored_indexes(catalog, table) {
        let row = index_row_values(txn, catalog, codec, index, values, hkey_bytes, None)?;
        txn.put(&index_entry_key(index, &row), &[])?;
    }
    Ok(())
}

pub(crate) fn remove_index_entries<T: StoreTransaction, C: RowCodec>(
    txn: &mut T,
    catalog: &Catalog,
    codec: &C,
    table: &TableDef,
    values: &[Value],
    hkey_bytes: &[u8],
    override_row: BranchOverride<'_>,
) -> Result<()> {
    for index in stored_indexes(catalog, table) {
        let row = index_row_values(txn, catalog, codec, index, values, hkey_bytes, override_row)?;
        txn.remove(&index_entry_key(index, &row))?;
    }
    Ok(())
}

/// Enforces unique indexes for a prospective row before any write. The scan
/// covers the declared-column prefix only; rows whose declared values
/// include NULL are exempt, NULLs being distinct from each other.
pub(crate) fn check_unique_indexes<T: StoreTransaction, C: RowCodec>(
    txn: &mut T,
    catalog: &Catalog,
    codec: &C,
    table: &TableDef,
    values: &[Value],
    hkey_bytes: &[u8],
) -> Result<()> {
    for index in stored_indexes(catalog, table) {
        if !index.is_unique() {
            continue;
        }
        let row = index_row_values(txn, catalog, codec, index, values, hkey_bytes, None)?;
        check_unique_entry(txn, table, index, &row)?;
    }
    Ok(())
}

pub(crate) fn check_unique_entry<T: StoreTransaction>(
    txn: &mut T,
    table: &TableDef,
    index: &IndexDef,
    row_values: &[Value],
) -> Result<()> {
    let declared = &row_values[..index.columns().len()];
    if declared.iter().any(Value::is_null) {
        return Ok(());
    }
    let mut key = index_prefix(index.id());
    for v in declared {
        encode_value(v, &mut key);
    }
    let hits = txn.scan_prefix(&key)?;
    ensure!(
        hits.is_empty(),
        "duplicate key value violates unique index '{}' of table '{}'",
        index.name(),
        table.name()
    );
    Ok(())
}

/// Recomputes group-index entries of descendant leaf rows after a branch
/// ancestor's stored fields changed: the ancestor appeared, disappeared, or
/// was rewritten in place. `old_override` and `new_override` describe the
/// ancestor's before and after states relative to what the store currently
/// holds.
pub(crate) fn refresh_descendant_group_indexes<T: StoreTransaction, C: RowCodec>(
    txn: &mut T,
    catalog: &Catalog,
    codec: &C,
    table: &TableDef,
    hkey_bytes: &[u8],
    old_override: BranchOverride<'_>,
    new_override: BranchOverride<'_>,
) -> Result<()> {
    let affected: Vec<&IndexDef> = catalog
        .indexes()
        .filter(|i| {
            matches!(i.kind(), IndexKind::Group { .. })
                && i.branch_tables().contains(&table.id())
                && i.leaf_table() != table.id()
        })
        .collect();
    if affected.is_empty() {
        return Ok(());
    }

    let prefix = group_prefix_for(catalog, table)?;
    let mut scan_key = prefix.clone();
    scan_key.extend_from_slice(hkey_bytes);
    for (key, value) in txn.scan_prefix(&scan_key)? {
        if key.len() == scan_key.len() {
            continue;
        }
        let (tid, body) = split_envelope(&value)?;
        for index in &affected {
            if index.leaf_table() != tid {
                continue;
            }
            let leaf = catalog.table(tid)?;
            let leaf_values = codec.decode(leaf, body)?;
            let leaf_hkey = &key[prefix.len()..];
            let old_row =
                index_row_values(txn, catalog, codec, index, &leaf_values, leaf_hkey, old_override)?;
            let new_row =
                index_row_values(txn, catalog, codec, index, &leaf_values, leaf_hkey, new_override)?;
            if old_row != new_row {
                txn.remove(&index_entry_key(index, &old_row))?;
                txn.put(&index_entry_key(index, &new_row), &[])?;
            }
        }
    }
    Ok(())
}
