//! # Physical Key Construction
//!
//! The store holds three key spaces, distinguished by a leading tag byte:
//!
//! ```text
//! 'g' + text(tree name) + hkey bytes          group relation rows
//! 'i' + int(index id)   + index row values    secondary index entries
//! 'c' + int(table id)                         surrogate key counters
//! ```
//!
//! Hkey bytes are the flattened hkey encoded position by position: each
//! segment's ordinal as an integer, then its column values. Because every
//! encoded value is self-delimiting, a stored key can be split back into
//! segment prefixes, which is how orphan propagation rewrites an ancestor
//! prefix in place.
//!
//! ## Row placement
//!
//! A row's key is its parent's stored hkey extended with its own segment
//! when the parent row exists. When it does not, the row is an **orphan**
//! and its key is synthesized from its own fields: sourced positions take
//! the row's values, everything else takes the NULL marker, which sorts
//! first within the sibling range.

use crate::encoding::{
    decode_values, encode_int, encode_null, encode_text, encode_value, skip_value,
};
use crate::schema::catalog::Catalog;
use crate::schema::hkey::{FlatHKeyEntry, HKey};
use crate::schema::index::{HKeySource, IndexDef};
use crate::schema::table::TableDef;
use crate::schema::{IndexId, TableId};
use crate::store::StoreTransaction;
use crate::types::Value;
use eyre::{bail, ensure, Result};

pub(crate) const GROUP_SPACE: u8 = b'g';
pub(crate) const INDEX_SPACE: u8 = b'i';
pub(crate) const COUNTER_SPACE: u8 = b'c';

pub(crate) fn group_prefix(tree_name: &str) -> Vec<u8> {
    let mut buf = vec![GROUP_SPACE];
    encode_text(tree_name, &mut buf);
    buf
}

pub(crate) fn group_prefix_for(catalog: &Catalog, table: &TableDef) -> Result<Vec<u8>> {
    let group = table
        .group()
        .ok_or_else(|| eyre::eyre!("table '{}' is not assigned to a group", table.name()))?;
    Ok(group_prefix(catalog.group(group)?.tree_name()))
}

pub(crate) fn index_prefix(index: IndexId) -> Vec<u8> {
    let mut buf = vec![INDEX_SPACE];
    encode_int(index as i64, &mut buf);
    buf
}

fn counter_key(table: TableId) -> Vec<u8> {
    let mut buf = vec![COUNTER_SPACE];
    encode_int(table as i64, &mut buf);
    buf
}

/// Advances the table's durable surrogate counter and returns the new value.
/// Counters only move forward; deletes and truncates never reset them.
pub(crate) fn next_surrogate<T: StoreTransaction>(txn: &mut T, table: TableId) -> Result<i64> {
    let key = counter_key(table);
    let current = match txn.get(&key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| eyre::eyre!("corrupt surrogate counter for table id {}", table))?;
            i64::from_be_bytes(raw)
        }
        None => 0,
    };
    let next = current + 1;
    txn.put(&key, &next.to_be_bytes())?;
    Ok(next)
}

/// Cumulative byte length of each segment prefix of an encoded hkey: entry
/// `i` is the length of the first `i` segments. `bytes` may extend past the
/// hkey (a descendant's key).
pub(crate) fn segment_boundaries(hkey: &HKey, bytes: &[u8]) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(hkey.segments().len() + 1);
    out.push(0);
    let mut pos = 0;
    for seg in hkey.segments() {
        for _ in 0..(1 + seg.columns.len()) {
            ensure!(pos < bytes.len(), "stored key shorter than its hkey");
            pos += skip_value(&bytes[pos..])?;
        }
        out.push(pos);
    }
    Ok(out)
}

/// Encodes the row's hkey from its own fields alone: sourced positions take
/// the row's values, unsourced ancestor positions take the NULL marker.
/// This is where an orphan row lives.
pub(crate) fn self_form(hkey: &HKey, values: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in hkey.flattened() {
        match entry {
            FlatHKeyEntry::Ordinal(o) => encode_int(o as i64, &mut buf),
            FlatHKeyEntry::Column(hc) => match hc.source_field {
                Some(f) => encode_value(values.get(f).unwrap_or(&Value::Null), &mut buf),
                None => encode_null(&mut buf),
            },
        }
    }
    buf
}

/// The hkey prefix under which this row's orphaned descendants sort. A child
/// can only source the positions carried down through its join, which are
/// this table's primary-key fields; every other position is the NULL marker
/// in the child's synthesized key.
pub(crate) fn child_visible_form(table: &TableDef, values: &[Value]) -> Result<Vec<u8>> {
    let hkey = table.hkey()?;
    let mut buf = Vec::new();
    for entry in hkey.flattened() {
        match entry {
            FlatHKeyEntry::Ordinal(o) => encode_int(o as i64, &mut buf),
            FlatHKeyEntry::Column(hc) => match hc.source_field {
                Some(f) if table.primary_key().contains(&f) => {
                    encode_value(values.get(f).unwrap_or(&Value::Null), &mut buf)
                }
                _ => encode_null(&mut buf),
            },
        }
    }
    Ok(buf)
}

fn encode_own_segment(hkey: &HKey, values: &[Value], buf: &mut Vec<u8>) -> Result<()> {
    let seg = hkey.own_segment();
    encode_int(seg.ordinal as i64, buf);
    for col in &seg.columns {
        let f = col
            .source_field
            .ok_or_else(|| eyre::eyre!("own hkey segment column without a source field"))?;
        encode_value(values.get(f).unwrap_or(&Value::Null), buf);
    }
    Ok(())
}

/// Computes where a row lives: under its parent's stored hkey when the
/// parent row exists, otherwise at the synthesized orphan position.
pub(crate) fn build_hkey<T: StoreTransaction>(
    txn: &mut T,
    catalog: &Catalog,
    table: &TableDef,
    values: &[Value],
) -> Result<Vec<u8>> {
    let hkey = table.hkey()?;
    if table.parent_join().is_none() {
        let mut buf = Vec::new();
        encode_own_segment(hkey, values, &mut buf)?;
        return Ok(buf);
    }
    match resolve_parent_hkey(txn, catalog, table, values)? {
        Some(mut parent_bytes) => {
            encode_own_segment(hkey, values, &mut parent_bytes)?;
            Ok(parent_bytes)
        }
        None => Ok(self_form(hkey, values)),
    }
}

/// Stored hkey bytes of the row's parent, or `None` when no parent row
/// exists or the foreign key is NULL.
pub(crate) fn resolve_parent_hkey<T: StoreTransaction>(
    txn: &mut T,
    catalog: &Catalog,
    table: &TableDef,
    values: &[Value],
) -> Result<Option<Vec<u8>>> {
    let Some(join_id) = table.parent_join() else {
        return Ok(None);
    };
    let join = catalog.join(join_id)?;
    let parent = catalog.table(join.parent())?;
    // Pair order equals the parent's primary key order; validated at freeze.
    let mut pk_values = Vec::with_capacity(join.pairs().len());
    for (_, child_pos) in join.pairs() {
        let v = values.get(*child_pos).cloned().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(None);
        }
        pk_values.push(v);
    }
    find_row_hkey(txn, catalog, parent, &pk_values)
}

/// The table's primary-key index: the unique index over exactly the
/// primary-key columns in order.
pub(crate) fn pk_index<'a>(catalog: &'a Catalog, table: &TableDef) -> Result<&'a IndexDef> {
    table
        .indexes()
        .iter()
        .filter_map(|id| catalog.index(*id).ok())
        .find(|idx| {
            idx.is_unique()
                && idx.columns().len() == table.primary_key().len()
                && idx
                    .columns()
                    .iter()
                    .zip(table.primary_key())
                    .all(|(c, pk)| c.column.position == *pk && c.column.table == table.id())
        })
        .ok_or_else(|| eyre::eyre!("table '{}' has no primary key index", table.name()))
}

/// Locates an existing row by primary key, returning its stored hkey bytes.
pub(crate) fn find_row_hkey<T: StoreTransaction>(
    txn: &mut T,
    catalog: &Catalog,
    table: &TableDef,
    pk_values: &[Value],
) -> Result<Option<Vec<u8>>> {
    let index = pk_index(catalog, table)?;
    if index.is_hkey_equivalent() {
        // The pk index of a rootward table is the group relation itself.
        let hkey = table.hkey()?;
        let mut bytes = Vec::new();
        encode_int(hkey.own_segment().ordinal as i64, &mut bytes);
        for v in pk_values {
            encode_value(v, &mut bytes);
        }
        let mut key = group_prefix_for(catalog, table)?;
        key.extend_from_slice(&bytes);
        return Ok(txn.get(&key)?.map(|_| bytes));
    }
    let prefix = index_prefix(index.id());
    let mut scan_key = prefix.clone();
    for v in pk_values {
        encode_value(v, &mut scan_key);
    }
    let entries = txn.scan_prefix(&scan_key)?;
    let Some((key, _)) = entries.first() else {
        return Ok(None);
    };
    Ok(Some(hkey_from_index_key(index, &key[prefix.len()..])?))
}

/// Rebuilds a row's hkey bytes from one of its index keys (prefix stripped).
pub(crate) fn hkey_from_index_key(index: &IndexDef, key_bytes: &[u8]) -> Result<Vec<u8>> {
    let values = decode_values(key_bytes)?;
    let mut out = Vec::new();
    for source in index.to_hkey()?.entries() {
        match source {
            HKeySource::Ordinal(o) => encode_int(*o as i64, &mut out),
            HKeySource::IndexRow(j) => {
                let v = values.get(*j).ok_or_else(|| {
                    eyre::eyre!("index key for '{}' is missing position {}", index.name(), j)
                })?;
                encode_value(v, &mut out);
            }
            HKeySource::Field(_) => {
                bail!(
                    "index '{}' requires a row fetch to rebuild its hkey",
                    index.name()
                )
            }
        }
    }
    Ok(out)
}
