//! # Index Population
//!
//! Builds every entry of one index by scanning its group relation. DDL adds
//! the index definition first, then populates it here; a cooperative
//! cancellation token is checked at a configurable row interval so an
//! abandoned build stops without finishing the scan.

use super::indexes::{index_entry_key, index_row_values};
use super::keys::group_prefix_for;
use super::row::{split_envelope, RowCodec};
use super::{CancellationToken, StorageEngine};
use crate::schema::catalog::Catalog;
use crate::schema::IndexId;
use crate::store::{KeyValueStore, StoreTransaction};
use eyre::{bail, ensure, Result};
use tracing::debug;

impl<S: KeyValueStore, C: RowCodec> StorageEngine<S, C> {
    /// Populates one index from existing rows, returning the number of
    /// entries written.
    pub fn build_index_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        index: IndexId,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let idx = catalog.index(index)?;
        ensure!(
            !idx.is_hkey_equivalent(),
            "index '{}' has no storage object to build",
            idx.name()
        );
        let leaf = catalog.table(idx.leaf_table())?;
        let prefix = group_prefix_for(catalog, leaf)?;
        let interval = self.config.scan_cancellation_interval.max(1);

        let mut built = 0;
        for (seen, (key, value)) in txn.scan_prefix(&prefix)?.into_iter().enumerate() {
            if seen % interval == 0 && cancel.is_cancelled() {
                bail!("build of index '{}' was cancelled", idx.name());
            }
            let (tid, body) = split_envelope(&value)?;
            if tid != leaf.id() {
                continue;
            }
            let values = self.codec.decode(leaf, body)?;
            let hkey = key[prefix.len()..].to_vec();
            let row = index_row_values(txn, catalog, &self.codec, idx, &values, &hkey, None)?;
            txn.put(&index_entry_key(idx, &row), &[])?;
            built += 1;
        }
        debug!(index = idx.name(), built, "populated index");
        Ok(built)
    }
}
