//! # Rows and the Row Codec
//!
//! A [`Row`] is a table id plus declared column values in position order.
//! Hidden columns (the surrogate key) are never part of a caller-supplied
//! row; the engine appends them before storage and they come back from
//! decoded rows.
//!
//! How row bytes look on disk is a pluggable seam ([`RowCodec`]) so a
//! columnar or schema-versioned format can replace [`BasicCodec`] without
//! touching the write path. The engine prepends a fixed 4-byte table id
//! envelope to every stored value, so a scan over a group relation can
//! attribute each entry to its table without decoding the row body.

use crate::encoding::{decode_values, encode_values};
use crate::schema::table::TableDef;
use crate::schema::TableId;
use crate::types::Value;
use eyre::{ensure, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    table: TableId,
    values: Vec<Value>,
}

impl Row {
    pub fn new(table: TableId, values: Vec<Value>) -> Self {
        Self { table, values }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at a column position; positions beyond the supplied values
    /// (hidden columns on input rows) read as NULL.
    pub fn value(&self, position: usize) -> &Value {
        self.values.get(position).unwrap_or(&Value::Null)
    }
}

/// Encoding of a full row's values to and from stored bytes.
pub trait RowCodec {
    fn encode(&self, table: &TableDef, values: &[Value]) -> Result<Vec<u8>>;
    fn decode(&self, table: &TableDef, bytes: &[u8]) -> Result<Vec<Value>>;
}

/// Value-concatenation codec reusing the self-delimiting key encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCodec;

impl RowCodec for BasicCodec {
    fn encode(&self, table: &TableDef, values: &[Value]) -> Result<Vec<u8>> {
        ensure!(
            values.len() == table.columns().len(),
            "row for table '{}' has {} values, expected {}",
            table.name(),
            values.len(),
            table.columns().len()
        );
        let mut buf = Vec::new();
        encode_values(values, &mut buf);
        Ok(buf)
    }

    fn decode(&self, table: &TableDef, bytes: &[u8]) -> Result<Vec<Value>> {
        let values = decode_values(bytes)?;
        ensure!(
            values.len() == table.columns().len(),
            "stored row for table '{}' has {} values, expected {}",
            table.name(),
            values.len(),
            table.columns().len()
        );
        Ok(values)
    }
}

/// Prefixes row bytes with the owning table id.
pub(crate) fn wrap_envelope(table: TableId, row_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + row_bytes.len());
    out.extend_from_slice(&table.to_be_bytes());
    out.extend_from_slice(row_bytes);
    out
}

pub(crate) fn split_envelope(bytes: &[u8]) -> Result<(TableId, &[u8])> {
    ensure!(bytes.len() >= 4, "stored value shorter than its envelope");
    let id = TableId::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Ok((id, &bytes[4..]))
}
