//! # Big-Endian Key Encoding for Ordered Storage
//!
//! This module provides byte-comparable key encoding for arbordb's physical
//! keys: hkeys in the group relation and index entries. All encoded keys can
//! be compared with a single `memcmp`, so the ordered store never needs
//! type-specific comparison logic.
//!
//! ## Design Goals
//!
//! 1. **Byte-comparable**: encoded keys preserve sort order under
//!    lexicographic comparison
//! 2. **Type-aware ordering**: NULL < booleans < numbers < strings < blobs
//! 3. **Multi-column support**: composite keys are simple concatenations
//! 4. **Self-delimiting**: every encoded value can be skipped or decoded
//!    without out-of-band length information, so a stored hkey can be split
//!    back into segments during orphan propagation
//!
//! ## Type Prefix Scheme
//!
//! Each encoded value starts with a prefix byte that fixes the order between
//! types:
//!
//! ```text
//! 0x01       NULL
//! 0x02-0x03  Booleans (FALSE < TRUE)
//! 0x12-0x16  Numbers (negatives < ZERO < positives, floats beside ints)
//! 0x20-0x21  Strings (TEXT < BLOB)
//! 0xFF       MAX_KEY (sentinel for range scans)
//! ```
//!
//! NULL sorting first is what makes orphan hkey segments (null markers for a
//! missing ancestor) cluster ahead of resolved siblings.
//!
//! ## Number Encoding Strategy
//!
//! Integers use a sign-split encoding:
//!
//! - Negative: NEG_INT prefix + complemented length byte + complemented
//!   big-endian magnitude (longer magnitude sorts first, i.e. more negative)
//! - Zero: ZERO prefix only
//! - Positive: POS_INT prefix + length byte + minimal big-endian magnitude
//!
//! This ensures -256 < -1 < 0 < 1 < 256 and keeps small keys small.
//!
//! Floats use IEEE 754 bit manipulation: negative floats store the inverted
//! bits under NEG_FLOAT, non-negative floats store the raw bits under
//! POS_FLOAT.
//!
//! ## Text Encoding Strategy
//!
//! Text and blob values use escape encoding so embedded bytes cannot collide
//! with the terminator:
//!
//! ```text
//! 0x00 -> 0x00 0xFF
//! 0xFF -> 0xFF 0x00
//! Terminator: 0x00 0x00
//! ```

use crate::types::Value;
use eyre::{bail, Result};

pub mod type_prefix {
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;

    pub const NEG_INT: u8 = 0x12;
    pub const NEG_FLOAT: u8 = 0x13;
    pub const ZERO: u8 = 0x14;
    pub const POS_FLOAT: u8 = 0x15;
    pub const POS_INT: u8 = 0x16;

    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;

    pub const MAX_KEY: u8 = 0xFF;
}

const TERMINATOR: [u8; 2] = [0x00, 0x00];

pub fn encode_null(buf: &mut Vec<u8>) {
    buf.push(type_prefix::NULL);
}

pub fn encode_bool(v: bool, buf: &mut Vec<u8>) {
    buf.push(if v { type_prefix::TRUE } else { type_prefix::FALSE });
}

pub fn encode_int(v: i64, buf: &mut Vec<u8>) {
    if v == 0 {
        buf.push(type_prefix::ZERO);
        return;
    }
    if v > 0 {
        let be = (v as u64).to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        buf.push(type_prefix::POS_INT);
        buf.push((8 - skip) as u8);
        buf.extend_from_slice(&be[skip..]);
    } else {
        // i128 magnitude avoids overflow on i64::MIN.
        let mag = (-(v as i128)) as u64;
        let be = mag.to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        buf.push(type_prefix::NEG_INT);
        buf.push(0xFF - (8 - skip) as u8);
        for b in &be[skip..] {
            buf.push(!b);
        }
    }
}

pub fn encode_float(v: f64, buf: &mut Vec<u8>) {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        buf.push(type_prefix::NEG_FLOAT);
        buf.extend_from_slice(&(!bits).to_be_bytes());
    } else {
        buf.push(type_prefix::POS_FLOAT);
        buf.extend_from_slice(&bits.to_be_bytes());
    }
}

fn encode_escaped(bytes: &[u8], buf: &mut Vec<u8>) {
    for b in bytes {
        match *b {
            0x00 => buf.extend_from_slice(&[0x00, 0xFF]),
            0xFF => buf.extend_from_slice(&[0xFF, 0x00]),
            other => buf.push(other),
        }
    }
    buf.extend_from_slice(&TERMINATOR);
}

pub fn encode_text(s: &str, buf: &mut Vec<u8>) {
    buf.push(type_prefix::TEXT);
    encode_escaped(s.as_bytes(), buf);
}

pub fn encode_blob(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.push(type_prefix::BLOB);
    encode_escaped(bytes, buf);
}

pub fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => encode_null(buf),
        Value::Bool(v) => encode_bool(*v, buf),
        Value::Int(v) => encode_int(*v, buf),
        Value::Float(v) => encode_float(*v, buf),
        Value::Text(s) => encode_text(s, buf),
        Value::Blob(b) => encode_blob(b, buf),
    }
}

pub fn encode_values(values: &[Value], buf: &mut Vec<u8>) {
    for v in values {
        encode_value(v, buf);
    }
}

/// Reusable encoder for composite keys.
#[derive(Debug, Default)]
pub struct KeyEncoder {
    buf: Vec<u8>,
}

impl KeyEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &[u8]) -> Self {
        Self {
            buf: prefix.to_vec(),
        }
    }

    pub fn encode_value(&mut self, value: &Value) -> &mut Self {
        encode_value(value, &mut self.buf);
        self
    }

    pub fn encode_values(&mut self, values: &[Value]) -> &mut Self {
        encode_values(values, &mut self.buf);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

fn decode_escaped(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        let Some(&b) = buf.get(i) else {
            bail!("truncated key: unterminated string value");
        };
        match b {
            0x00 => match buf.get(i + 1) {
                Some(0x00) => return Ok((out, i + 2)),
                Some(0xFF) => {
                    out.push(0x00);
                    i += 2;
                }
                _ => bail!("corrupt key: invalid escape after 0x00"),
            },
            0xFF => match buf.get(i + 1) {
                Some(0x00) => {
                    out.push(0xFF);
                    i += 2;
                }
                _ => bail!("corrupt key: invalid escape after 0xFF"),
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
}

/// Decodes one value from the front of `buf`, returning it and the number of
/// bytes consumed.
pub fn decode_value(buf: &[u8]) -> Result<(Value, usize)> {
    let Some(&prefix) = buf.first() else {
        bail!("truncated key: empty buffer");
    };
    match prefix {
        type_prefix::NULL => Ok((Value::Null, 1)),
        type_prefix::FALSE => Ok((Value::Bool(false), 1)),
        type_prefix::TRUE => Ok((Value::Bool(true), 1)),
        type_prefix::ZERO => Ok((Value::Int(0), 1)),
        type_prefix::POS_INT => {
            let len = *buf.get(1).ok_or_else(|| eyre::eyre!("truncated int key"))? as usize;
            if len == 0 || len > 8 || buf.len() < 2 + len {
                bail!("corrupt key: bad positive int length {}", len);
            }
            let mut be = [0u8; 8];
            be[8 - len..].copy_from_slice(&buf[2..2 + len]);
            Ok((Value::Int(u64::from_be_bytes(be) as i64), 2 + len))
        }
        type_prefix::NEG_INT => {
            let len = 0xFF - *buf.get(1).ok_or_else(|| eyre::eyre!("truncated int key"))?;
            let len = len as usize;
            if len == 0 || len > 8 || buf.len() < 2 + len {
                bail!("corrupt key: bad negative int length {}", len);
            }
            let mut be = [0u8; 8];
            for (i, b) in buf[2..2 + len].iter().enumerate() {
                be[8 - len + i] = !b;
            }
            let mag = u64::from_be_bytes(be) as i128;
            Ok((Value::Int((-mag) as i64), 2 + len))
        }
        type_prefix::POS_FLOAT => {
            if buf.len() < 9 {
                bail!("truncated float key");
            }
            let bits = u64::from_be_bytes(buf[1..9].try_into().unwrap());
            Ok((Value::Float(f64::from_bits(bits)), 9))
        }
        type_prefix::NEG_FLOAT => {
            if buf.len() < 9 {
                bail!("truncated float key");
            }
            let bits = !u64::from_be_bytes(buf[1..9].try_into().unwrap());
            Ok((Value::Float(f64::from_bits(bits)), 9))
        }
        type_prefix::TEXT => {
            let (bytes, used) = decode_escaped(&buf[1..])?;
            let s = String::from_utf8(bytes)
                .map_err(|_| eyre::eyre!("corrupt key: non-utf8 text value"))?;
            Ok((Value::Text(s), 1 + used))
        }
        type_prefix::BLOB => {
            let (bytes, used) = decode_escaped(&buf[1..])?;
            Ok((Value::Blob(bytes), 1 + used))
        }
        other => bail!("corrupt key: unknown type prefix 0x{:02x}", other),
    }
}

/// Length in bytes of the value at the front of `buf`.
pub fn skip_value(buf: &[u8]) -> Result<usize> {
    decode_value(buf).map(|(_, used)| used)
}

/// Decodes all values in `buf`.
pub fn decode_values(mut buf: &[u8]) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (v, used) = decode_value(buf)?;
        out.push(v);
        buf = &buf[used..];
    }
    Ok(out)
}
