//! # Key Encoding
//!
//! Byte-comparable encoding for physical keys. See [`key`] for the scheme.

pub mod key;

pub use key::{
    decode_value, decode_values, encode_int, encode_null, encode_text, encode_value, encode_values,
    skip_value, type_prefix, KeyEncoder,
};
