//! Tagged parameter blocks.
//!
//! A parameter block is a sequence of records packed back to back. Each record
//! starts with an 8 byte header: a 4 byte NUL terminated name, a 2 byte type tag
//! and the reserved value size in 16-bit words. The value, if any, follows the
//! header directly.
use std::collections::HashMap;
use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::trace;

use crate::{Error, Result};

/// Type tag of a 4 byte little-endian signed integer.
pub const TYPE_I32: i16 = 0;
/// Type tag of an 8 byte little-endian double.
pub const TYPE_F64: i16 = 1;

const RECORD_HEADER_LEN: usize = 8;

/// A single decoded parameter value.
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Int(i32),
    Float(f64),
    /// String, enum and senum values.
    Text(String),
}

impl Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// The two shapes a block can take once read.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Parameter,
    Data,
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parameter => write!(f, "parameter"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// A decoded tagged-parameter block.
///
/// `key_order` holds the names in on-disk declaration order. Every name in
/// `key_order` has an entry in both `values` and `type_tags`.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBlock {
    pub values: HashMap<String, Option<ParameterValue>>,
    pub type_tags: HashMap<String, i16>,
    pub key_order: Vec<String>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub raw: Vec<u8>,
}

impl ParameterBlock {
    /// Decode all records in `raw`.
    ///
    /// Decoding stops once fewer bytes than a record header remain; such trailing
    /// padding is not an error.
    ///
    /// # Errors
    /// [Error::Format] if a value extends past the end of the block, is too narrow
    /// for its numeric type, or a name or string value is not valid UTF-8.
    pub fn decode(raw: Vec<u8>) -> Result<Self> {
        let mut block = ParameterBlock::default();
        let mut offset = 0;

        while offset + RECORD_HEADER_LEN <= raw.len() {
            let header = &raw[offset..offset + RECORD_HEADER_LEN];
            let name = std::str::from_utf8(&header[..3])
                .map_err(|_| {
                    Error::Format(format!("parameter name at offset {offset} is not valid UTF-8"))
                })?
                .to_string();
            let tag = i16::from_le_bytes([header[4], header[5]]);
            let reserved = i16::from_le_bytes([header[6], header[7]]);
            offset += RECORD_HEADER_LEN;

            let value = if reserved > 0 {
                let width = 2 * reserved as usize;
                let Some(bytes) = raw.get(offset..offset + width) else {
                    return Err(Error::Format(format!(
                        "parameter {name} needs {width} bytes at offset {offset}, block has {}",
                        raw.len()
                    )));
                };
                offset += width;
                Some(decode_value(&name, tag, bytes)?)
            } else {
                None
            };
            trace!(param = %name, tag, reserved, ?value, "decoded parameter");

            block.values.insert(name.clone(), value);
            block.type_tags.insert(name.clone(), tag);
            block.key_order.push(name);
        }

        block.raw = raw;
        Ok(block)
    }

    /// Number of distinct parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for `key`, `None` if the key is absent or was stored without a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.values.get(key).and_then(Option::as_ref)
    }

    /// Integer value for `key`.
    ///
    /// # Errors
    /// [Error::MissingParameter] if absent or not an integer. `block` only labels
    /// the error.
    pub fn get_i32(&self, block: &str, key: &str) -> Result<i32> {
        match self.get(key) {
            Some(ParameterValue::Int(v)) => Ok(*v),
            _ => Err(missing(block, key)),
        }
    }

    /// Float value for `key`. Integer values are widened.
    ///
    /// # Errors
    /// [Error::MissingParameter] if absent or a string.
    pub fn get_f64(&self, block: &str, key: &str) -> Result<f64> {
        match self.get(key) {
            Some(ParameterValue::Float(v)) => Ok(*v),
            Some(ParameterValue::Int(v)) => Ok(f64::from(*v)),
            _ => Err(missing(block, key)),
        }
    }

    /// String value for `key`.
    ///
    /// # Errors
    /// [Error::MissingParameter] if absent or not a string.
    pub fn get_str(&self, block: &str, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(ParameterValue::Text(v)) => Ok(v.as_str()),
            _ => Err(missing(block, key)),
        }
    }

    /// Parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ParameterValue>)> {
        self.key_order
            .iter()
            .map(|k| (k.as_str(), self.values.get(k).and_then(Option::as_ref)))
    }
}

fn missing(block: &str, key: &str) -> Error {
    Error::MissingParameter {
        block: block.to_string(),
        key: key.to_string(),
    }
}

fn decode_value(name: &str, tag: i16, bytes: &[u8]) -> Result<ParameterValue> {
    let narrow = |need: usize| {
        Error::Format(format!(
            "parameter {name} of type {tag} needs {need} bytes, has {}",
            bytes.len()
        ))
    };
    match tag {
        TYPE_I32 => {
            let b: [u8; 4] = bytes
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| narrow(4))?;
            Ok(ParameterValue::Int(i32::from_le_bytes(b)))
        }
        TYPE_F64 => {
            let b: [u8; 8] = bytes
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| narrow(8))?;
            Ok(ParameterValue::Float(f64::from_le_bytes(b)))
        }
        _ => {
            // last byte is the terminator, embedded NULs are padding
            let text: Vec<u8> = bytes[..bytes.len() - 1]
                .iter()
                .copied()
                .filter(|b| *b != 0)
                .collect();
            let text = String::from_utf8(text).map_err(|_| {
                Error::Format(format!("value of parameter {name} is not valid UTF-8"))
            })?;
            Ok(ParameterValue::Text(text))
        }
    }
}

/// An uninterpreted block, e.g., interferogram samples.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub raw: Vec<u8>,
}

/// A block as read from the file.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Parameter(ParameterBlock),
    Data(DataBlock),
}

impl Block {
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Parameter(_) => BlockKind::Parameter,
            Self::Data(_) => BlockKind::Data,
        }
    }
}
