//! Contract address parsing plus the labeled address list that seeds a
//! Sourcify run. Loading is fail-fast: one malformed entry rejects the file.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const ADDRESS_PREFIX: &str = "0x";
const ADDRESS_BYTES: usize = 20;
const RESERVED_MAX: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    NotArray,
    NotObject { index: usize },
    InvalidAddress { index: Option<usize>, value: String },
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::NotArray => write!(f, "expected a JSON array of address entries"),
            AddressError::NotObject { index } => write!(f, "expected object at index {index}"),
            AddressError::InvalidAddress {
                index: Some(index),
                value,
            } => write!(f, "invalid address at index {index}: {value}"),
            AddressError::InvalidAddress { index: None, value } => {
                write!(f, "invalid address: {value}")
            }
        }
    }
}

impl std::error::Error for AddressError {}

/// A 20-byte contract address as supplied by the caller.
///
/// The original spelling is kept for request URLs, while directory names and
/// manifests always use the lowercase form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractAddress {
    raw: String,
    lowercase: String,
    bytes: [u8; ADDRESS_BYTES],
}

impl ContractAddress {
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let invalid = || AddressError::InvalidAddress {
            index: None,
            value: value.to_owned(),
        };

        let digits = value.strip_prefix(ADDRESS_PREFIX).ok_or_else(invalid)?;
        if digits.len() != ADDRESS_BYTES * 2 {
            return Err(invalid());
        }

        let mut bytes = [0u8; ADDRESS_BYTES];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| invalid())?;

        Ok(Self {
            raw: value.to_owned(),
            lowercase: value.to_ascii_lowercase(),
            bytes,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn lowercase(&self) -> &str {
        &self.lowercase
    }

    /// Precompile-style addresses `0x…01` through `0x…09` never hold
    /// verified contract sources.
    pub fn is_reserved(&self) -> bool {
        let (high, low) = self.bytes.split_at(ADDRESS_BYTES - 1);
        high.iter().all(|byte| *byte == 0) && (1..=RESERVED_MAX).contains(&low[0])
    }
}

impl FromStr for ContractAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One entry of the fetch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLabel {
    pub address: ContractAddress,
    pub label: Option<String>,
}

impl AddressLabel {
    pub fn new(address: ContractAddress, label: Option<String>) -> Self {
        Self { address, label }
    }
}

/// Reads and validates a JSON array of `{address, label}` objects.
pub fn load_address_labels(path: &Path) -> Result<Vec<AddressLabel>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read address list {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("address list {} is not valid JSON", path.display()))?;
    parse_address_labels(&value)
        .with_context(|| format!("invalid address list {}", path.display()))
}

pub fn parse_address_labels(value: &Value) -> Result<Vec<AddressLabel>, AddressError> {
    let items = value.as_array().ok_or(AddressError::NotArray)?;

    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let object = item
            .as_object()
            .ok_or(AddressError::NotObject { index })?;

        let address = match object.get("address") {
            Some(Value::String(raw)) => {
                ContractAddress::parse(raw).map_err(|_| AddressError::InvalidAddress {
                    index: Some(index),
                    value: raw.clone(),
                })?
            }
            other => {
                return Err(AddressError::InvalidAddress {
                    index: Some(index),
                    value: other.map(Value::to_string).unwrap_or_default(),
                })
            }
        };

        let label = match object.get("label") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(label)) => label.clone(),
            Some(other) => other.to_string(),
        };

        entries.push(AddressLabel::new(address, Some(label)));
    }

    Ok(entries)
}
