//! Everything between a parsed API response and the files on disk: address
//! validation, path sanitizing, materialization, and the JSON records.

pub mod address;
pub mod manifest;
pub mod materialize;
pub mod paths;

pub use address::{load_address_labels, AddressError, AddressLabel, ContractAddress};
pub use manifest::{CountingRule, FetchResult, RunIndex, ServiceStatus};
pub use materialize::SourceFile;
pub use paths::{contract_dir, relocate_reserved, resolve, PathAnchor};
