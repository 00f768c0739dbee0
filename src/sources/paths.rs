//! Maps untrusted, API-supplied file paths onto relative paths that can never
//! leave the contract directory.
//!
//! Paths that try to escape (absolute paths, `..` segments) are not rejected:
//! they lose their directory structure and collapse to the leaf file name so
//! the content still lands somewhere inside the contract directory.

use crate::sources::address::ContractAddress;
use std::path::{Path, PathBuf};

/// Subdirectory used for files that would otherwise shadow a manifest.
pub const SOURCES_DIR: &str = "sources";

const UNNAMED: &str = "unnamed";

#[derive(Debug, Clone, Copy)]
pub enum PathAnchor<'a> {
    /// Keep everything after the segment equal to this address.
    Address(&'a str),
    /// Keep the whole path when it is already relative and free of `..`.
    Root,
}

pub fn resolve(raw_path: &str, anchor: PathAnchor<'_>) -> PathBuf {
    let segments = match anchor {
        PathAnchor::Address(address) => address_anchored(raw_path, address),
        PathAnchor::Root => root_anchored(raw_path),
    };

    match segments {
        Some(segments) if !segments.is_empty() && segments.iter().all(|s| is_plain(s)) => {
            segments.into_iter().collect()
        }
        _ => PathBuf::from(leaf_name(raw_path)),
    }
}

/// Moves a path whose leaf collides with one of `reserved` under [`SOURCES_DIR`].
pub fn relocate_reserved(path: PathBuf, reserved: &[&str]) -> PathBuf {
    let collides = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| reserved.contains(&name))
        .unwrap_or(false);

    if !collides {
        return path;
    }

    match path.file_name() {
        Some(name) => Path::new(SOURCES_DIR).join(name),
        None => path,
    }
}

/// `{root}/{chain_id}/{lowercase address}`.
pub fn contract_dir(root: &Path, chain_id: u64, address: &ContractAddress) -> PathBuf {
    root.join(chain_id.to_string()).join(address.lowercase())
}

fn address_anchored<'a>(raw_path: &'a str, address: &str) -> Option<Vec<&'a str>> {
    let parts: Vec<&str> = raw_path.split('/').filter(|part| !part.is_empty()).collect();
    let position = parts
        .iter()
        .position(|part| part.eq_ignore_ascii_case(address))?;

    let tail: Vec<&str> = parts[position + 1..]
        .iter()
        .copied()
        .filter(|part| *part != ".")
        .collect();
    Some(tail)
}

fn root_anchored(raw_path: &str) -> Option<Vec<&str>> {
    if raw_path.starts_with('/') || raw_path.split('/').any(|part| part == "..") {
        return None;
    }

    Some(
        raw_path
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect(),
    )
}

fn leaf_name(raw_path: &str) -> &str {
    match raw_path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .last()
    {
        Some(name) if name != ".." => name,
        _ => UNNAMED,
    }
}

fn is_plain(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}
