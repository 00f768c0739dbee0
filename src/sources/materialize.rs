//! Idempotent writes of fetched sources and JSON records into the output tree.

use anyhow::{Context, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A source blob pulled out of an API response, waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub relative_path: PathBuf,
    pub content: String,
}

impl SourceFile {
    pub fn new(relative_path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }
}

/// Decodes a response body as UTF-8 JSON text without failing. Each invalid
/// byte becomes a JSON-escaped `\xNN`, so string values decode to that
/// literal text. Unpaired `\uD800`-`\uDFFF` escapes are kept as literal text
/// for the same reason.
pub fn decode_json_text(bytes: &[u8]) -> Cow<'_, str> {
    match escape_invalid_utf8(bytes, "\\\\x") {
        Cow::Borrowed(text) => escape_lone_surrogates(text),
        Cow::Owned(text) => Cow::Owned(escape_lone_surrogates(&text).into_owned()),
    }
}

/// Doubles the backslash of every `\uXXXX` escape that names half of a
/// surrogate pair without its partner, so the decoded string reads `\ud800`.
pub fn escape_lone_surrogates(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let mut escaped: Option<String> = None;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let unit = match bytes.get(i + 1) {
            Some(b'u') => utf16_unit(bytes, i + 2),
            _ => None,
        };
        let Some(unit) = unit else {
            // Any other escape is two bytes long.
            i += 2;
            continue;
        };

        let lone = match unit {
            0xD800..=0xDBFF => {
                let paired = bytes.get(i + 6) == Some(&b'\\')
                    && bytes.get(i + 7) == Some(&b'u')
                    && matches!(utf16_unit(bytes, i + 8), Some(0xDC00..=0xDFFF));
                if paired {
                    i += 12;
                    continue;
                }
                true
            }
            0xDC00..=0xDFFF => true,
            _ => false,
        };

        if lone {
            let out = escaped.get_or_insert_with(|| String::with_capacity(text.len() + 8));
            out.push_str(&text[copied..i]);
            out.push('\\');
            copied = i;
        }
        i += 6;
    }

    match escaped {
        Some(mut out) => {
            out.push_str(&text[copied..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(text),
    }
}

fn utf16_unit(bytes: &[u8], start: usize) -> Option<u16> {
    let digits = bytes.get(start..start + 4)?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u16::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
}

fn escape_invalid_utf8<'a>(bytes: &'a [u8], prefix: &str) -> Cow<'a, str> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(bytes.len() + 16);
    for chunk in bytes.utf8_chunks() {
        escaped.push_str(chunk.valid());
        for byte in chunk.invalid() {
            let _ = write!(escaped, "{prefix}{byte:02x}");
        }
    }
    Cow::Owned(escaped)
}

/// Writes `content` to `root/relative`, creating parent directories and
/// replacing whatever was there before.
pub async fn write_text(root: &Path, relative: &Path, content: &str) -> Result<PathBuf> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(&target, content.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

pub async fn write_source(root: &Path, file: &SourceFile) -> Result<PathBuf> {
    write_text(root, &file.relative_path, &file.content).await
}

/// Pretty JSON with sorted keys and a trailing newline.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    // `Value` objects are ordered maps, so the round trip sorts every key.
    let value = serde_json::to_value(value).context("failed to serialize JSON record")?;
    let mut rendered =
        serde_json::to_string_pretty(&value).context("failed to render JSON record")?;
    rendered.push('\n');
    Ok(rendered)
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = to_pretty_json(value)?;
    write_text(Path::new(""), path, &rendered).await?;
    Ok(())
}

/// Deletes `path`; a missing file counts as success.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("failed to create directory {}", path.display()))
}
