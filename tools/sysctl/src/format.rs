// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Value rendering and parsing for the `sysctl` front end.

use clap::ValueEnum;

/// How node values are printed and how `=VALUE` is encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Guess from the bytes when printing; follow the node's current value when writing.
    #[default]
    Auto,
    /// UTF-8 text (trailing NUL dropped when printing).
    String,
    /// 32-bit little-endian integer.
    Int,
    /// 64-bit little-endian integer.
    Long,
    /// Raw bytes as hex.
    Hex,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("{value:?} is not a valid {kind}")]
    Parse { value: String, kind: &'static str },
    #[error("value of {len} bytes is not a {kind}")]
    Width { len: usize, kind: &'static str },
    #[error("bad path element {0:?}")]
    Path(String),
}

/// Renders `bytes` for display.
pub fn render(bytes: &[u8], format: Format) -> Result<String, FormatError> {
    match format {
        Format::Auto => Ok(render_auto(bytes)),
        Format::String => Ok(String::from_utf8_lossy(trim_nul(bytes)).into_owned()),
        Format::Int => <[u8; 4]>::try_from(bytes)
            .map(|b| i32::from_le_bytes(b).to_string())
            .map_err(|_| FormatError::Width { len: bytes.len(), kind: "int" }),
        Format::Long => <[u8; 8]>::try_from(bytes)
            .map(|b| i64::from_le_bytes(b).to_string())
            .map_err(|_| FormatError::Width { len: bytes.len(), kind: "long" }),
        Format::Hex => Ok(hex::encode(bytes)),
    }
}

fn render_auto(bytes: &[u8]) -> String {
    if let Some(text) = as_text(bytes) {
        return text.to_string();
    }
    match bytes.len() {
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string(),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            i64::from_le_bytes(raw).to_string()
        }
        _ => hex::encode(bytes),
    }
}

/// NUL-terminated printable UTF-8, without the terminator.
fn as_text(bytes: &[u8]) -> Option<&str> {
    let text = bytes.strip_suffix(&[0]).and_then(|b| core::str::from_utf8(b).ok())?;
    (!text.chars().any(char::is_control)).then_some(text)
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(&[0]).unwrap_or(bytes)
}

/// Encodes a command-line value for writing.
///
/// `Auto` shapes the value after `current`, the node's present byte image: text stays text,
/// 4- and 8-byte values take an int or long, anything else is read as hex. Without `current`
/// the value is written as text.
pub fn encode(value: &str, format: Format, current: Option<&[u8]>) -> Result<Vec<u8>, FormatError> {
    let parse_err = |kind| FormatError::Parse { value: value.to_string(), kind };
    match format {
        Format::Auto => match current {
            Some(current) if as_text(current).is_none() => match current.len() {
                4 => encode(value, Format::Int, None),
                8 => encode(value, Format::Long, None),
                _ => encode(value, Format::Hex, None),
            },
            _ => Ok(value.as_bytes().to_vec()),
        },
        Format::String => Ok(value.as_bytes().to_vec()),
        Format::Int => value.parse::<i32>().map(|v| v.to_le_bytes().to_vec()).map_err(|_| parse_err("int")),
        Format::Long => value.parse::<i64>().map(|v| v.to_le_bytes().to_vec()).map_err(|_| parse_err("long")),
        Format::Hex => hex::decode(value).map_err(|_| parse_err("hex string")),
    }
}

/// Parses a dotted numeric path such as `4.2.0.4`.
pub fn parse_oid(text: &str) -> Result<Vec<i32>, FormatError> {
    text.split('.')
        .map(|part| part.parse::<i32>().map_err(|_| FormatError::Path(part.to_string())))
        .collect()
}
