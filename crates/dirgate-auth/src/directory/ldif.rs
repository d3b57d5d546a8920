//! LDIF content records (RFC 2849)
//!
//! Only content records are accepted; change records other than `add`,
//! and `:<` URL values, are rejected. Base64 values that are not UTF-8
//! (photos, certificates) are skipped.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use tracing::debug;

use super::DirectoryEntry;

#[derive(Debug, Error)]
pub enum LdifError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn syntax(line: usize, message: impl Into<String>) -> LdifError {
    LdifError::Syntax {
        line,
        message: message.into(),
    }
}

/// A logical (unfolded) line and the physical line it started on
struct Logical {
    line: usize,
    text: String,
}

/// Unfold continuation lines, drop comments, and split into records
fn records(input: &str) -> Vec<Vec<Logical>> {
    let mut records = Vec::new();
    let mut current: Vec<Logical> = Vec::new();
    let mut in_comment = false;

    for (idx, raw) in input.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let line = idx + 1;

        if raw.trim().is_empty() {
            in_comment = false;
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(folded) = raw.strip_prefix(' ') {
            if in_comment {
                continue;
            }
            if let Some(last) = current.last_mut() {
                last.text.push_str(folded);
                continue;
            }
        }

        if raw.starts_with('#') {
            in_comment = true;
            continue;
        }

        in_comment = false;
        current.push(Logical {
            line,
            text: raw.to_string(),
        });
    }

    if !current.is_empty() {
        records.push(current);
    }
    records
}

/// Attribute name and value; `None` for a binary value
fn attribute_value(logical: &Logical) -> Result<(String, Option<String>), LdifError> {
    let (name, rest) = logical
        .text
        .split_once(':')
        .ok_or_else(|| syntax(logical.line, "expected `attribute: value`"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(syntax(logical.line, "missing attribute name"));
    }

    let value = if let Some(encoded) = rest.strip_prefix(':') {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| syntax(logical.line, format!("invalid base64 value: {}", e)))?;
        String::from_utf8(bytes).ok()
    } else if rest.starts_with('<') {
        return Err(syntax(logical.line, "URL values are not supported"));
    } else {
        Some(rest.trim_start_matches(' ').to_string())
    };

    Ok((name.to_string(), value))
}

/// Parse an LDIF document into directory entries
pub fn parse_ldif(input: &str) -> Result<Vec<DirectoryEntry>, LdifError> {
    let mut entries = Vec::new();

    for record in records(input) {
        let mut lines = record.iter().peekable();

        if let Some(first) = lines.peek() {
            if first.text.to_ascii_lowercase().starts_with("version:") {
                lines.next();
            }
        }

        let Some(first) = lines.next() else {
            continue;
        };
        let (name, dn) = attribute_value(first)?;
        if !name.eq_ignore_ascii_case("dn") {
            return Err(syntax(first.line, "record must start with `dn:`"));
        }
        let dn = dn.ok_or_else(|| syntax(first.line, "DN is not valid UTF-8"))?;
        if dn.trim().is_empty() {
            return Err(syntax(first.line, "empty DN"));
        }

        let mut entry = DirectoryEntry::new(dn.trim());
        for logical in lines {
            let (name, value) = attribute_value(logical)?;
            let Some(value) = value else {
                debug!("Skipping binary {} value on line {}", name, logical.line);
                continue;
            };
            if name.eq_ignore_ascii_case("changetype") {
                if value.trim().eq_ignore_ascii_case("add") {
                    continue;
                }
                return Err(syntax(
                    logical.line,
                    format!("unsupported changetype `{}`", value.trim()),
                ));
            }
            entry.add_value(&name, value);
        }
        entries.push(entry);
    }

    Ok(entries)
}
