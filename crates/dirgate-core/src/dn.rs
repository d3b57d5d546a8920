//! Distinguished name helpers
//!
//! Only the syntax needed to build, compare and validate DNs is handled here;
//! attribute values stay in their escaped string form throughout.

use crate::error::{Error, Result};

/// Placeholder substituted with the (escaped) username
pub const USERNAME_PLACEHOLDER: &str = "{0}";

/// Split `s` on `sep` wherever the separator is not backslash-escaped
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Split a DN into its RDN components
pub fn split_rdns(dn: &str) -> Vec<&str> {
    split_unescaped(dn, ',')
}

fn is_valid_attribute_type(attr: &str) -> bool {
    let mut chars = attr.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Syntactic DN check: every RDN is one or more `type=value` pairs joined by `+`
pub fn is_valid_dn(dn: &str) -> bool {
    if dn.trim().is_empty() || dn.ends_with('\\') {
        return false;
    }

    split_rdns(dn).into_iter().all(|rdn| {
        split_unescaped(rdn, '+').into_iter().all(|ava| match ava.split_once('=') {
            Some((attr, value)) => {
                is_valid_attribute_type(attr.trim()) && !value.trim().is_empty()
            }
            None => false,
        })
    })
}

/// Canonical form used for DN comparisons: lowercased, no whitespace around separators
pub fn normalize_dn(dn: &str) -> String {
    split_rdns(dn)
        .into_iter()
        .map(|rdn| {
            split_unescaped(rdn, '+')
                .into_iter()
                .map(|ava| match ava.split_once('=') {
                    Some((attr, value)) => format!("{}={}", attr.trim(), value.trim()),
                    None => ava.trim().to_string(),
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

/// Whether `dn` lies at or below `base`
pub fn is_descendant_of(dn: &str, base: &str) -> bool {
    let dn = normalize_dn(dn);
    let base = normalize_dn(base);
    if base.is_empty() {
        return true;
    }
    dn == base || dn.ends_with(&format!(",{}", base))
}

/// The DN of the immediate parent entry, if any
pub fn parent_dn(dn: &str) -> Option<String> {
    let rdns = split_rdns(dn);
    if rdns.len() < 2 {
        return None;
    }
    Some(rdns[1..].join(","))
}

/// Qualify `dn` with `base`, leaving DNs that already end in `base` untouched
pub fn join_dn(dn: &str, base: Option<&str>) -> String {
    match base.map(str::trim).filter(|b| !b.is_empty()) {
        None => dn.to_string(),
        Some(base) if dn.trim().is_empty() => base.to_string(),
        Some(base) if is_descendant_of(dn, base) => dn.to_string(),
        Some(base) => format!("{},{}", dn, base),
    }
}

/// A user DN template such as `uid={0},ou=people`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnPattern {
    template: String,
    prefix: String,
    suffix: String,
}

impl DnPattern {
    /// Parse and validate a template.
    ///
    /// The template must contain exactly one `{0}`, in the value position of an
    /// RDN, and must yield a syntactically valid DN once substituted.
    pub fn parse(template: &str) -> Result<Self> {
        let template = template.trim();
        let malformed = |reason: &str| {
            Error::MalformedDnPattern(format!("`{}`: {}", template, reason))
        };

        if template.is_empty() {
            return Err(malformed("pattern is empty"));
        }

        if template.matches(USERNAME_PLACEHOLDER).count() != 1 {
            return Err(malformed("expected exactly one {0} placeholder"));
        }

        let (prefix, suffix) = template
            .split_once(USERNAME_PLACEHOLDER)
            .ok_or_else(|| malformed("expected exactly one {0} placeholder"))?;

        if prefix.contains(['{', '}']) || suffix.contains(['{', '}']) {
            return Err(malformed("only the {0} placeholder is supported"));
        }

        let holder = split_rdns(prefix).pop().unwrap_or_default();
        let holder = split_unescaped(holder, '+').pop().unwrap_or_default();
        if !holder.contains('=') {
            return Err(malformed("{0} must be an attribute value"));
        }

        let pattern = Self {
            template: template.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        };

        if !is_valid_dn(&pattern.substitute("user")) {
            return Err(malformed("does not form a valid DN"));
        }

        Ok(pattern)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitute an already DN-escaped value for the placeholder
    pub fn substitute(&self, escaped_value: &str) -> String {
        format!("{}{}{}", self.prefix, escaped_value, self.suffix)
    }
}

impl std::fmt::Display for DnPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.template)
    }
}
