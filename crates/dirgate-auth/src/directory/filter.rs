//! Search filters (RFC 4515 subset) for the in-memory directory
//!
//! Supported: `&`, `|`, `!`, equality, presence and substring assertions.
//! Matching is case-insensitive; DN-shaped values compare in normalized form.

use dirgate_core::dn::normalize_dn;
use thiserror::Error;

use super::DirectoryEntry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unexpected end of filter")]
    UnexpectedEnd,

    #[error("Unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("Unsupported filter operator at offset {0}")]
    UnsupportedOperator(usize),

    #[error("Invalid escape sequence at offset {0}")]
    InvalidEscape(usize),

    #[error("Trailing input at offset {0}")]
    TrailingInput(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl Filter {
    pub fn parse(input: &str) -> Result<Filter, FilterError> {
        let trimmed = input.trim();
        let owned;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            owned = format!("({})", trimmed);
            owned.as_str()
        };

        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(FilterError::TrailingInput(parser.pos));
        }
        Ok(filter)
    }

    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Filter::Not(filter) => !filter.matches(entry),
            // every entry has an object class, even those built without one
            Filter::Present(attr) if attr.eq_ignore_ascii_case("objectClass") => true,
            Filter::Present(attr) => !entry.values(attr).is_empty(),
            Filter::Equal(attr, value) => {
                let wanted = canonical(value);
                entry.values(attr).iter().any(|v| canonical(v) == wanted)
            }
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => entry
                .values(attr)
                .iter()
                .any(|v| substring_match(&v.to_lowercase(), initial, any, last)),
        }
    }
}

fn canonical(value: &str) -> String {
    if value.contains('=') {
        normalize_dn(value)
    } else {
        value.trim().to_lowercase()
    }
}

fn substring_match(
    value: &str,
    initial: &Option<String>,
    any: &[String],
    last: &Option<String>,
) -> bool {
    let mut rest = value;

    if let Some(initial) = initial {
        match rest.strip_prefix(initial.to_lowercase().as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    for part in any {
        let part = part.to_lowercase();
        match rest.find(&part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    match last {
        Some(last) => rest.ends_with(&last.to_lowercase()),
        None => true,
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), FilterError> {
        match self.peek() {
            Some(b) if b == c => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(FilterError::UnexpectedChar(b as char, self.pos)),
            None => Err(FilterError::UnexpectedEnd),
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(FilterError::UnexpectedEnd),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.filter()?);
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b';' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return match self.peek() {
                Some(b) => Err(FilterError::UnexpectedChar(b as char, self.pos)),
                None => Err(FilterError::UnexpectedEnd),
            };
        }
        let attr = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();

        match self.peek() {
            Some(b'=') => self.pos += 1,
            Some(b'>') | Some(b'<') | Some(b'~') | Some(b':') => {
                return Err(FilterError::UnsupportedOperator(self.pos))
            }
            Some(b) => return Err(FilterError::UnexpectedChar(b as char, self.pos)),
            None => return Err(FilterError::UnexpectedEnd),
        }

        // value parts split on unescaped '*'
        let mut parts = vec![Vec::new()];
        loop {
            match self.peek() {
                None => return Err(FilterError::UnexpectedEnd),
                Some(b')') => break,
                Some(b'(') => return Err(FilterError::UnexpectedChar('(', self.pos)),
                Some(b'*') => {
                    parts.push(Vec::new());
                    self.pos += 1;
                }
                Some(b'\\') => {
                    let at = self.pos;
                    let hex = self
                        .input
                        .get(self.pos + 1..self.pos + 3)
                        .ok_or(FilterError::InvalidEscape(at))?;
                    let hex = std::str::from_utf8(hex).map_err(|_| FilterError::InvalidEscape(at))?;
                    let byte =
                        u8::from_str_radix(hex, 16).map_err(|_| FilterError::InvalidEscape(at))?;
                    if let Some(last) = parts.last_mut() {
                        last.push(byte);
                    }
                    self.pos += 3;
                }
                Some(b) => {
                    if let Some(last) = parts.last_mut() {
                        last.push(b);
                    }
                    self.pos += 1;
                }
            }
        }

        let mut parts: Vec<String> = parts
            .into_iter()
            .map(|p| String::from_utf8_lossy(&p).into_owned())
            .collect();

        if parts.len() == 1 {
            return Ok(Filter::Equal(attr, parts.remove(0)));
        }
        if parts.len() == 2 && parts.iter().all(String::is_empty) {
            return Ok(Filter::Present(attr));
        }

        let last = parts.pop().filter(|p| !p.is_empty());
        let initial = Some(parts.remove(0)).filter(|p| !p.is_empty());
        let any = parts.into_iter().filter(|p| !p.is_empty()).collect();

        Ok(Filter::Substring {
            attr,
            initial,
            any,
            last,
        })
    }
}
