//! LDAP search filters (RFC 4515) evaluated on the client.
//!
//! Change notifications cannot be narrowed on the server side, so the
//! engine parses the caller's filter string once and evaluates it against
//! every raw change record it receives.
//!
//! Matching rules:
//! - attribute names compare case-insensitively
//! - values compare case-insensitively
//! - `>=` / `<=` compare numerically when both sides are integers
//! - `~=` is treated as case-insensitive equality
//! - extensible matches support the Active Directory bitwise AND and OR
//!   rules; any other rule never matches

use std::fmt;
use std::str::FromStr;

use crate::error::{OrgSyncError, OrgSyncResult};
use crate::model::DirectoryEntry;

/// Matching rule OID for a bitwise AND test on an integer attribute.
pub const MATCHING_RULE_BIT_AND: &str = "1.2.840.113556.1.4.803";

/// Matching rule OID for a bitwise OR test on an integer attribute.
pub const MATCHING_RULE_BIT_OR: &str = "1.2.840.113556.1.4.804";

/// Deepest nesting of parenthesized filters, counting the innermost item.
pub const MAX_FILTER_DEPTH: usize = 64;

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters match.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
    /// `(attr=value)`
    Equality {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: String,
    },
    /// `(attr=*)`
    Present {
        /// Attribute name.
        attr: String,
    },
    /// `(attr=initial*any*final)`
    Substring {
        /// Attribute name.
        attr: String,
        /// Required prefix.
        initial: Option<String>,
        /// Required inner fragments, in order.
        any: Vec<String>,
        /// Required suffix.
        final_: Option<String>,
    },
    /// `(attr>=value)`
    GreaterOrEqual {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: String,
    },
    /// `(attr<=value)`
    LessOrEqual {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: String,
    },
    /// `(attr~=value)`
    Approx {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: String,
    },
    /// `(attr:dn:rule:=value)`
    Extensible {
        /// Attribute name, if given.
        attr: Option<String>,
        /// Matching rule OID, if given.
        rule: Option<String>,
        /// Whether DN components are also tested.
        dn_attributes: bool,
        /// Asserted value.
        value: String,
    },
}

impl Filter {
    /// Parses a filter string.
    ///
    /// A bare item without surrounding parentheses (`cn=foo`) is accepted.
    ///
    /// ## Errors
    ///
    /// Returns `OrgSyncError::InvalidFilter` on any syntax error.
    pub fn parse(input: &str) -> OrgSyncResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(OrgSyncError::invalid_filter(input, "empty filter"));
        }
        let wrapped;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            &wrapped
        };

        let mut parser = Parser {
            chars: text.chars().collect(),
            pos: 0,
            depth: 0,
        };
        let filter = parser
            .parse_filter()
            .map_err(|reason| OrgSyncError::invalid_filter(input, reason))?;
        if parser.pos != parser.chars.len() {
            return Err(OrgSyncError::invalid_filter(
                input,
                format!("unexpected trailing input at offset {}", parser.pos),
            ));
        }
        Ok(filter)
    }

    /// Evaluates the filter against an entry.
    #[must_use]
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
            Self::Equality { attr, value } | Self::Approx { attr, value } => {
                values_of(entry, attr).iter().any(|v| v.eq_ignore_ascii_case(value))
            }
            // Every entry has an object class, even when the attribute was not requested.
            Self::Present { attr } => attr.eq_ignore_ascii_case("objectClass") || !values_of(entry, attr).is_empty(),
            Self::Substring {
                attr,
                initial,
                any,
                final_,
            } => values_of(entry, attr)
                .iter()
                .any(|v| substring_matches(v, initial.as_deref(), any, final_.as_deref())),
            Self::GreaterOrEqual { attr, value } => values_of(entry, attr)
                .iter()
                .any(|v| compare(v, value) != std::cmp::Ordering::Less),
            Self::LessOrEqual { attr, value } => values_of(entry, attr)
                .iter()
                .any(|v| compare(v, value) != std::cmp::Ordering::Greater),
            Self::Extensible {
                attr,
                rule,
                dn_attributes,
                value,
            } => extensible_matches(entry, attr.as_deref(), rule.as_deref(), *dn_attributes, value),
        }
    }
}

impl FromStr for Filter {
    type Err = OrgSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Equality { attr, value } => write!(f, "({attr}={})", escape_value(value)),
            Self::Present { attr } => write!(f, "({attr}=*)"),
            Self::Substring {
                attr,
                initial,
                any,
                final_,
            } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape_value(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape_value(part))?;
                }
                if let Some(final_) = final_ {
                    f.write_str(&escape_value(final_))?;
                }
                f.write_str(")")
            }
            Self::GreaterOrEqual { attr, value } => write!(f, "({attr}>={})", escape_value(value)),
            Self::LessOrEqual { attr, value } => write!(f, "({attr}<={})", escape_value(value)),
            Self::Approx { attr, value } => write!(f, "({attr}~={})", escape_value(value)),
            Self::Extensible {
                attr,
                rule,
                dn_attributes,
                value,
            } => {
                f.write_str("(")?;
                if let Some(attr) = attr {
                    f.write_str(attr)?;
                }
                if *dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = rule {
                    write!(f, ":{rule}")?;
                }
                write!(f, ":={})", escape_value(value))
            }
        }
    }
}

/// Escapes special characters in LDAP filter values.
#[must_use]
pub fn escape_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\5c"),
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\0' => result.push_str("\\00"),
            _ => result.push(c),
        }
    }
    result
}

// ============================================================================
// Evaluation helpers
// ============================================================================

/// Values of an attribute, treating `dn` as a virtual attribute.
fn values_of<'a>(entry: &'a DirectoryEntry, attr: &str) -> Vec<&'a str> {
    match entry.get_attrs(attr) {
        Some(values) => values.iter().map(String::as_str).collect(),
        None if attr.eq_ignore_ascii_case("dn") => vec![entry.dn.as_str()],
        None => Vec::new(),
    }
}

fn substring_matches(value: &str, initial: Option<&str>, any: &[String], final_: Option<&str>) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();

    if let Some(initial) = initial {
        let initial = initial.to_lowercase();
        match rest.strip_prefix(initial.as_str()) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match final_ {
        Some(final_) => rest.ends_with(final_.to_lowercase().as_str()),
        None => true,
    }
}

fn compare(actual: &str, asserted: &str) -> std::cmp::Ordering {
    match (actual.trim().parse::<i64>(), asserted.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => actual.to_lowercase().cmp(&asserted.to_lowercase()),
    }
}

fn extensible_matches(
    entry: &DirectoryEntry,
    attr: Option<&str>,
    rule: Option<&str>,
    dn_attributes: bool,
    value: &str,
) -> bool {
    let Some(attr) = attr else {
        return false;
    };

    let mut candidates: Vec<String> = values_of(entry, attr).into_iter().map(String::from).collect();
    if dn_attributes {
        if let Ok(dn) = crate::dn::DistinguishedName::parse(&entry.dn) {
            candidates.extend(dn.rdns().iter().filter_map(|rdn| rdn.get(attr)));
        }
    }

    match rule {
        None => candidates.iter().any(|v| v.eq_ignore_ascii_case(value)),
        Some(MATCHING_RULE_BIT_AND) => bitwise(&candidates, value, |v, mask| v & mask == mask),
        Some(MATCHING_RULE_BIT_OR) => bitwise(&candidates, value, |v, mask| v & mask != 0),
        Some(_) => false,
    }
}

fn bitwise(candidates: &[String], mask: &str, test: impl Fn(u64, u64) -> bool) -> bool {
    let Some(mask) = parse_bits(mask) else {
        return false;
    };
    candidates
        .iter()
        .filter_map(|v| parse_bits(v))
        .any(|v| test(v, mask))
}

/// Parses an integer attribute; negative values keep their two's complement bits.
fn parse_bits(value: &str) -> Option<u64> {
    let value = value.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<i64>().ok().map(|v| v as u64))
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        match self.peek() {
            Some(found) if found == c => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(format!("expected '{c}' at offset {}, found '{found}'", self.pos)),
            None => Err(format!("expected '{c}' at end of input")),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, String> {
        if self.depth >= MAX_FILTER_DEPTH {
            return Err(format!("filter nested deeper than {MAX_FILTER_DEPTH} levels"));
        }
        self.depth += 1;
        let filter = self.parse_nested();
        self.depth -= 1;
        filter
    }

    fn parse_nested(&mut self) -> Result<Filter, String> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err("unterminated filter".to_string()),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, String> {
        let mut filters = Vec::new();
        while self.peek() == Some('(') {
            filters.push(self.parse_filter()?);
        }
        if filters.is_empty() {
            return Err(format!("empty filter list at offset {}", self.pos));
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> Result<Filter, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '>' | '<' | ')' | '(') {
                break;
            }
            self.pos += 1;
        }
        let lhs: String = self.chars[start..self.pos].iter().collect();

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                "="
            }
            Some(c @ ('~' | '>' | '<')) => {
                self.pos += 1;
                self.expect('=')?;
                match c {
                    '~' => "~=",
                    '>' => ">=",
                    _ => "<=",
                }
            }
            _ => return Err(format!("missing operator after '{lhs}'")),
        };

        let raw_start = self.pos;
        while let Some(c) = self.peek() {
            if c == ')' || c == '(' {
                break;
            }
            self.pos += 1;
        }
        let raw: String = self.chars[raw_start..self.pos].iter().collect();

        if op == "=" && lhs.ends_with(':') {
            return parse_extensible(&lhs[..lhs.len() - 1], &raw);
        }

        let attr = lhs.trim().to_string();
        if attr.is_empty() || attr.contains(':') {
            return Err(format!("invalid attribute description '{lhs}'"));
        }

        match op {
            "=" if raw == "*" => Ok(Filter::Present { attr }),
            "=" if has_unescaped_star(&raw) => parse_substring(attr, &raw),
            "=" => Ok(Filter::Equality {
                attr,
                value: unescape_value(&raw)?,
            }),
            "~=" => Ok(Filter::Approx {
                attr,
                value: unescape_value(&raw)?,
            }),
            ">=" => Ok(Filter::GreaterOrEqual {
                attr,
                value: unescape_value(&raw)?,
            }),
            _ => Ok(Filter::LessOrEqual {
                attr,
                value: unescape_value(&raw)?,
            }),
        }
    }
}

fn parse_extensible(lhs: &str, raw: &str) -> Result<Filter, String> {
    let mut parts = lhs.split(':');
    let attr = parts.next().map(str::trim).filter(|a| !a.is_empty()).map(String::from);

    let mut dn_attributes = false;
    let mut rule = None;
    for part in parts {
        if part.eq_ignore_ascii_case("dn") {
            dn_attributes = true;
        } else if !part.is_empty() && rule.is_none() {
            rule = Some(part.to_string());
        } else {
            return Err(format!("invalid extensible match '{lhs}:='"));
        }
    }
    if attr.is_none() && rule.is_none() {
        return Err("extensible match needs an attribute or a matching rule".to_string());
    }

    Ok(Filter::Extensible {
        attr,
        rule,
        dn_attributes,
        value: unescape_value(raw)?,
    })
}

fn parse_substring(attr: String, raw: &str) -> Result<Filter, String> {
    let pieces = split_unescaped_stars(raw);
    let last = pieces.len() - 1;

    let mut initial = None;
    let mut any = Vec::new();
    let mut final_ = None;
    for (i, piece) in pieces.iter().enumerate() {
        if piece.is_empty() {
            continue;
        }
        let value = unescape_value(piece)?;
        if i == 0 {
            initial = Some(value);
        } else if i == last {
            final_ = Some(value);
        } else {
            any.push(value);
        }
    }

    Ok(Filter::Substring {
        attr,
        initial,
        any,
        final_,
    })
}

fn has_unescaped_star(raw: &str) -> bool {
    split_unescaped_stars(raw).len() > 1
}

fn split_unescaped_stars(raw: &str) -> Vec<&str> {
    // Filter values escape '*' as \2a, so a literal '*' is always a wildcard.
    raw.split('*').collect()
}

fn unescape_value(raw: &str) -> Result<String, String> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let hi = chars.next().ok_or("dangling escape in filter value")?;
            let lo = chars.next().ok_or("incomplete escape in filter value")?;
            let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16)
                .map_err(|_| format!("invalid escape '\\{hi}{lo}' in filter value"))?;
            bytes.push(byte);
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    String::from_utf8(bytes).map_err(|_| "filter value is not valid UTF-8".to_string())
}
