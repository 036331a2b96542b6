//! Distinguished name parsing and comparison.
//!
//! Names are kept as written: attribute types keep their casing and values
//! keep their escape sequences, so formatting a parsed name gives back the
//! input minus insignificant spaces. Ancestry is decided on the formatted
//! text of whole components, most-specific component first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OrgSyncError, OrgSyncResult};

/// Characters that may follow a backslash without forming a hex pair.
const ESCAPABLE: &[char] = &[' ', '"', '#', '+', ',', ';', '<', '=', '>', '\\'];

// ============================================================================
// Attribute Value Assertion
// ============================================================================

/// One `type=value` pair of a relative distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeValue {
    attr_type: String,
    raw_value: String,
}

impl AttributeValue {
    /// Returns the attribute type as written.
    #[must_use]
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// Returns the value with its escape sequences intact.
    #[must_use]
    pub fn raw_value(&self) -> &str {
        &self.raw_value
    }

    /// Returns the value with escape sequences decoded.
    #[must_use]
    pub fn value(&self) -> String {
        unescape(&self.raw_value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr_type, self.raw_value)
    }
}

// ============================================================================
// Relative Distinguished Name
// ============================================================================

/// A relative distinguished name: one component of a DN.
///
/// Multi-valued components (`cn=a+uid=b`) keep their pairs in input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rdn {
    values: Vec<AttributeValue>,
}

impl Rdn {
    /// Returns the `type=value` pairs of this component.
    #[must_use]
    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    /// Checks whether any pair uses the given attribute type.
    ///
    /// Attribute types are case-insensitive in LDAP.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.values
            .iter()
            .any(|v| v.attr_type.eq_ignore_ascii_case(name))
    }

    /// Returns the decoded value of the first pair with the given type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .iter()
            .find(|v| v.attr_type.eq_ignore_ascii_case(name))
            .map(AttributeValue::value)
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Distinguished Name
// ============================================================================

/// A parsed distinguished name, most-specific component first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// ## Errors
    ///
    /// Returns `OrgSyncError::MalformedDn` if the input is empty, contains an
    /// unbalanced or invalid escape sequence, or has a component that is not
    /// a `type=value` pair.
    pub fn parse(dn: &str) -> OrgSyncResult<Self> {
        if dn.trim().is_empty() {
            return Err(OrgSyncError::malformed_dn(dn, "empty distinguished name"));
        }

        let rdns = split_unescaped(dn, ',')
            .map_err(|reason| OrgSyncError::malformed_dn(dn, reason))?
            .into_iter()
            .map(|component| parse_rdn(component).map_err(|reason| OrgSyncError::malformed_dn(dn, reason)))
            .collect::<OrgSyncResult<Vec<_>>>()?;

        Ok(Self { rdns })
    }

    /// Builds a name from already-parsed components.
    #[must_use]
    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    /// Returns the components, most-specific first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns true if the name has no components (the root DSE).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Returns the name of the immediate parent entry.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.len() <= 1 {
            return None;
        }
        Some(Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// Iterates over the proper ancestors of this name, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = DistinguishedName> + '_ {
        (1..self.rdns.len()).map(move |i| Self {
            rdns: self.rdns[i..].to_vec(),
        })
    }

    /// Checks whether `self` is a proper ancestor of `other`.
    ///
    /// True iff `self` is a non-empty, component-aligned proper suffix of
    /// `other`. Components are compared by their formatted text, so
    /// ordering and casing matter.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.rdns.is_empty() || self.rdns.len() >= other.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        self.rdns
            .iter()
            .zip(&other.rdns[offset..])
            .all(|(a, b)| a.to_string() == b.to_string())
    }

    /// Formats the name with no spaces between components.
    #[must_use]
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl FromStr for DistinguishedName {
    type Err = OrgSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DistinguishedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DistinguishedName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Checks whether `ancestor` is a proper ancestor of `dn`.
///
/// ## Errors
///
/// Returns `OrgSyncError::MalformedDn` if either name fails to parse.
pub fn is_ancestor(ancestor: &str, dn: &str) -> OrgSyncResult<bool> {
    let ancestor = DistinguishedName::parse(ancestor)?;
    let dn = DistinguishedName::parse(dn)?;
    Ok(ancestor.is_ancestor_of(&dn))
}

/// Normalizes a DN string to its formatted form.
///
/// ## Errors
///
/// Returns `OrgSyncError::MalformedDn` if the name fails to parse.
pub fn normalize(dn: &str) -> OrgSyncResult<String> {
    DistinguishedName::parse(dn).map(|dn| dn.format())
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Splits on `sep` wherever it is not escaped, validating escapes on the way.
fn split_unescaped(input: &str, sep: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            match chars.next() {
                None => return Err("dangling escape at end of input".to_string()),
                Some((_, next)) if next.is_ascii_hexdigit() => match chars.peek() {
                    Some((_, h)) if h.is_ascii_hexdigit() => {
                        chars.next();
                    }
                    _ => return Err(format!("incomplete hex escape near offset {i}")),
                },
                Some((_, next)) if ESCAPABLE.contains(&next) => {}
                Some((_, next)) => return Err(format!("invalid escape '\\{next}' at offset {i}")),
            }
        } else if c == sep {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn parse_rdn(component: &str) -> Result<Rdn, String> {
    if component.trim().is_empty() {
        return Err("empty component".to_string());
    }

    let values = split_unescaped(component, '+')?
        .into_iter()
        .map(parse_attribute_value)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Rdn { values })
}

fn parse_attribute_value(pair: &str) -> Result<AttributeValue, String> {
    let eq = find_unescaped(pair, '=').ok_or_else(|| format!("component '{pair}' has no '='"))?;
    let attr_type = pair[..eq].trim();
    if attr_type.is_empty() {
        return Err(format!("component '{pair}' has an empty attribute type"));
    }

    Ok(AttributeValue {
        attr_type: attr_type.to_string(),
        raw_value: trim_value(&pair[eq + 1..]),
    })
}

fn find_unescaped(input: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == target {
            return Some(i);
        }
    }
    None
}

/// Trims insignificant spaces, keeping a trailing space that was escaped.
fn trim_value(value: &str) -> String {
    let start = value.trim_start();
    let trimmed = start.trim_end();
    let trailing_backslashes = trimmed.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_backslashes % 2 == 1 && trimmed.len() < start.len() {
        format!("{trimmed} ")
    } else {
        trimmed.to_string()
    }
}

fn unescape(raw: &str) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some(hi) if hi.is_ascii_hexdigit() && chars.peek().is_some_and(char::is_ascii_hexdigit) => {
                let lo = chars.next().unwrap_or('0');
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).unwrap_or(b'?');
                bytes.push(byte);
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => {}
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> DistinguishedName {
        DistinguishedName::parse(s).unwrap()
    }

    #[test]
    fn parse_and_format_strips_spaces() {
        let parsed = dn("OU=Sales, OU=Corp , DC=example,DC=com");
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed.format(), "OU=Sales,OU=Corp,DC=example,DC=com");
        assert_eq!(parsed.rdns()[0].values()[0].attr_type(), "OU");
    }

    #[test]
    fn parse_multi_valued_rdn() {
        let parsed = dn("cn=John+uid=jdoe,ou=people,dc=example");
        assert_eq!(parsed.rdns()[0].values().len(), 2);
        assert!(parsed.rdns()[0].has_attribute("UID"));
        assert_eq!(parsed.format(), "cn=John+uid=jdoe,ou=people,dc=example");
    }

    #[test]
    fn escaped_separators_stay_in_value() {
        let parsed = dn(r"cn=Doe\, John,ou=people,dc=example");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.rdns()[0].get("cn").as_deref(), Some("Doe, John"));
        assert_eq!(parsed.rdns()[0].values()[0].raw_value(), r"Doe\, John");
    }

    #[test]
    fn hex_escapes_decode() {
        let parsed = dn(r"cn=caf\C3\A9,dc=example");
        assert_eq!(parsed.rdns()[0].get("cn").as_deref(), Some("café"));
    }

    #[test]
    fn escaped_trailing_space_is_kept() {
        let parsed = dn(r"cn=trailing\ ,dc=example");
        assert_eq!(parsed.rdns()[0].values()[0].raw_value(), r"trailing\ ");
        assert_eq!(parsed.rdns()[0].get("cn").as_deref(), Some("trailing "));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "   ", r"cn=dangling\", r"cn=bad\x escape", r"cn=half\4", r"cn=half\4,dc=b", r"cn=half\Ax", "cn=a,,dc=b", "novalue,dc=b", "=value"] {
            let err = DistinguishedName::parse(bad).unwrap_err();
            assert!(matches!(err, OrgSyncError::MalformedDn { .. }), "{bad:?} gave {err:?}");
        }
    }

    #[test]
    fn ancestry_is_component_aligned_suffix() {
        let child = dn("ou=Dev,ou=Eng,dc=example,dc=com");
        assert!(dn("ou=Eng,dc=example,dc=com").is_ancestor_of(&child));
        assert!(dn("dc=com").is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&child));
        // text suffix but not a component suffix
        assert!(!dn("u=Eng,dc=example,dc=com").is_ancestor_of(&child));
        assert!(!dn("dc=com,dc=example").is_ancestor_of(&child));
        assert!(!dn("ou=Other,dc=example,dc=com").is_ancestor_of(&child));
    }

    #[test]
    fn ancestry_matches_formatted_suffix_property() {
        let names = [
            "dc=com",
            "dc=example,dc=com",
            "ou=Eng,dc=example,dc=com",
            "ou=Dev,ou=Eng,dc=example,dc=com",
            "cn=Ann,ou=Dev,ou=Eng,dc=example,dc=com",
            "ou=Dev,dc=example,dc=com",
            "u=Eng,dc=example,dc=com",
        ];
        for a in names {
            for d in names {
                let (fa, fd) = (dn(a).format(), dn(d).format());
                let aligned_suffix = fd.ends_with(&format!(",{fa}"));
                assert_eq!(is_ancestor(a, d).unwrap(), aligned_suffix && fa != fd, "{a} / {d}");
            }
        }
    }

    #[test]
    fn ancestry_is_case_sensitive_on_text() {
        assert!(!dn("DC=com").is_ancestor_of(&dn("dc=example,dc=com")));
    }

    #[test]
    fn parent_and_ancestors() {
        let parsed = dn("cn=a,ou=b,dc=c");
        assert_eq!(parsed.parent().unwrap().format(), "ou=b,dc=c");
        let chain: Vec<String> = parsed.ancestors().map(|a| a.format()).collect();
        assert_eq!(chain, vec!["ou=b,dc=c", "dc=c"]);
        assert!(dn("dc=c").parent().is_none());
    }

    #[test]
    fn serde_round_trips_as_string() {
        let parsed = dn("ou=Eng, dc=example");
        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, "\"ou=Eng,dc=example\"");
        let back: DistinguishedName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parsed);
    }
}
