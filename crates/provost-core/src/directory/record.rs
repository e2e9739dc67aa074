//! Transient, multi-valued directory entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

fn empty_set() -> &'static BTreeSet<String> {
    static EMPTY: OnceLock<BTreeSet<String>> = OnceLock::new();
    EMPTY.get_or_init(BTreeSet::new)
}

/// An LDAP entry under construction or comparison: a mapping from attribute
/// name to a *set* of string values.
///
/// Attribute names are case-insensitive and normalized to lower-case on
/// every access; attribute values keep their case. Repeated identical
/// values collapse, which is what makes record equality usable for the
/// pattern classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRecord {
    attrs: BTreeMap<String, BTreeSet<String>>,
}

impl DirectoryRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses LDIF text (RFC 2849 subset).
    ///
    /// Continuation lines start with a single space and are folded into the
    /// preceding line. Repeated keys accumulate values into a set. Lines
    /// without a `key: value` shape are ignored.
    #[must_use]
    pub fn from_ldif(text: &str) -> Self {
        let mut record = Self::new();
        let mut lines: std::collections::VecDeque<&str> = text.lines().collect();
        while let Some(line) = lines.pop_front() {
            let mut line = line.to_string();
            // One folded continuation per line, matching the producer's
            // 78-column wrapping.
            if lines.front().is_some_and(|next| next.starts_with(' ')) {
                if let Some(next) = lines.pop_front() {
                    line.push_str(next.trim_start());
                }
            }
            if let Some((key, value)) = line.split_once(':') {
                record.add(key.trim(), value.trim());
            }
        }
        record
    }

    /// Adds one value to `key`'s value set.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.attrs
            .entry(key.to_lowercase())
            .or_default()
            .insert(value.into());
    }

    /// Replaces `key`'s value set.
    pub fn insert(&mut self, key: &str, values: BTreeSet<String>) {
        self.attrs.insert(key.to_lowercase(), values);
    }

    /// The value set for `key`, or the empty set if absent.
    #[must_use]
    pub fn values(&self, key: &str) -> &BTreeSet<String> {
        match self.attrs.get(&key.to_lowercase()) {
            Some(values) => values,
            None => empty_set(),
        }
    }

    /// All attribute names present in the record (lower-cased).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// Whether the record has any values for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.attrs.contains_key(&key.to_lowercase())
    }

    /// True when the record holds no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// The entry's distinguished name, when present.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        self.values("dn").iter().next().map(String::as_str)
    }

    /// The entry's object classes.
    #[must_use]
    pub fn object_classes(&self) -> Vec<String> {
        self.values("objectclass").iter().cloned().collect()
    }

    /// The payload attributes for a directory `add` call: everything except
    /// `dn` and `objectclass`, with value sets flattened to lists.
    #[must_use]
    pub fn attributes(&self) -> Vec<(String, Vec<String>)> {
        self.attrs
            .iter()
            .filter(|(k, _)| k.as_str() != "dn" && k.as_str() != "objectclass")
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect()
    }

    /// Renders the record as LDIF: `dn` first, then `objectclass` values,
    /// then the remaining attributes in name order.
    #[must_use]
    pub fn to_ldif(&self) -> String {
        let mut out = String::new();
        if let Some(dn) = self.dn() {
            out.push_str("dn: ");
            out.push_str(dn);
            out.push('\n');
        }
        for class in self.values("objectclass") {
            out.push_str("objectclass: ");
            out.push_str(class);
            out.push('\n');
        }
        for (key, values) in &self.attrs {
            if key == "dn" || key == "objectclass" {
                continue;
            }
            for value in values {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

impl fmt::Display for DirectoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_ldif().trim_end())
    }
}
