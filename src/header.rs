//! Header names, values, and the insertion-ordered header list.

use std::fmt;
use std::slice::Iter;

/// A single `name: value` header pair.
///
/// The name is stored in canonical form (see [`canonicalize`]); the value is
/// stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Create a header, canonicalizing the name.
    pub fn new(name: &str, value: impl Into<String>) -> Header {
        Header {
            name: canonicalize(name),
            value: value.into(),
        }
    }

    /// The canonical header name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The header value, verbatim.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if `name` refers to this header, comparing in canonical
    /// form.
    pub fn matches(&self, name: &str) -> bool {
        canonicalize(name) == self.name
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Canonicalize a header name.
///
/// Each maximal run of non-hyphen characters is rewritten with its first
/// character uppercased and the rest lowercased; hyphens are kept literally,
/// so leading and doubled hyphens survive:
///
/// ```text
/// x-mOrE-iNfo      => X-More-Info
/// -hypheN-prEfIxed => -Hyphen-Prefixed
/// double--hyphen   => Double--Hyphen
/// :http            => :http
/// ```
pub fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut segment_start = true;
    for ch in name.chars() {
        if ch == '-' {
            out.push(ch);
            segment_start = true;
        } else if segment_start {
            out.push(ch.to_ascii_uppercase());
            segment_start = false;
        } else {
            out.push(ch.to_ascii_lowercase());
        }
    }
    out
}

/// An insertion-ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    /// Create an empty list.
    pub fn new() -> Headers {
        Headers::default()
    }

    /// Append a header, keeping any existing entries with the same name.
    pub fn append(&mut self, header: Header) {
        self.entries.push(header);
    }

    /// Replace the first header matching `name`, or append a new one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let canonical = canonicalize(name);
        for entry in &mut self.entries {
            if entry.name == canonical {
                entry.value = value.into();
                return;
            }
        }
        self.entries.push(Header {
            name: canonical,
            value: value.into(),
        });
    }

    /// The value of the first header matching `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        let canonical = canonicalize(name);
        self.entries
            .iter()
            .find(|h| h.name == canonical)
            .map(|h| h.value.as_str())
    }

    /// Returns true if a header matching `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of headers in the list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> Iter<'_, Header> {
        self.entries.iter()
    }

    /// Remove every header.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
