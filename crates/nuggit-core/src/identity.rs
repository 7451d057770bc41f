//! Content-addressed identity: `name@digest`.
//!
//! A [`NameDigest`] pairs a human-chosen name with the SHA-1 of a spec's
//! canonical JSON encoding. The name never participates in the digest, so
//! renaming a resource leaves its digest untouched.
//!
//! # Canonical encoding
//!
//! Specs are encoded with `serde_json` in field declaration order, without
//! whitespace, with empty optional fields skipped, and with map keys in
//! sorted order (actions are `BTreeMap`s). Two specs produce the same
//! digest iff their canonical encodings are byte-equal.
//!
//! ```rust
//! use nuggit_core::identity::NameDigest;
//!
//! let nd: NameDigest = "foo@da39a3ee5e6b4b0d3255bfef95601890afd80709".parse().unwrap();
//! assert_eq!(nd.name(), "foo");
//! assert!(nd.is_qualified());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Length of a hex-encoded SHA-1 digest.
pub const HEX_DIGEST_LEN: usize = 40;

/// A resource identity: a validated name and an optional hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameDigest {
    name: String,
    digest: Option<String>,
}

impl NameDigest {
    /// An unqualified identity. The name is not validated; use
    /// [`NameDigest::parse`] for untrusted input.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: None,
        }
    }

    pub fn with_digest(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: Some(digest.into()),
        }
    }

    /// Parse `name` or `name@digest`, splitting at the first `@`.
    pub fn parse(s: &str) -> Result<Self> {
        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (s, None),
        };
        let name = name.to_ascii_lowercase();
        validate_name(&name)?;
        let digest = match digest {
            Some(d) => {
                let d = d.to_ascii_lowercase();
                validate_hex_digest(&d)?;
                Some(d)
            }
            None => None,
        };
        Ok(Self { name, digest })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn is_qualified(&self) -> bool {
        self.digest.is_some()
    }

    /// Returns a copy carrying `digest`.
    pub fn qualify(&self, digest: impl Into<String>) -> Self {
        Self::with_digest(self.name.clone(), digest)
    }

    /// Returns a copy with the digest removed.
    pub fn unqualified(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl Ord for NameDigest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.digest
            .cmp(&other.digest)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for NameDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NameDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.digest {
            Some(d) => write!(f, "{}@{}", self.name, d),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for NameDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for NameDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NameDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Validate a resource name against `[a-z][a-z0-9-]*`.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(Error::invalid("name must not be empty")),
        Some(c) if !c.is_ascii_lowercase() => {
            return Err(Error::invalid(format!(
                "name must start with a lowercase letter: {:?}",
                name
            )))
        }
        Some(_) => {}
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')) {
        return Err(Error::invalid(format!(
            "name contains invalid character {:?}: {:?}",
            c, name
        )));
    }
    Ok(())
}

/// Validate a lowercase 40-character hex SHA-1 digest.
pub fn validate_hex_digest(digest: &str) -> Result<()> {
    if digest.len() != HEX_DIGEST_LEN {
        return Err(Error::invalid(format!(
            "digest must be {} hex characters, got {}",
            HEX_DIGEST_LEN,
            digest.len()
        )));
    }
    if !digest
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(Error::invalid(format!(
            "digest must be lowercase hex: {:?}",
            digest
        )));
    }
    Ok(())
}

/// SHA-1 over the canonical JSON encoding of `spec`, hex encoded.
pub fn digest<T: Serialize + ?Sized>(spec: &T) -> Result<String> {
    let bytes = serde_json::to_vec(spec)
        .map_err(|e| Error::internal(format!("failed to encode spec: {}", e)))?;
    Ok(digest_bytes(&bytes))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Identity of `spec` stored under `name`.
pub fn key<T: Serialize + ?Sized>(name: &str, spec: &T) -> Result<NameDigest> {
    Ok(NameDigest::with_digest(name, digest(spec)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn test_parse_format_roundtrip() {
        for s in ["foo", "foo-bar2", &format!("foo@{}", EMPTY_SHA1)] {
            let nd = NameDigest::parse(s).unwrap();
            assert_eq!(nd.to_string(), s);
            assert_eq!(NameDigest::parse(&nd.to_string()).unwrap(), nd);
        }
    }

    #[test]
    fn test_parse_lowercases_name() {
        let nd = NameDigest::parse("Foo-Text").unwrap();
        assert_eq!(nd.name(), "foo-text");
        assert!(!nd.is_qualified());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(NameDigest::parse("").is_err());
        assert!(NameDigest::parse("1foo").is_err());
        assert!(NameDigest::parse("foo_bar").is_err());
        assert!(NameDigest::parse("foo@abc").is_err());
        assert!(NameDigest::parse(&format!("foo@{}", "z".repeat(40))).is_err());
        assert!(matches!(
            NameDigest::parse("foo@"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ordering_digest_then_name() {
        let a = NameDigest::with_digest("zzz", "0".repeat(40));
        let b = NameDigest::with_digest("aaa", "1".repeat(40));
        let bare = NameDigest::new("mmm");
        assert!(a < b);
        assert!(bare < a);
    }

    #[test]
    fn test_digest_is_sha1_of_canonical_json() {
        let d = digest(&json!({})).unwrap();
        assert_eq!(d, digest_bytes(b"{}"));
        assert_eq!(digest_bytes(b""), EMPTY_SHA1);
    }

    #[test]
    fn test_digest_stable_under_reserialization() {
        let spec = json!({"b": 1, "a": [1, 2, {"y": true, "x": null}]});
        let reparsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string_pretty(&spec).unwrap()).unwrap();
        assert_eq!(digest(&spec).unwrap(), digest(&reparsed).unwrap());
    }

    #[test]
    fn test_serde_as_string() {
        let nd = NameDigest::with_digest("foo", EMPTY_SHA1);
        let json = serde_json::to_string(&nd).unwrap();
        assert_eq!(json, format!("\"foo@{}\"", EMPTY_SHA1));
        let back: NameDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, nd);
    }
}
