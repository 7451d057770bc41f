//! Pipe actions.
//!
//! An [`Action`] is an ordered key/value mapping that always contains an
//! `"action"` tag. Keys are held in a `BTreeMap` so the canonical encoding
//! (and therefore every digest derived from it) is independent of the order
//! in which a user wrote them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identity::{self, NameDigest};
use crate::point::Scalar;

/// The `action` tag key.
pub const ACTION_KEY: &str = "action";

/// Recognized action tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Selector,
    Document,
    Attribute,
    Field,
    Pattern,
    Pipe,
    Exchange,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Selector => "selector",
            ActionKind::Document => "document",
            ActionKind::Attribute => "attribute",
            ActionKind::Field => "field",
            ActionKind::Pattern => "pattern",
            ActionKind::Pipe => "pipe",
            ActionKind::Exchange => "exchange",
        }
    }

    /// Keys an action of this kind must carry as strings.
    fn required_keys(self) -> &'static [&'static str] {
        match self {
            ActionKind::Selector => &["selector"],
            ActionKind::Document => &[],
            ActionKind::Attribute => &["attribute"],
            ActionKind::Field => &["field"],
            ActionKind::Pattern => &["pattern"],
            ActionKind::Pipe => &["name"],
            ActionKind::Exchange => &["name"],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "selector" => ActionKind::Selector,
            "document" => ActionKind::Document,
            "attribute" => ActionKind::Attribute,
            "field" => ActionKind::Field,
            "pattern" => ActionKind::Pattern,
            "pipe" => ActionKind::Pipe,
            "exchange" => ActionKind::Exchange,
            other => return Err(Error::invalid(format!("unknown action: {:?}", other))),
        })
    }
}

/// One unit of DOM extraction or control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(BTreeMap<String, Value>);

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        let mut args = BTreeMap::new();
        args.insert(ACTION_KEY.to_string(), Value::String(kind.as_str().to_string()));
        Self(args)
    }

    pub fn selector(selector: &str) -> Self {
        Self::new(ActionKind::Selector).with("selector", selector)
    }

    pub fn field(field: &str) -> Self {
        Self::new(ActionKind::Field).with("field", field)
    }

    pub fn attribute(attribute: &str) -> Self {
        Self::new(ActionKind::Attribute).with("attribute", attribute)
    }

    pub fn document() -> Self {
        Self::new(ActionKind::Document)
    }

    /// A `pipe` action referencing `nd`; the digest is omitted when `nd` is
    /// unqualified.
    pub fn pipe(nd: &NameDigest) -> Self {
        let mut a = Self::new(ActionKind::Pipe).with("name", nd.name());
        if let Some(d) = nd.digest() {
            a.set("digest", d);
        }
        a
    }

    /// The terminal action sending a value for `nd` back to the server.
    pub fn exchange(nd: &NameDigest, scalar: Scalar) -> Self {
        let mut a = Self::new(ActionKind::Exchange).with("name", nd.name());
        if let Some(d) = nd.digest() {
            a.set("digest", d);
        }
        a.set("scalar", scalar.as_str());
        a
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn args(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn kind(&self) -> Result<ActionKind> {
        match self.0.get(ACTION_KEY) {
            Some(Value::String(s)) => s.parse(),
            Some(other) => Err(Error::invalid(format!(
                "action tag must be a string, got {}",
                other
            ))),
            None => Err(Error::invalid("action is missing the \"action\" key")),
        }
    }

    pub fn is(&self, kind: ActionKind) -> bool {
        self.get_str(ACTION_KEY) == Some(kind.as_str())
    }

    /// The `(name, digest)` referenced by a `pipe` or `exchange` action.
    /// An empty `digest` value is treated as absent.
    pub fn reference(&self) -> Result<NameDigest> {
        let name = self
            .get_str("name")
            .ok_or_else(|| Error::invalid("action is missing \"name\""))?;
        let name = name.to_ascii_lowercase();
        identity::validate_name(&name)?;
        match self.get_str("digest") {
            Some(d) if !d.is_empty() => {
                let d = d.to_ascii_lowercase();
                identity::validate_hex_digest(&d)?;
                Ok(NameDigest::with_digest(name, d))
            }
            _ => Ok(NameDigest::new(name)),
        }
    }

    /// Digest of this action's canonical encoding; the plan trie key.
    pub fn digest(&self) -> Result<String> {
        identity::digest(self)
    }

    pub fn validate(&self) -> Result<()> {
        let kind = self.kind()?;
        for key in kind.required_keys() {
            match self.0.get(*key) {
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(Error::invalid(format!(
                        "{} action: {:?} must be a string",
                        kind, key
                    )))
                }
                None => {
                    return Err(Error::invalid(format!(
                        "{} action is missing {:?}",
                        kind, key
                    )))
                }
            }
        }
        match kind {
            ActionKind::Pipe | ActionKind::Exchange => {
                self.reference()?;
            }
            ActionKind::Pattern => {
                let pattern = self.get_str("pattern").unwrap_or_default();
                regex::Regex::new(pattern)
                    .map_err(|e| Error::invalid(format!("pattern action: {}", e)))?;
                for flag in ["passthrough", "populate_indices", "populate_matches"] {
                    if let Some(v) = self.0.get(flag) {
                        if !v.is_boolean() {
                            return Err(Error::invalid(format!(
                                "pattern action: {:?} must be a bool",
                                flag
                            )));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_encoded_sorted() {
        let a: Action =
            serde_json::from_str(r#"{"selector":".foo","action":"selector"}"#).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            r#"{"action":"selector","selector":".foo"}"#
        );
        assert_eq!(a, Action::selector(".foo"));
        assert_eq!(a.digest().unwrap(), Action::selector(".foo").digest().unwrap());
    }

    #[test]
    fn test_validate() {
        assert!(Action::selector("a").validate().is_ok());
        assert!(Action::document().validate().is_ok());
        assert!(Action::new(ActionKind::Field).validate().is_err());
        assert!(Action::default().validate().is_err());
        assert!(Action::new(ActionKind::Pattern)
            .with("pattern", "(unclosed")
            .validate()
            .is_err());
        assert!(Action::new(ActionKind::Pattern)
            .with("pattern", r"\d+")
            .with("passthrough", true)
            .validate()
            .is_ok());
        let unknown: Action = serde_json::from_str(r#"{"action":"click"}"#).unwrap();
        assert!(matches!(unknown.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_pipe_reference() {
        let d = "a".repeat(40);
        let a = Action::pipe(&NameDigest::with_digest("foo", &d));
        assert_eq!(a.reference().unwrap(), NameDigest::with_digest("foo", &d));

        let bare = Action::new(ActionKind::Pipe)
            .with("name", "foo")
            .with("digest", "");
        assert_eq!(bare.reference().unwrap(), NameDigest::new("foo"));
    }

    #[test]
    fn test_exchanges_for_distinct_pipes_differ() {
        let a = Action::exchange(&NameDigest::with_digest("a", "1".repeat(40)), Scalar::String);
        let b = Action::exchange(&NameDigest::with_digest("b", "1".repeat(40)), Scalar::String);
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.get_str("scalar"), Some("string"));
    }
}
