//! Resource envelopes with a kind-dispatched spec.
//!
//! ```yaml
//! api_version: v1
//! kind: pipe
//! metadata:
//!   name: foo-text
//!   description: text of the first .foo element
//! spec:
//!   actions:
//!     - action: pipe
//!       name: foo
//!     - action: field
//!       field: innerText
//!   point:
//!     scalar: string
//! ```
//!
//! Unknown kinds and API versions are rejected as `invalid argument`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::identity::{self, NameDigest};
use crate::index::Index;
use crate::pipe::Pipe;
use crate::rule::Rule;
use crate::view::View;

pub const API_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Pipe,
    View,
    Rule,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Pipe => "pipe",
            Kind::View => "view",
            Kind::Rule => "rule",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pipe" => Ok(Kind::Pipe),
            "view" => Ok(Kind::View),
            "rule" => Ok(Kind::Rule),
            other => Err(Error::invalid(format!("unknown resource kind: {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Spec {
    Pipe(Pipe),
    View(View),
    Rule(Rule),
}

impl Spec {
    pub fn kind(&self) -> Kind {
        match self {
            Spec::Pipe(_) => Kind::Pipe,
            Spec::View(_) => Kind::View,
            Spec::Rule(_) => Kind::Rule,
        }
    }

    pub fn digest(&self) -> Result<String> {
        match self {
            Spec::Pipe(p) => p.digest(),
            Spec::View(v) => v.digest(),
            Spec::Rule(r) => r.digest(),
        }
    }

    pub fn deps(&self) -> Vec<NameDigest> {
        match self {
            Spec::Pipe(p) => p.deps().collect(),
            Spec::View(v) => v.deps().collect(),
            Spec::Rule(r) => r.deps().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: Spec,
}

impl Resource {
    pub fn new(name: &str, spec: Spec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            metadata: Metadata {
                name: name.to_string(),
                ..Default::default()
            },
            spec,
        }
    }

    pub fn pipe(name: &str, pipe: Pipe) -> Self {
        Self::new(name, Spec::Pipe(pipe))
    }

    pub fn view(name: &str, view: View) -> Self {
        Self::new(name, Spec::View(view))
    }

    pub fn rule(name: &str, rule: Rule) -> Self {
        Self::new(name, Spec::Rule(rule))
    }

    pub fn kind(&self) -> Kind {
        self.spec.kind()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// `name@digest` of this resource.
    pub fn key(&self) -> Result<NameDigest> {
        Ok(NameDigest::with_digest(
            self.metadata.name.clone(),
            self.spec.digest()?,
        ))
    }

    pub fn deps(&self) -> Vec<NameDigest> {
        self.spec.deps()
    }

    pub fn as_pipe(&self) -> Option<&Pipe> {
        match &self.spec {
            Spec::Pipe(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<&View> {
        match &self.spec {
            Spec::View(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_rule(&self) -> Option<&Rule> {
        match &self.spec {
            Spec::Rule(r) => Some(r),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(Error::invalid(format!(
                "unsupported api_version: {:?}",
                self.api_version
            )));
        }
        identity::validate_name(&self.metadata.name)?;
        match &self.spec {
            Spec::Pipe(p) => p.validate(),
            Spec::View(v) => v.validate(),
            Spec::Rule(r) => r.validate(),
        }
    }

    /// Qualify every reference in the spec against `index`.
    pub fn qualify(&self, index: &Index) -> Result<Resource> {
        let spec = match &self.spec {
            Spec::Pipe(p) => Spec::Pipe(p.qualify(index)?),
            Spec::View(v) => Spec::View(v.qualify(index)?),
            Spec::Rule(r) => Spec::Rule(r.qualify(index)?),
        };
        Ok(Resource {
            api_version: self.api_version.clone(),
            metadata: self.metadata.clone(),
            spec,
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: RawResource = serde_json::from_slice(bytes)?;
        raw.try_into()
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        let raw: RawResource = serde_yaml::from_str(s)?;
        raw.try_into()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::internal(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::internal(e.to_string()))
    }
}

/// The envelope as it appears on the wire, before kind dispatch.
#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(default)]
    api_version: Option<String>,
    kind: String,
    metadata: Metadata,
    #[serde(default)]
    spec: serde_json::Value,
}

impl TryFrom<RawResource> for Resource {
    type Error = Error;

    fn try_from(raw: RawResource) -> Result<Self> {
        let kind: Kind = raw.kind.parse()?;
        let spec = if raw.spec.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw.spec
        };
        let spec = match kind {
            Kind::Pipe => Spec::Pipe(serde_json::from_value(spec)?),
            Kind::View => Spec::View(serde_json::from_value(spec)?),
            Kind::Rule => Spec::Rule(serde_json::from_value::<Rule>(spec)?.normalized()),
        };
        let mut metadata = raw.metadata;
        metadata.name = metadata.name.to_ascii_lowercase();
        Ok(Resource {
            api_version: raw.api_version.unwrap_or_else(|| API_VERSION.to_string()),
            metadata,
            spec,
        })
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum SpecRef<'a> {
    Pipe(&'a Pipe),
    View(&'a View),
    Rule(&'a Rule),
}

#[derive(Serialize)]
struct WireResource<'a> {
    api_version: &'a str,
    kind: Kind,
    metadata: &'a Metadata,
    spec: SpecRef<'a>,
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let spec = match &self.spec {
            Spec::Pipe(p) => SpecRef::Pipe(p),
            Spec::View(v) => SpecRef::View(v),
            Spec::Rule(r) => SpecRef::Rule(r),
        };
        WireResource {
            api_version: &self.api_version,
            kind: self.kind(),
            metadata: &self.metadata,
            spec,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawResource::deserialize(deserializer)?;
        raw.try_into().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::point::{Point, Scalar};

    const PIPE_YAML: &str = r#"
api_version: v1
kind: pipe
metadata:
  name: Foo-Text
  labels: [demo]
spec:
  actions:
    - action: selector
      selector: .foo
    - action: field
      field: innerText
  point:
    scalar: string
"#;

    #[test]
    fn test_parse_yaml_pipe() {
        let r = Resource::from_yaml(PIPE_YAML).unwrap();
        assert_eq!(r.kind(), Kind::Pipe);
        assert_eq!(r.name(), "foo-text");
        assert_eq!(r.metadata.labels, vec!["demo".to_string()]);
        let p = r.as_pipe().unwrap();
        assert_eq!(p.actions[0], Action::selector(".foo"));
        assert_eq!(p.point, Point::scalar(Scalar::String));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_json_and_yaml_agree() {
        let from_yaml = Resource::from_yaml(PIPE_YAML).unwrap();
        let json = from_yaml.to_json_pretty().unwrap();
        let from_json = Resource::from_json(json.as_bytes()).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.key().unwrap(), from_yaml.key().unwrap());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Resource::from_json(br#"{"kind":"widget","metadata":{"name":"x"}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_rename_keeps_digest() {
        let mut r = Resource::from_yaml(PIPE_YAML).unwrap();
        let before = r.key().unwrap();
        r.metadata.name = "renamed".into();
        let after = r.key().unwrap();
        assert_eq!(before.digest(), after.digest());
        assert_ne!(before, after);
    }

    #[test]
    fn test_validate_api_version() {
        let mut r = Resource::from_yaml(PIPE_YAML).unwrap();
        r.api_version = "v2".into();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_rule_spec_normalized() {
        let r = Resource::from_json(
            br#"{"api_version":"v1","kind":"rule","metadata":{"name":"r"},
                 "spec":{"hostname":"Example.com","url_pattern":"","pipes":["foo"]}}"#,
        )
        .unwrap();
        let rule = r.as_rule().unwrap();
        assert_eq!(rule.hostname.as_deref(), Some("example.com"));
        assert!(rule.url_pattern.is_none());
        assert_eq!(r.deps(), vec![NameDigest::new("foo")]);
    }
}
