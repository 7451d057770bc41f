//! Trigger rules: URL predicates that attach pipes to pages.
//!
//! A rule matches a URL when it is `always_trigger`, or when every predicate
//! it sets holds: `hostname` equals the URL's host and `url_pattern`
//! matches the full URL string. A rule with no predicate matches nothing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::identity::{self, NameDigest};
use crate::index::Index;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub always_trigger: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipes: Vec<NameDigest>,
}

impl Rule {
    pub fn hostname(hostname: &str) -> Self {
        Self {
            hostname: Some(hostname.to_ascii_lowercase()),
            ..Default::default()
        }
    }

    pub fn url_pattern(pattern: &str) -> Self {
        Self {
            url_pattern: Some(pattern.to_string()),
            ..Default::default()
        }
    }

    pub fn always() -> Self {
        Self {
            always_trigger: true,
            ..Default::default()
        }
    }

    pub fn with_pipe(mut self, nd: NameDigest) -> Self {
        self.pipes.push(nd);
        self
    }

    pub fn digest(&self) -> Result<String> {
        identity::digest(self)
    }

    pub fn deps(&self) -> impl Iterator<Item = NameDigest> + '_ {
        self.pipes.iter().cloned()
    }

    /// Empty predicates are dropped and the hostname lowercased.
    pub fn normalized(mut self) -> Self {
        self.hostname = self
            .hostname
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase());
        self.url_pattern = self.url_pattern.filter(|p| !p.is_empty());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.always_trigger && self.hostname.is_none() && self.url_pattern.is_none() {
            return Err(Error::invalid(
                "rule needs a hostname, a url_pattern, or always_trigger",
            ));
        }
        if let Some(pattern) = &self.url_pattern {
            Regex::new(pattern).map_err(|e| Error::invalid(format!("url_pattern: {}", e)))?;
        }
        Ok(())
    }

    pub fn qualify(&self, index: &Index) -> Result<Rule> {
        let mut r = self.clone();
        for nd in r.pipes.iter_mut() {
            *nd = index.resolve_pipe(nd)?;
        }
        Ok(r)
    }

    pub fn matches(&self, url: &Url) -> bool {
        let pattern = match self.url_pattern.as_deref().map(Regex::new) {
            Some(Ok(re)) => Some(re),
            Some(Err(_)) => return false,
            None => None,
        };
        matches_url(
            self.always_trigger,
            self.hostname.as_deref(),
            pattern.as_ref(),
            url,
        )
    }
}

/// Shared predicate used by the rule stores once a rule's pattern has been
/// compiled.
pub fn matches_url(
    always_trigger: bool,
    hostname: Option<&str>,
    pattern: Option<&Regex>,
    url: &Url,
) -> bool {
    if always_trigger {
        return true;
    }
    let hostname = hostname.filter(|h| !h.is_empty());
    if hostname.is_none() && pattern.is_none() {
        return false;
    }
    if let Some(h) = hostname {
        if !url.host_str().is_some_and(|host| host.eq_ignore_ascii_case(h)) {
            return false;
        }
    }
    if let Some(re) = pattern {
        if !re.is_match(url.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_hostname_only() {
        let r = Rule::hostname("example.com");
        assert!(r.matches(&url("https://example.com/x")));
        assert!(r.matches(&url("http://EXAMPLE.com")));
        assert!(!r.matches(&url("https://other.com/")));
        assert!(!r.matches(&url("https://www.example.com/")));
    }

    #[test]
    fn test_pattern_only() {
        let r = Rule::url_pattern(r"^https://[^/]+/articles/\d+$");
        assert!(r.matches(&url("https://news.site/articles/42")));
        assert!(!r.matches(&url("https://news.site/articles/latest")));
    }

    #[test]
    fn test_hostname_and_pattern_must_both_hold() {
        let r = Rule {
            hostname: Some("example.com".into()),
            url_pattern: Some("/items/".into()),
            ..Default::default()
        };
        assert!(r.matches(&url("https://example.com/items/1")));
        assert!(!r.matches(&url("https://example.com/about")));
        assert!(!r.matches(&url("https://other.com/items/1")));
    }

    #[test]
    fn test_always_trigger() {
        assert!(Rule::always().matches(&url("file:///tmp/x.html")));
        assert!(!Rule::default().matches(&url("https://example.com/")));
    }

    #[test]
    fn test_validate_and_normalize() {
        assert!(Rule::default().validate().is_err());
        assert!(Rule::url_pattern("(").validate().is_err());
        let r = Rule {
            hostname: Some("Example.COM".into()),
            url_pattern: Some(String::new()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(r.hostname.as_deref(), Some("example.com"));
        assert!(r.url_pattern.is_none());
        assert!(r.validate().is_ok());
    }
}
