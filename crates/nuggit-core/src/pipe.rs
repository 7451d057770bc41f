//! Pipes and the operations over them: deps, flatten, qualify.
//!
//! # Flattening
//!
//! ```text
//! foo      = [selector ".foo"]
//! foo-text = [pipe foo@<d>, field innerText]
//!
//! flatten({foo}, foo-text) = [selector ".foo", field innerText]
//! ```
//!
//! Nested references flatten too. Each referenced pipe is expanded once per
//! call and reused wherever it appears again. The flattened pipe keeps its
//! [`Point`], and its digest is recomputed from the new action sequence.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionKind};
use crate::error::{Error, Result};
use crate::identity::{self, NameDigest};
use crate::index::Index;
use crate::point::Point;

/// An ordered action chain producing a value of type `point`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipe {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub point: Point,
}

impl Pipe {
    pub fn new(actions: Vec<Action>, point: Point) -> Self {
        Self { actions, point }
    }

    pub fn digest(&self) -> Result<String> {
        identity::digest(self)
    }

    /// References made by `pipe` actions, in action order. Duplicates are
    /// kept; malformed references are skipped (see [`Pipe::validate`]).
    pub fn deps(&self) -> impl Iterator<Item = NameDigest> + '_ {
        self.actions
            .iter()
            .filter(|a| a.is(ActionKind::Pipe))
            .filter_map(|a| a.reference().ok())
    }

    pub fn is_flat(&self) -> bool {
        !self.actions.iter().any(|a| a.is(ActionKind::Pipe))
    }

    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(Error::invalid("pipe must have at least one action"));
        }
        for (i, action) in self.actions.iter().enumerate() {
            action
                .validate()
                .map_err(|e| Error::invalid(format!("action {}: {}", i, e)))?;
            if action.is(ActionKind::Exchange) {
                return Err(Error::invalid(format!(
                    "action {}: exchange actions are added by the planner",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Inline every `pipe` action using `refs`.
    ///
    /// References must be qualified and present in `refs`; otherwise the
    /// result is `invalid argument`. A reference cycle is a `failed
    /// precondition`.
    pub fn flatten(&self, refs: &HashMap<NameDigest, Pipe>) -> Result<Pipe> {
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();
        let actions = expand(&self.actions, refs, &mut memo, &mut visiting)?;
        Ok(Pipe {
            actions,
            point: self.point,
        })
    }

    /// Set the digest of every `pipe` action from `index`.
    ///
    /// Qualified references must exist; unqualified ones must name exactly
    /// one indexed pipe. Does not recurse into the referenced pipes.
    pub fn qualify(&self, index: &Index) -> Result<Pipe> {
        let mut p = self.clone();
        for action in p.actions.iter_mut() {
            if !action.is(ActionKind::Pipe) {
                continue;
            }
            let nd = index.resolve_pipe(&action.reference()?)?;
            if let Some(d) = nd.digest() {
                action.set("digest", d);
            }
            action.set("name", nd.name());
        }
        Ok(p)
    }
}

/// Expand `actions`, caching the flat actions of each referenced pipe in
/// `memo`. `visiting` holds the references on the current expansion path.
fn expand(
    actions: &[Action],
    refs: &HashMap<NameDigest, Pipe>,
    memo: &mut HashMap<NameDigest, Vec<Action>>,
    visiting: &mut HashSet<NameDigest>,
) -> Result<Vec<Action>> {
    let mut out = Vec::with_capacity(actions.len());
    for action in actions {
        if !action.is(ActionKind::Pipe) {
            out.push(action.clone());
            continue;
        }
        let nd = action.reference()?;
        if let Some(flat) = memo.get(&nd) {
            out.extend(flat.iter().cloned());
            continue;
        }
        if !nd.is_qualified() {
            return Err(Error::invalid(format!(
                "cannot flatten unqualified reference: {}",
                nd
            )));
        }
        let referenced = refs
            .get(&nd)
            .ok_or_else(|| Error::invalid(format!("referenced pipe not provided: {}", nd)))?;
        if !visiting.insert(nd.clone()) {
            return Err(Error::precondition(format!(
                "pipe reference cycle through {}",
                nd
            )));
        }
        let flat = expand(&referenced.actions, refs, memo, visiting)?;
        visiting.remove(&nd);
        out.extend(flat.iter().cloned());
        memo.insert(nd, flat);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Scalar;
    use crate::resource::Resource;

    fn foo() -> Pipe {
        Pipe::new(vec![Action::selector(".foo")], Point::default())
    }

    fn foo_text(foo_nd: &NameDigest) -> Pipe {
        Pipe::new(
            vec![Action::pipe(foo_nd), Action::field("innerText")],
            Point::scalar(Scalar::String),
        )
    }

    #[test]
    fn test_flatten_two_level() {
        let foo_nd = identity::key("foo", &foo()).unwrap();
        let text = foo_text(&foo_nd);
        let refs = HashMap::from([(foo_nd.clone(), foo())]);

        let flat = text.flatten(&refs).unwrap();
        assert_eq!(
            flat.actions,
            vec![Action::selector(".foo"), Action::field("innerText")]
        );
        assert!(flat.is_flat());
        assert_eq!(flat.point, text.point);

        let expected = Pipe::new(flat.actions.clone(), text.point);
        assert_eq!(flat.digest().unwrap(), expected.digest().unwrap());
        assert_ne!(flat.digest().unwrap(), text.digest().unwrap());
    }

    #[test]
    fn test_flatten_nested_references() {
        let foo_nd = identity::key("foo", &foo()).unwrap();
        let mid = Pipe::new(
            vec![Action::pipe(&foo_nd), Action::selector("a")],
            Point::default(),
        );
        let mid_nd = identity::key("mid", &mid).unwrap();
        let top = Pipe::new(
            vec![Action::document(), Action::pipe(&mid_nd), Action::attribute("href")],
            Point::default(),
        );
        let refs = HashMap::from([(foo_nd, foo()), (mid_nd, mid)]);

        let flat = top.flatten(&refs).unwrap();
        assert_eq!(
            flat.actions,
            vec![
                Action::document(),
                Action::selector(".foo"),
                Action::selector("a"),
                Action::attribute("href"),
            ]
        );
    }

    #[test]
    fn test_flatten_idempotent_on_flat() {
        let p = foo();
        let flat = p.flatten(&HashMap::new()).unwrap();
        assert_eq!(flat, p);
        assert_eq!(flat.flatten(&HashMap::new()).unwrap(), flat);
    }

    #[test]
    fn test_flatten_missing_reference() {
        let foo_nd = identity::key("foo", &foo()).unwrap();
        let err = foo_text(&foo_nd).flatten(&HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_flatten_self_reference_terminates() {
        let nd = NameDigest::with_digest("loop", "0".repeat(40));
        let looping = Pipe::new(vec![Action::pipe(&nd)], Point::default());
        let refs = HashMap::from([(nd, looping.clone())]);
        let err = looping.flatten(&refs).unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[test]
    fn test_flatten_mutual_reference() {
        let a = NameDigest::with_digest("a", "a".repeat(40));
        let b = NameDigest::with_digest("b", "b".repeat(40));
        let refs = HashMap::from([
            (a.clone(), Pipe::new(vec![Action::pipe(&b)], Point::default())),
            (
                b.clone(),
                Pipe::new(vec![Action::selector("x"), Action::pipe(&a)], Point::default()),
            ),
        ]);
        let top = Pipe::new(vec![Action::pipe(&a)], Point::default());
        let err = top.flatten(&refs).unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[test]
    fn test_flatten_diamond_fan_out() {
        // Each level references the one below twice.
        let mut refs = HashMap::new();
        let mut below = Pipe::new(vec![Action::selector("a")], Point::default());
        let mut below_nd = identity::key("level0", &below).unwrap();
        for level in 1..=13 {
            refs.insert(below_nd.clone(), below);
            let next = Pipe::new(
                vec![Action::pipe(&below_nd), Action::pipe(&below_nd)],
                Point::default(),
            );
            below_nd = identity::key(&format!("level{}", level), &next).unwrap();
            below = next;
        }

        let flat = below.flatten(&refs).unwrap();
        assert!(flat.is_flat());
        assert_eq!(flat.actions.len(), 1 << 13);
        assert!(flat.actions.iter().all(|a| *a == Action::selector("a")));
    }

    #[test]
    fn test_validate() {
        assert!(foo().validate().is_ok());
        assert!(Pipe::default().validate().is_err());
        let with_exchange = Pipe::new(
            vec![
                Action::selector("a"),
                Action::exchange(&NameDigest::new("foo"), Scalar::String),
            ],
            Point::default(),
        );
        assert!(with_exchange.validate().is_err());
    }

    #[test]
    fn test_qualify_sets_unique_digest() {
        let mut index = Index::new();
        let foo_nd = index.add(Resource::pipe("foo", foo())).unwrap();

        let text = foo_text(&NameDigest::new("foo"));
        let q = text.qualify(&index).unwrap();
        assert_eq!(q.deps().collect::<Vec<_>>(), vec![foo_nd]);
        assert_eq!(q.qualify(&index).unwrap(), q);
    }

    #[test]
    fn test_qualify_errors() {
        let mut index = Index::new();
        let text = foo_text(&NameDigest::new("foo"));
        assert!(matches!(text.qualify(&index), Err(Error::NotFound(_))));

        index.add(Resource::pipe("foo", foo())).unwrap();
        index
            .add(Resource::pipe(
                "foo",
                Pipe::new(vec![Action::selector(".bar")], Point::default()),
            ))
            .unwrap();
        assert!(matches!(
            text.qualify(&index),
            Err(Error::Ambiguous { count: 2, .. })
        ));

        let missing = foo_text(&NameDigest::with_digest("foo", "f".repeat(40)));
        assert!(matches!(missing.qualify(&index), Err(Error::NotFound(_))));
    }
}
