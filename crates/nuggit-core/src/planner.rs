//! Compiles rule-matched pipes into a [`Plan`].
//!
//! ```ignore
//! let mut planner = Planner::new();
//! for (nd, pipe) in referenced {
//!     planner.add_referenced_pipe(nd, pipe);
//! }
//! for (nd, pipe) in matched {
//!     planner.add_pipe(nd, pipe)?;
//! }
//! let plan = planner.build();
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::action::Action;
use crate::error::{Error, Result};
use crate::identity::NameDigest;
use crate::pipe::Pipe;
use crate::plan::{Plan, PlanGraph};

/// A pipe folded into a plan and the identity its exchange reports under.
///
/// `exchange` keeps the pipe's name with the digest of the flattened pipe,
/// so it differs from `name` whenever the pipe references others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPipe {
    pub name: NameDigest,
    pub exchange: NameDigest,
}

#[derive(Debug, Default)]
pub struct Planner {
    refs: HashMap<NameDigest, Pipe>,
    pipes: BTreeMap<NameDigest, (Pipe, NameDigest)>,
    graph: PlanGraph,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `pipe` available for flattening references to `nd`.
    pub fn add_referenced_pipe(&mut self, nd: NameDigest, pipe: Pipe) {
        self.refs.insert(nd, pipe);
    }

    /// Flatten `pipe` and fold it into the trie, terminated by an exchange
    /// carrying `nd`'s name, the flattened pipe's digest, and the scalar
    /// type.
    pub fn add_pipe(&mut self, nd: NameDigest, pipe: Pipe) -> Result<()> {
        if !nd.is_qualified() {
            return Err(Error::invalid(format!(
                "planned pipes must be qualified: {}",
                nd
            )));
        }
        if self.pipes.contains_key(&nd) {
            return Ok(());
        }
        let flat = pipe.flatten(&self.refs)?;
        let exchange = NameDigest::with_digest(nd.name(), flat.digest()?);
        let mut actions = flat.actions;
        actions.push(Action::exchange(&exchange, flat.point.scalar));
        self.graph.insert(&actions)?;
        trace!(pipe = %nd, exchange = %exchange, steps = self.graph.len(), "planned pipe");
        self.pipes.insert(nd, (pipe, exchange));
        Ok(())
    }

    /// Pipes added with [`Planner::add_pipe`], ordered by identity.
    pub fn pipes(&self) -> impl Iterator<Item = (&NameDigest, &Pipe)> {
        self.pipes.iter().map(|(nd, (pipe, _))| (nd, pipe))
    }

    pub fn planned(&self) -> Vec<PlannedPipe> {
        self.pipes
            .iter()
            .map(|(nd, (_, exchange))| PlannedPipe {
                name: nd.clone(),
                exchange: exchange.clone(),
            })
            .collect()
    }

    pub fn build(&self) -> Plan {
        self.graph.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::identity;
    use crate::point::{Point, Scalar};

    fn pipe(actions: Vec<Action>) -> Pipe {
        Pipe::new(actions, Point::scalar(Scalar::String))
    }

    fn plan_for(pipes: &[(NameDigest, Pipe)]) -> Plan {
        let mut planner = Planner::new();
        for (nd, p) in pipes {
            planner.add_pipe(nd.clone(), p.clone()).unwrap();
        }
        planner.build()
    }

    #[test]
    fn test_sharing_prefix() {
        let a = Action::selector("article");
        let b = Action::selector("h2");
        let p1 = pipe(vec![a.clone(), b.clone(), Action::field("innerText")]);
        let p2 = pipe(vec![a.clone(), b.clone(), Action::attribute("id")]);
        let set = vec![
            (identity::key("titles", &p1).unwrap(), p1),
            (identity::key("ids", &p2).unwrap(), p2),
        ];

        let plan = plan_for(&set);
        assert_eq!(plan.steps.len(), 6);
        assert_eq!(plan.roots, vec![1]);
        assert_eq!(plan.exchanges.len(), 2);
        assert_eq!(plan.steps[0].action, a);
        assert_eq!(plan.steps[1].action, b);
        assert_eq!(plan.steps[1].input, 1);
        for x in &plan.exchanges {
            assert!(plan.step(*x).unwrap().action.is(ActionKind::Exchange));
        }
        assert_eq!(
            plan.steps.len(),
            plan.roots.len() + plan.exchanges.len() + 3
        );
    }

    #[test]
    fn test_permutation_stable() {
        let pipes: Vec<(NameDigest, Pipe)> = ["h1", "h2", "p", "a"]
            .iter()
            .map(|sel| {
                let p = pipe(vec![Action::document(), Action::selector(sel)]);
                (identity::key(&format!("sel-{}", sel), &p).unwrap(), p)
            })
            .collect();
        let forward = plan_for(&pipes);
        let mut reversed = pipes.clone();
        reversed.reverse();
        assert_eq!(forward, plan_for(&reversed));
        let mut rotated = pipes.clone();
        rotated.rotate_left(2);
        assert_eq!(forward, plan_for(&rotated));
        assert_eq!(forward.exchanges.len(), pipes.len());
    }

    #[test]
    fn test_identical_actions_distinct_exchanges() {
        let p = pipe(vec![Action::selector("title")]);
        let a = NameDigest::with_digest("a", p.digest().unwrap());
        let b = NameDigest::with_digest("b", p.digest().unwrap());
        let plan = plan_for(&[(a.clone(), p.clone()), (b.clone(), p)]);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.exchanges.len(), 2);
        let mut targets = plan.exchange_targets().unwrap();
        targets.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(targets, expected);
    }

    #[test]
    fn test_flattens_references() {
        let foo = pipe(vec![Action::selector(".foo")]);
        let foo_nd = identity::key("foo", &foo).unwrap();
        let text = pipe(vec![Action::pipe(&foo_nd), Action::field("innerText")]);
        let text_nd = identity::key("foo-text", &text).unwrap();

        let mut planner = Planner::new();
        planner.add_referenced_pipe(foo_nd, foo);
        planner.add_pipe(text_nd.clone(), text).unwrap();
        let plan = planner.build();

        let flat = pipe(vec![Action::selector(".foo"), Action::field("innerText")]);
        let flat_nd = NameDigest::with_digest("foo-text", flat.digest().unwrap());
        assert_ne!(flat_nd, text_nd);

        let actions: Vec<_> = plan.steps.iter().map(|s| s.action.clone()).collect();
        assert_eq!(
            actions,
            vec![
                Action::selector(".foo"),
                Action::field("innerText"),
                Action::exchange(&flat_nd, Scalar::String),
            ]
        );
        assert_eq!(plan.exchange_targets().unwrap(), vec![flat_nd.clone()]);
        assert_eq!(planner.pipes().map(|(nd, _)| nd).collect::<Vec<_>>(), vec![&text_nd]);
        assert_eq!(
            planner.planned(),
            vec![PlannedPipe {
                name: text_nd,
                exchange: flat_nd,
            }]
        );
    }

    #[test]
    fn test_flat_pipe_exchanges_under_its_own_digest() {
        let p = pipe(vec![Action::selector("title")]);
        let nd = identity::key("title", &p).unwrap();
        let mut planner = Planner::new();
        planner.add_pipe(nd.clone(), p).unwrap();
        assert_eq!(planner.planned()[0].exchange, nd);
    }

    #[test]
    fn test_missing_reference() {
        let foo_nd = NameDigest::with_digest("foo", "a".repeat(40));
        let text = pipe(vec![Action::pipe(&foo_nd)]);
        let mut planner = Planner::new();
        let err = planner
            .add_pipe(identity::key("t", &text).unwrap(), text)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(planner.build().steps.is_empty());
    }

    #[test]
    fn test_unqualified_rejected() {
        let mut planner = Planner::new();
        let err = planner
            .add_pipe(NameDigest::new("t"), pipe(vec![Action::selector("a")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
