//! Execution plans and the shared-prefix action trie they are emitted from.
//!
//! Each flattened pipe is inserted as `actions ++ [exchange]`. Children are
//! keyed by the digest of the single action, so two pipes that agree on a
//! prefix share the prefix's nodes. Emission walks the trie breadth-first,
//! visiting children in digest order; the resulting [`Plan`] depends only on
//! the set of inserted paths.
//!
//! ```text
//! [A, B, C1, X1]          A (1, root)
//! [A, B, C2, X2]   ==>    └─ B (2)
//!                            ├─ C1 (3) ── X1 (5)
//!                            └─ C2 (4) ── X2 (6)
//! ```

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionKind};
use crate::error::{Error, Result};
use crate::identity::NameDigest;

/// One step of a plan. `input` is the 1-based index of the parent step, or
/// 0 for steps that start from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub input: usize,
    pub action: Action,
}

/// Wire form of a plan. `roots` and `exchanges` are 1-based step indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub roots: Vec<usize>,
    #[serde(default)]
    pub exchanges: Vec<usize>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// The step at 1-based index `i`.
    pub fn step(&self, i: usize) -> Option<&PlanStep> {
        i.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    /// Pipes the plan exchanges results for, in exchange order.
    pub fn exchange_targets(&self) -> Result<Vec<NameDigest>> {
        self.exchanges
            .iter()
            .map(|i| {
                self.step(*i)
                    .ok_or_else(|| Error::invalid(format!("exchange index out of range: {}", i)))?
                    .action
                    .reference()
            })
            .collect()
    }

    /// Check the structural invariants a client relies on.
    pub fn validate(&self) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            if step.input > i {
                return Err(Error::invalid(format!(
                    "step {} reads from step {} which is not emitted before it",
                    i + 1,
                    step.input
                )));
            }
        }
        for r in &self.roots {
            match self.step(*r) {
                Some(s) if s.input == 0 => {}
                _ => return Err(Error::invalid(format!("root {} is not a root step", r))),
            }
        }
        for x in &self.exchanges {
            match self.step(*x) {
                Some(s) if s.action.is(ActionKind::Exchange) => {}
                _ => return Err(Error::invalid(format!("exchange {} is not an exchange step", x))),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Node {
    action: Option<Action>,
    children: BTreeMap<String, usize>,
}

/// Arena trie of actions. Node 0 is the document sentinel.
#[derive(Debug)]
pub struct PlanGraph {
    nodes: Vec<Node>,
}

impl Default for PlanGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    /// Number of steps the plan will have.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk `actions` from the sentinel, adding nodes where no child with
    /// the same action digest exists yet.
    pub fn insert(&mut self, actions: &[Action]) -> Result<()> {
        let mut at = 0;
        for action in actions {
            let key = action.digest()?;
            at = match self.nodes[at].children.get(&key) {
                Some(child) => *child,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(Node {
                        action: Some(action.clone()),
                        children: BTreeMap::new(),
                    });
                    self.nodes[at].children.insert(key, id);
                    id
                }
            };
        }
        Ok(())
    }

    pub fn build(&self) -> Plan {
        let mut plan = Plan::default();
        let mut queue: VecDeque<(usize, usize)> = self.nodes[0]
            .children
            .values()
            .map(|child| (*child, 0))
            .collect();
        while let Some((id, input)) = queue.pop_front() {
            let node = &self.nodes[id];
            let Some(action) = &node.action else {
                continue;
            };
            plan.steps.push(PlanStep {
                input,
                action: action.clone(),
            });
            let index = plan.steps.len();
            if input == 0 {
                plan.roots.push(index);
            }
            if node.children.is_empty() && action.is(ActionKind::Exchange) {
                plan.exchanges.push(index);
            }
            queue.extend(node.children.values().map(|child| (*child, index)));
        }
        plan
    }
}
