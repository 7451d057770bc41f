//! In-memory resource index.
//!
//! The primary map is keyed by qualified [`NameDigest`]; a secondary map
//! lists the digests indexed under each name, which is what name-only
//! references are resolved against. Per-kind maps give typed access to
//! pipes, views, and rules.
//!
//! The index is built single-threaded during load and read-only while
//! serving; mutation happens on clones.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::action::ActionKind;
use crate::error::{Error, Result};
use crate::identity::NameDigest;
use crate::pipe::Pipe;
use crate::resource::{Kind, Resource, Spec};
use crate::rule::Rule;
use crate::topo::{DepGraph, TopoIter};
use crate::view::View;

#[derive(Debug, Clone, Default)]
pub struct Index {
    resources: BTreeMap<NameDigest, Resource>,
    names: BTreeMap<String, BTreeSet<NameDigest>>,
    pipes: BTreeMap<NameDigest, Pipe>,
    views: BTreeMap<NameDigest, View>,
    rules: BTreeMap<NameDigest, Rule>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Validate and index `resource`, returning its key.
    ///
    /// Re-adding an identical resource is a no-op. Adding different
    /// content under an existing `name@digest` is `already exists`.
    pub fn add(&mut self, resource: Resource) -> Result<NameDigest> {
        resource.validate()?;
        let nd = resource.key()?;
        if let Some(existing) = self.resources.get(&nd) {
            if *existing == resource {
                return Ok(nd);
            }
            return Err(Error::AlreadyExists(format!(
                "{} {} is already indexed with different metadata",
                resource.kind(),
                nd
            )));
        }
        match &resource.spec {
            Spec::Pipe(p) => {
                self.pipes.insert(nd.clone(), p.clone());
            }
            Spec::View(v) => {
                self.views.insert(nd.clone(), v.clone());
            }
            Spec::Rule(r) => {
                self.rules.insert(nd.clone(), r.clone());
            }
        }
        self.names
            .entry(nd.name().to_string())
            .or_default()
            .insert(nd.clone());
        debug!(kind = %resource.kind(), key = %nd, "indexed resource");
        self.resources.insert(nd.clone(), resource);
        Ok(nd)
    }

    pub fn remove(&mut self, nd: &NameDigest) -> Option<Resource> {
        let resource = self.resources.remove(nd)?;
        self.pipes.remove(nd);
        self.views.remove(nd);
        self.rules.remove(nd);
        if let Some(set) = self.names.get_mut(nd.name()) {
            set.remove(nd);
            if set.is_empty() {
                self.names.remove(nd.name());
            }
        }
        Some(resource)
    }

    pub fn get(&self, nd: &NameDigest) -> Option<&Resource> {
        self.resources.get(nd)
    }

    pub fn has(&self, nd: &NameDigest) -> bool {
        self.resources.contains_key(nd)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn get_pipe(&self, nd: &NameDigest) -> Option<&Pipe> {
        self.pipes.get(nd)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NameDigest, &Resource)> {
        self.resources.iter()
    }

    pub fn pipes(&self) -> impl Iterator<Item = (&NameDigest, &Pipe)> {
        self.pipes.iter()
    }

    pub fn views(&self) -> impl Iterator<Item = (&NameDigest, &View)> {
        self.views.iter()
    }

    pub fn rules(&self) -> impl Iterator<Item = (&NameDigest, &Rule)> {
        self.rules.iter()
    }

    /// Keys indexed under `name`, of any kind.
    pub fn digests(&self, name: &str) -> impl Iterator<Item = &NameDigest> {
        self.names.get(name).into_iter().flatten()
    }

    /// The key indexed under `name`, only when exactly one is.
    pub fn get_unique(&self, name: &str) -> Option<NameDigest> {
        let mut it = self.digests(name);
        match (it.next(), it.next()) {
            (Some(nd), None) => Some(nd.clone()),
            _ => None,
        }
    }

    /// Resolve a pipe reference to an indexed pipe key.
    ///
    /// Qualified references must exist; unqualified ones must match
    /// exactly one pipe digest (`not found` or `ambiguous` otherwise).
    pub fn resolve_pipe(&self, nd: &NameDigest) -> Result<NameDigest> {
        if nd.is_qualified() {
            return if self.pipes.contains_key(nd) {
                Ok(nd.clone())
            } else {
                Err(Error::not_found(format!("pipe not found: {}", nd)))
            };
        }
        let candidates: Vec<&NameDigest> = self
            .digests(nd.name())
            .filter(|k| self.pipes.contains_key(*k))
            .collect();
        match candidates.as_slice() {
            [] => Err(Error::not_found(format!("pipe not found: {}", nd))),
            [only] => Ok((*only).clone()),
            many => Err(Error::Ambiguous {
                name: nd.name().to_string(),
                count: many.len(),
            }),
        }
    }

    /// The resource dependency graph. Unqualified references resolve
    /// through [`Index::resolve_pipe`]; unresolvable ones carry no edge.
    pub fn dep_graph(&self) -> DepGraph {
        self.resources
            .iter()
            .map(|(nd, r)| {
                let deps = r
                    .deps()
                    .iter()
                    .filter_map(|d| self.resolve_pipe(d).ok())
                    .collect();
                (nd.clone(), deps)
            })
            .collect()
    }

    /// Dependencies before dependents; ends with a cycle error if any.
    pub fn topo(&self) -> TopoIter {
        TopoIter::new(self.dep_graph())
    }

    /// A new index with every pipe and view reference digest-qualified.
    ///
    /// Resources are qualified bottom-up in topological order against the
    /// index being built. Qualifying a pipe can change its digest; explicit
    /// references to the old digest are rewritten to the new one.
    pub fn qualified(&self) -> Result<Index> {
        let mut out = Index::new();
        let mut renamed: HashMap<NameDigest, NameDigest> = HashMap::new();
        for item in self.topo() {
            let nd = item?;
            let Some(resource) = self.resources.get(&nd) else {
                continue;
            };
            let resource = rewrite_refs(resource, &renamed);
            let qualified = resource.qualify(&out)?;
            let new_nd = out.add(qualified)?;
            if new_nd != nd {
                renamed.insert(nd, new_nd);
            }
        }
        Ok(out)
    }

    /// Every pipe transitively referenced by `nd`, keyed by qualified
    /// identity. The references must already be qualified.
    pub fn referenced_pipes(&self, nd: &NameDigest) -> Result<HashMap<NameDigest, Pipe>> {
        let mut refs = HashMap::new();
        let mut stack: Vec<NameDigest> = match self.pipes.get(nd) {
            Some(p) => p.deps().collect(),
            None => return Err(Error::not_found(format!("pipe not found: {}", nd))),
        };
        while let Some(dep) = stack.pop() {
            if refs.contains_key(&dep) {
                continue;
            }
            let pipe = self
                .pipes
                .get(&dep)
                .ok_or_else(|| Error::not_found(format!("referenced pipe not found: {}", dep)))?;
            stack.extend(pipe.deps());
            refs.insert(dep, pipe.clone());
        }
        Ok(refs)
    }

    pub fn kind_of(&self, nd: &NameDigest) -> Option<Kind> {
        self.resources.get(nd).map(Resource::kind)
    }
}

fn rewrite_refs(resource: &Resource, renamed: &HashMap<NameDigest, NameDigest>) -> Resource {
    let mut r = resource.clone();
    if renamed.is_empty() {
        return r;
    }
    match &mut r.spec {
        Spec::Pipe(p) => {
            for action in p.actions.iter_mut().filter(|a| a.is(ActionKind::Pipe)) {
                if let Some(new_nd) = action.reference().ok().and_then(|nd| renamed.get(&nd)) {
                    if let Some(d) = new_nd.digest() {
                        action.set("digest", d);
                    }
                }
            }
        }
        Spec::View(v) => {
            for col in v.columns.iter_mut() {
                if let Some(new_nd) = renamed.get(&col.pipe) {
                    col.pipe = new_nd.clone();
                }
            }
        }
        Spec::Rule(rule) => {
            for nd in rule.pipes.iter_mut() {
                if let Some(new_nd) = renamed.get(nd) {
                    *nd = new_nd.clone();
                }
            }
        }
    }
    r
}
