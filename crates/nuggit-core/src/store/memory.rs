//! In-memory [`Store`] over a qualified [`Index`].
//!
//! Rules are matched by scanning every indexed rule. Plans are kept in a
//! `HashMap` behind a `std::sync::RwLock`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::NameDigest;
use crate::index::Index;
use crate::pipe::Pipe;
use crate::plan::Plan;
use crate::planner::PlannedPipe;

use super::{MatchedPipe, Store};

#[derive(Debug, Clone)]
pub struct StoredPlan {
    pub plan: Plan,
    pub pipes: Vec<PlannedPipe>,
}

pub struct InMemoryStore {
    index: Index,
    disabled: RwLock<HashSet<NameDigest>>,
    plans: RwLock<HashMap<Uuid, StoredPlan>>,
}

impl InMemoryStore {
    /// Qualifies `index`; fails on ambiguous or missing references.
    pub fn new(index: &Index) -> Result<Self> {
        Ok(Self {
            index: index.qualified()?,
            disabled: RwLock::new(HashSet::new()),
            plans: RwLock::new(HashMap::new()),
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn set_disabled(&self, nd: &NameDigest, disabled: bool) -> Result<()> {
        if self.index.get_pipe(nd).is_none() {
            return Err(Error::not_found(format!("pipe not found: {}", nd)));
        }
        let mut set = self
            .disabled
            .write()
            .map_err(|_| Error::internal("disabled set lock poisoned"))?;
        if disabled {
            set.insert(nd.clone());
        } else {
            set.remove(nd);
        }
        Ok(())
    }

    pub fn plan(&self, uuid: &Uuid) -> Option<StoredPlan> {
        self.plans.read().ok()?.get(uuid).cloned()
    }

    fn matched(&self, url: &Url) -> Result<Vec<MatchedPipe>> {
        let disabled = self
            .disabled
            .read()
            .map_err(|_| Error::internal("disabled set lock poisoned"))?;
        let mut seen = BTreeSet::new();
        for (_, rule) in self.index.rules() {
            if !rule.matches(url) {
                continue;
            }
            seen.extend(rule.pipes.iter().filter(|nd| !disabled.contains(*nd)).cloned());
        }
        seen.into_iter()
            .map(|nd| {
                let pipe = self
                    .index
                    .get_pipe(&nd)
                    .cloned()
                    .ok_or_else(|| Error::not_found(format!("pipe not found: {}", nd)))?;
                Ok((nd, pipe))
            })
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn scan_matched<'a>(&'a self, url: &'a Url) -> BoxStream<'a, Result<MatchedPipe>> {
        match self.matched(url) {
            Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn referenced_pipes(&self, nd: &NameDigest) -> Result<HashMap<NameDigest, Pipe>> {
        self.index.referenced_pipes(nd)
    }

    async fn store_plan(&self, uuid: &Uuid, plan: &Plan, pipes: &[PlannedPipe]) -> Result<()> {
        let mut plans = self
            .plans
            .write()
            .map_err(|_| Error::internal("plan map lock poisoned"))?;
        plans.insert(
            *uuid,
            StoredPlan {
                plan: plan.clone(),
                pipes: pipes.to_vec(),
            },
        );
        Ok(())
    }
}
