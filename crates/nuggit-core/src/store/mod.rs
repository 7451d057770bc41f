//! Storage abstraction for trigger planning.
//!
//! The [`Store`] trait covers what a trigger needs: matching pipes for a
//! URL, resolving the pipes they reference, and persisting the resulting
//! plan. The SQLite implementation lives in the `nuggit` crate; the
//! [`memory::InMemoryStore`] here serves tests and directory-only runs.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use url::Url;
use uuid::Uuid;

use crate::error::Result;
use crate::identity::NameDigest;
use crate::pipe::Pipe;
use crate::plan::Plan;
use crate::planner::PlannedPipe;

/// A rule-matched pipe.
pub type MatchedPipe = (NameDigest, Pipe);

#[async_trait]
pub trait Store: Send + Sync {
    /// Lazily yield every enabled pipe attached to a rule matching `url`.
    /// Each identity is yielded at most once per scan.
    fn scan_matched<'a>(&'a self, url: &'a Url) -> BoxStream<'a, Result<MatchedPipe>>;

    /// All pipes transitively referenced by the pipe `nd`.
    async fn referenced_pipes(&self, nd: &NameDigest) -> Result<HashMap<NameDigest, Pipe>>;

    /// Persist `plan` and the pipes it was built from as one unit.
    async fn store_plan(&self, uuid: &Uuid, plan: &Plan, pipes: &[PlannedPipe]) -> Result<()>;
}
