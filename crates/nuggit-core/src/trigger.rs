//! Trigger coordination: URL in, persisted plan out.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::NameDigest;
use crate::pipe::Pipe;
use crate::plan::Plan;
use crate::planner::Planner;
use crate::store::Store;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub url: String,
    #[serde(default)]
    pub include_pipes: bool,
    #[serde(default = "default_true")]
    pub include_plan: bool,
}

impl TriggerRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            include_pipes: false,
            include_plan: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredPipe {
    pub name: NameDigest,
    pub pipe: Pipe,
}

/// Handle to the persisted plan; clients report results against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageOp {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipes: Option<Vec<TriggeredPipe>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub storage: StorageOp,
}

/// Plan everything that matches `req.url` and persist the plan.
///
/// Matched pipes are flattened against their referenced pipes before being
/// folded into the plan. Nothing is persisted when any step fails.
pub async fn implicit<S: Store + ?Sized>(store: &S, req: &TriggerRequest) -> Result<TriggerResponse> {
    let url = Url::parse(&req.url)
        .map_err(|e| Error::invalid(format!("invalid url {:?}: {}", req.url, e)))?;

    // Drain the scan before resolving references so it releases its
    // connection first.
    let matched: Vec<_> = store.scan_matched(&url).try_collect().await?;

    let mut planner = Planner::new();
    let mut triggered = Vec::with_capacity(matched.len());
    for (nd, pipe) in matched {
        debug!(pipe = %nd, url = %url, "rule matched");
        for (ref_nd, ref_pipe) in store.referenced_pipes(&nd).await? {
            planner.add_referenced_pipe(ref_nd, ref_pipe);
        }
        planner.add_pipe(nd.clone(), pipe.clone())?;
        triggered.push(TriggeredPipe { name: nd, pipe });
    }

    let plan = planner.build();
    let uuid = Uuid::new_v4();
    let planned = planner.planned();
    store.store_plan(&uuid, &plan, &planned).await?;
    info!(
        url = %url,
        plan = %uuid,
        pipes = planned.len(),
        steps = plan.steps.len(),
        "stored trigger plan"
    );

    Ok(TriggerResponse {
        pipes: req.include_pipes.then_some(triggered),
        plan: req.include_plan.then_some(plan),
        storage: StorageOp { uuid },
    })
}
