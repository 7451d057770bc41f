//! Result exchange: a client reports the values its plan produced.
//!
//! Each report becomes one `TriggerEvents` row with a `TriggerResults` row
//! per pipe, plus one row in every collection the report fills. The plan is
//! marked finished in the same transaction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use nuggit_core::pipe::Pipe;
use nuggit_core::point::Point;
use nuggit_core::sql::{self, PipeResult};
use nuggit_core::{Error, NameDigest, Result};

use crate::sqlite_store::{bind_arg, bind_args, SqliteStore};
use crate::views;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub uuid: Uuid,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub results: Vec<PipeResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub event_id: i64,
    pub results: usize,
    pub rows: u64,
}

struct Planned {
    id: i64,
    name: NameDigest,
    point: Point,
}

/// Store one client report against the plan `req.uuid`.
///
/// Each result names a planned pipe by its stored `name@digest` or by the
/// identity of its exchange action.
pub async fn exchange(store: &SqliteStore, req: &ExchangeRequest) -> Result<ExchangeResponse> {
    let mut tx = store.pool().begin().await?;

    let plan_id: i64 = sqlx::query_scalar("SELECT ID FROM TriggerPlans WHERE UUID = ?")
        .bind(req.uuid.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("plan not found: {}", req.uuid)))?;

    let rows = sqlx::query(
        "SELECT p.ID, p.Name, p.Digest, p.Spec, tp.ExchangeDigest FROM TriggerPlanPipes tp \
         JOIN Pipes p ON p.ID = tp.PipeID WHERE tp.PlanID = ?",
    )
    .bind(plan_id)
    .fetch_all(&mut *tx)
    .await?;
    let mut planned = Vec::with_capacity(rows.len());
    // Results may name a pipe by its stored identity or by the flattened
    // identity its exchange carries.
    let mut by_name: HashMap<NameDigest, Vec<usize>> = HashMap::new();
    for row in rows {
        let spec: String = row.try_get("Spec")?;
        let pipe: Pipe = serde_json::from_str(&spec)?;
        let name: String = row.try_get("Name")?;
        let nd = NameDigest::with_digest(name.clone(), row.try_get::<String, _>("Digest")?);
        let exchange =
            NameDigest::with_digest(name, row.try_get::<String, _>("ExchangeDigest")?);
        let i = planned.len();
        by_name.entry(nd.clone()).or_default().push(i);
        if exchange != nd {
            by_name.entry(exchange).or_default().push(i);
        }
        planned.push(Planned {
            id: row.try_get("ID")?,
            name: nd,
            point: pipe.point,
        });
    }

    let event_id: i64 = sqlx::query_scalar(
        "INSERT INTO TriggerEvents (Timestamp, URL, PlanID) VALUES (?, ?, ?) RETURNING ID",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(&req.url)
    .bind(plan_id)
    .fetch_one(&mut *tx)
    .await?;

    // Results keyed by stored identity, for the collection rows.
    let mut stored: HashMap<NameDigest, Value> = HashMap::new();
    for result in &req.results {
        let targets = by_name.get(&result.pipe).ok_or_else(|| {
            Error::invalid(format!("pipe {} is not part of plan {}", result.pipe, req.uuid))
        })?;
        for &i in targets {
            let target = &planned[i];
            let arg = sql::sql_arg(&target.point, &result.result)?;
            let query = sqlx::query(
                "INSERT INTO TriggerResults (EventID, PipeID, Result) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(event_id)
            .bind(target.id);
            bind_arg(query, &arg).execute(&mut *tx).await?;
            stored.insert(target.name.clone(), result.result.clone());
        }
    }
    let results: Vec<PipeResult> = stored
        .into_iter()
        .map(|(pipe, result)| PipeResult { pipe, result })
        .collect();

    let mut inserted = 0;
    for collection in views::collections(&mut tx).await? {
        if !results.iter().any(|r| collection.covers(&r.pipe)) {
            continue;
        }
        if let Some(stmt) = sql::insert_row(&collection, &results)? {
            let done = bind_args(sqlx::query(&stmt.sql), &stmt.args)
                .execute(&mut *tx)
                .await?;
            inserted += done.rows_affected();
        }
    }

    sqlx::query("UPDATE TriggerPlans SET Finished = TRUE WHERE UUID = ?")
        .bind(req.uuid.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(
        plan = %req.uuid,
        event_id,
        results = req.results.len(),
        rows = inserted,
        "stored exchange"
    );
    Ok(ExchangeResponse {
        event_id,
        results: req.results.len(),
        rows: inserted,
    })
}
