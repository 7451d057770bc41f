//! SQLite-backed [`Store`] implementation and pipe operations.
//!
//! Rule matching runs [`MATCH_RULES_SQL`] for the URL's host and filters
//! URL patterns in Rust; compiled patterns are cached per store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use regex::Regex;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use nuggit_core::index::Index;
use nuggit_core::pipe::Pipe;
use nuggit_core::plan::Plan;
use nuggit_core::planner::PlannedPipe;
use nuggit_core::resource::Resource;
use nuggit_core::rule::matches_url;
use nuggit_core::sql::{SqlArg, MATCH_RULES_SQL};
use nuggit_core::store::{MatchedPipe, Store};
use nuggit_core::{Error, NameDigest, Result};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    patterns: Mutex<HashMap<String, Regex>>,
}

/// A stored pipe as listed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct PipeEntry {
    pub name: NameDigest,
    pub pipe: Pipe,
    pub disabled: bool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn pattern(&self, pattern: &str) -> Result<Option<Regex>> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let mut cache = self
            .patterns
            .lock()
            .map_err(|_| Error::internal("pattern cache lock poisoned"))?;
        if let Some(re) = cache.get(pattern) {
            return Ok(Some(re.clone()));
        }
        let re = Regex::new(pattern)
            .map_err(|e| Error::internal(format!("stored url pattern does not compile: {}", e)))?;
        cache.insert(pattern.to_string(), re.clone());
        Ok(Some(re))
    }

    /// One stored pipe with its disabled flag. `nd` may omit the digest when
    /// the name is unique.
    pub async fn get_pipe(&self, nd: &NameDigest) -> Result<PipeEntry> {
        let mut conn = self.pool.acquire().await?;
        let nd = resolve_pipe(&mut conn, nd).await?;
        let row = sqlx::query("SELECT Spec, Disabled FROM Pipes WHERE Name = ? AND Digest = ?")
            .bind(nd.name())
            .bind(nd.digest())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| Error::not_found(format!("pipe not found: {}", nd)))?;
        let spec: String = row.try_get("Spec")?;
        Ok(PipeEntry {
            name: nd,
            pipe: serde_json::from_str(&spec)?,
            disabled: row.try_get("Disabled")?,
        })
    }

    pub async fn list_pipes(&self) -> Result<Vec<PipeEntry>> {
        let rows = sqlx::query("SELECT Name, Digest, Spec, Disabled FROM Pipes ORDER BY Name, Digest")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let spec: String = row.try_get("Spec")?;
                Ok(PipeEntry {
                    name: NameDigest::with_digest(
                        row.try_get::<String, _>("Name")?,
                        row.try_get::<String, _>("Digest")?,
                    ),
                    pipe: serde_json::from_str(&spec)?,
                    disabled: row.try_get("Disabled")?,
                })
            })
            .collect()
    }

    pub async fn set_disabled(&self, nd: &NameDigest, disabled: bool) -> Result<NameDigest> {
        let mut conn = self.pool.acquire().await?;
        let nd = resolve_pipe(&mut conn, nd).await?;
        sqlx::query("UPDATE Pipes SET Disabled = ? WHERE Name = ? AND Digest = ?")
            .bind(disabled)
            .bind(nd.name())
            .bind(nd.digest())
            .execute(&mut *conn)
            .await?;
        debug!(pipe = %nd, disabled, "updated pipe");
        Ok(nd)
    }

    /// The stored plan and whether a client has reported its results.
    pub async fn get_plan(&self, uuid: &Uuid) -> Result<(Plan, bool)> {
        let row = sqlx::query("SELECT Plan, Finished FROM TriggerPlans WHERE UUID = ?")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("plan not found: {}", uuid)))?;
        let plan: String = row.try_get("Plan")?;
        Ok((serde_json::from_str(&plan)?, row.try_get("Finished")?))
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn scan_matched<'a>(&'a self, url: &'a Url) -> BoxStream<'a, Result<MatchedPipe>> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        Box::pin(try_stream! {
            let mut seen = HashSet::new();
            let mut rows = sqlx::query(MATCH_RULES_SQL).bind(host).fetch(&self.pool);
            while let Some(row) = rows.try_next().await.map_err(Error::from)? {
                let always: bool = row.try_get("AlwaysTrigger").map_err(Error::from)?;
                let hostname: String = row.try_get("Hostname").map_err(Error::from)?;
                let pattern: String = row.try_get("URLPattern").map_err(Error::from)?;
                let re = self.pattern(&pattern)?;
                if !matches_url(always, Some(hostname.as_str()), re.as_ref(), url) {
                    continue;
                }
                let nd = NameDigest::with_digest(
                    row.try_get::<String, _>("Name").map_err(Error::from)?,
                    row.try_get::<String, _>("Digest").map_err(Error::from)?,
                );
                if !seen.insert(nd.clone()) {
                    continue;
                }
                let spec: String = row.try_get("Spec").map_err(Error::from)?;
                let pipe: Pipe = serde_json::from_str(&spec).map_err(Error::from)?;
                yield (nd, pipe);
            }
        })
    }

    async fn referenced_pipes(&self, nd: &NameDigest) -> Result<HashMap<NameDigest, Pipe>> {
        let mut conn = self.pool.acquire().await?;
        let root = load_pipe(&mut conn, nd).await?;
        let mut refs = HashMap::new();
        let mut stack: Vec<NameDigest> = root.deps().collect();
        while let Some(dep) = stack.pop() {
            if refs.contains_key(&dep) {
                continue;
            }
            let pipe = load_pipe(&mut conn, &dep).await?;
            stack.extend(pipe.deps());
            refs.insert(dep, pipe);
        }
        Ok(refs)
    }

    async fn store_plan(&self, uuid: &Uuid, plan: &Plan, pipes: &[PlannedPipe]) -> Result<()> {
        let plan_json = serde_json::to_string(plan).map_err(|e| Error::internal(e.to_string()))?;
        let mut tx = self.pool.begin().await?;
        let plan_id: i64 =
            sqlx::query_scalar("INSERT INTO TriggerPlans (UUID, Plan) VALUES (?, ?) RETURNING ID")
                .bind(uuid.to_string())
                .bind(&plan_json)
                .fetch_one(&mut *tx)
                .await?;
        for planned in pipes {
            let id = pipe_id(&mut *tx, &planned.name).await?;
            sqlx::query(
                "INSERT INTO TriggerPlanPipes (PlanID, PipeID, ExchangeDigest) VALUES (?, ?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(plan_id)
            .bind(id)
            .bind(planned.exchange.digest())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Resolve a pipe reference against the `Pipes` table.
pub(crate) async fn resolve_pipe(conn: &mut SqliteConnection, nd: &NameDigest) -> Result<NameDigest> {
    if nd.is_qualified() {
        pipe_id(conn, nd).await?;
        return Ok(nd.clone());
    }
    let digests: Vec<String> = sqlx::query_scalar("SELECT Digest FROM Pipes WHERE Name = ?")
        .bind(nd.name())
        .fetch_all(&mut *conn)
        .await?;
    match digests.as_slice() {
        [] => Err(Error::not_found(format!("pipe not found: {}", nd))),
        [only] => Ok(nd.qualify(only.clone())),
        many => Err(Error::Ambiguous {
            name: nd.name().to_string(),
            count: many.len(),
        }),
    }
}

pub(crate) async fn pipe_id(conn: &mut SqliteConnection, nd: &NameDigest) -> Result<i64> {
    sqlx::query_scalar("SELECT ID FROM Pipes WHERE Name = ? AND Digest = ?")
        .bind(nd.name())
        .bind(nd.digest())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::not_found(format!("pipe not found: {}", nd)))
}

pub(crate) async fn load_pipe(conn: &mut SqliteConnection, nd: &NameDigest) -> Result<Pipe> {
    let spec: String = sqlx::query_scalar("SELECT Spec FROM Pipes WHERE Name = ? AND Digest = ?")
        .bind(nd.name())
        .bind(nd.digest())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::not_found(format!("pipe not found: {}", nd)))?;
    Ok(serde_json::from_str(&spec)?)
}

/// Insert a qualified pipe, returning its row ID. Re-inserting the same
/// identity is a no-op.
pub(crate) async fn insert_pipe(conn: &mut SqliteConnection, nd: &NameDigest, pipe: &Pipe) -> Result<i64> {
    let spec = serde_json::to_string(pipe).map_err(|e| Error::internal(e.to_string()))?;
    sqlx::query("INSERT INTO Pipes (Name, Digest, Spec) VALUES (?, ?, ?) ON CONFLICT (Name, Digest) DO NOTHING")
        .bind(nd.name())
        .bind(nd.digest())
        .bind(&spec)
        .execute(&mut *conn)
        .await?;
    pipe_id(conn, nd).await
}

/// An [`Index`] holding every stored pipe named by `resource`'s references,
/// for qualifying it with [`Resource::qualify`].
pub(crate) async fn dependency_index(conn: &mut SqliteConnection, resource: &Resource) -> Result<Index> {
    let names: BTreeSet<String> = resource.deps().iter().map(|d| d.name().to_string()).collect();
    let mut index = Index::new();
    for name in names {
        let rows = sqlx::query("SELECT Digest, Spec FROM Pipes WHERE Name = ?")
            .bind(&name)
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            let spec: String = row.try_get("Spec")?;
            let digest: String = row.try_get("Digest")?;
            let pipe: Pipe = serde_json::from_str(&spec)?;
            let nd = index.add(Resource::pipe(&name, pipe))?;
            if nd.digest() != Some(digest.as_str()) {
                return Err(Error::internal(format!(
                    "stored pipe {}@{} does not match its spec digest",
                    name, digest
                )));
            }
        }
    }
    Ok(index)
}

pub(crate) fn bind_args<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &'q [SqlArg],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Null => query.bind(None::<String>),
            SqlArg::Bytes(b) => query.bind(b.as_slice()),
            SqlArg::Text(s) => query.bind(s.as_str()),
            SqlArg::Bool(b) => query.bind(*b),
            SqlArg::Int(i) => query.bind(*i),
            SqlArg::Float(f) => query.bind(*f),
        };
    }
    query
}

pub(crate) fn bind_arg<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    arg: &'q SqlArg,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    bind_args(query, std::slice::from_ref(arg))
}
