//! Resource persistence.
//!
//! A resource row records the envelope (kind, name, version, description,
//! labels) and points at the operational row it created: a pipe, a view, or
//! a rule predicate. Resources are identified by `name@version`, where the
//! version is the spec digest after qualification.

use serde::Serialize;
use serde_json::json;
use sqlx::{Row, SqliteConnection};
use tracing::info;

use nuggit_core::resource::{Kind, Resource, Spec};
use nuggit_core::{Error, NameDigest, Result};

use crate::rules;
use crate::sqlite_store::{dependency_index, insert_pipe, SqliteStore};
use crate::views;

#[derive(Debug, Clone, Serialize)]
pub struct StoredResource {
    pub id: NameDigest,
    pub resource: Resource,
}

struct ResourceRow {
    id: i64,
    key: NameDigest,
    kind: Kind,
    pipe_id: Option<i64>,
    view_id: Option<i64>,
    rule_id: Option<i64>,
}

/// Validate, qualify, and store `resource`.
///
/// Storing an identical resource again is a no-op; storing a different
/// envelope under an existing `name@version` is `already exists`.
pub async fn create_resource(store: &SqliteStore, resource: Resource) -> Result<NameDigest> {
    let mut tx = store.pool().begin().await?;
    let nd = insert_resource(&mut tx, resource).await?;
    tx.commit().await?;
    Ok(nd)
}

pub(crate) async fn insert_resource(conn: &mut SqliteConnection, resource: Resource) -> Result<NameDigest> {
    resource.validate()?;
    let deps = dependency_index(conn, &resource).await?;
    let resource = resource.qualify(&deps)?;
    let nd = resource.key()?;

    if let Some(row) = find_row(conn, &nd).await? {
        let existing = load_resource(conn, row.id).await?;
        if existing == resource {
            return Ok(nd);
        }
        return Err(Error::AlreadyExists(format!(
            "{} {} is already stored with different metadata",
            resource.kind(),
            nd
        )));
    }

    let (pipe_id, view_id, rule_id) = match &resource.spec {
        Spec::Pipe(p) => (Some(insert_pipe(conn, &nd, p).await?), None, None),
        Spec::View(v) => (None, Some(views::insert_view(conn, v).await?.0), None),
        Spec::Rule(r) => (None, None, Some(rules::insert_predicate(conn, r).await?)),
    };

    let resource_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO Resources (APIVersion, Kind, Name, Version, Description, Spec, PipeID, ViewID, RuleID)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING ID
        "#,
    )
    .bind(&resource.api_version)
    .bind(resource.kind().as_str())
    .bind(nd.name())
    .bind(nd.digest())
    .bind(&resource.metadata.description)
    .bind(spec_json(&resource.spec)?)
    .bind(pipe_id)
    .bind(view_id)
    .bind(rule_id)
    .fetch_one(&mut *conn)
    .await?;

    if let (Spec::Rule(r), Some(rule_id)) = (&resource.spec, rule_id) {
        rules::link_pipes(conn, rule_id, r, resource_id).await?;
    }
    for label in &resource.metadata.labels {
        sqlx::query("INSERT INTO ResourceLabels (ResourceID, Label) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(resource_id)
            .bind(label)
            .execute(&mut *conn)
            .await?;
    }
    info!(kind = %resource.kind(), id = %nd, "stored resource");
    Ok(nd)
}

pub async fn get_resource(store: &SqliteStore, nd: &NameDigest) -> Result<StoredResource> {
    let mut conn = store.pool().acquire().await?;
    let row = find_row(&mut conn, nd)
        .await?
        .ok_or_else(|| Error::not_found(format!("resource not found: {}", nd)))?;
    Ok(StoredResource {
        resource: load_resource(&mut conn, row.id).await?,
        id: row.key,
    })
}

pub async fn list_resources(store: &SqliteStore, kind: Option<Kind>) -> Result<Vec<StoredResource>> {
    let mut conn = store.pool().acquire().await?;
    let ids: Vec<i64> = match kind {
        Some(kind) => {
            sqlx::query_scalar("SELECT ID FROM Resources WHERE Kind = ? ORDER BY Name, Version")
                .bind(kind.as_str())
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT ID FROM Resources ORDER BY Name, Version")
                .fetch_all(&mut *conn)
                .await?
        }
    };
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let resource = load_resource(&mut conn, id).await?;
        out.push(StoredResource {
            id: resource.key()?,
            resource,
        });
    }
    Ok(out)
}

/// Delete a resource and the row it owns.
///
/// Pipes still used by a view, a rule, another pipe, or a stored trigger
/// plan are kept and the delete fails with `failed precondition`.
pub async fn delete_resource(store: &SqliteStore, nd: &NameDigest) -> Result<()> {
    let mut tx = store.pool().begin().await?;
    let row = find_row(&mut tx, nd)
        .await?
        .ok_or_else(|| Error::not_found(format!("resource not found: {}", nd)))?;
    let resource = load_resource(&mut tx, row.id).await?;

    if let Some(pipe_id) = row.pipe_id {
        check_pipe_unreferenced(&mut tx, pipe_id, &row.key).await?;
    }
    sqlx::query("DELETE FROM Resources WHERE ID = ?")
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

    match (&resource.spec, row.pipe_id, row.view_id) {
        (Spec::Pipe(_), Some(pipe_id), _) => {
            sqlx::query("DELETE FROM Pipes WHERE ID = ?")
                .bind(pipe_id)
                .execute(&mut *tx)
                .await?;
        }
        (Spec::View(_), _, Some(view_id)) => views::delete_view(&mut tx, view_id).await?,
        (Spec::Rule(_), _, _) => {
            if let Some(rule_id) = row.rule_id {
                rules::unlink_owner(&mut tx, rule_id, row.id).await?;
            }
        }
        _ => {}
    }
    tx.commit().await?;
    info!(kind = %row.kind, id = %row.key, "deleted resource");
    Ok(())
}

async fn check_pipe_unreferenced(conn: &mut SqliteConnection, pipe_id: i64, nd: &NameDigest) -> Result<()> {
    let views: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ViewPipes WHERE PipeID = ?")
        .bind(pipe_id)
        .fetch_one(&mut *conn)
        .await?;
    let rules: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM PipeRules WHERE PipeID = ?")
        .bind(pipe_id)
        .fetch_one(&mut *conn)
        .await?;
    let pipes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM Pipes p, json_each(p.Spec, '$.actions') a
        WHERE json_extract(a.value, '$.action') = 'pipe'
          AND json_extract(a.value, '$.name') = ?
          AND json_extract(a.value, '$.digest') = ?
        "#,
    )
    .bind(nd.name())
    .bind(nd.digest())
    .fetch_one(&mut *conn)
    .await?;
    let plans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM TriggerPlanPipes WHERE PipeID = ?")
        .bind(pipe_id)
        .fetch_one(&mut *conn)
        .await?;
    if plans > 0 {
        return Err(Error::precondition(format!(
            "pipe {} appears in {} trigger plan(s) and keeps its results; disable it instead",
            nd, plans
        )));
    }
    if views + rules + pipes > 0 {
        return Err(Error::precondition(format!(
            "pipe {} is still referenced by {} view(s), {} rule(s), and {} pipe(s)",
            nd, views, rules, pipes
        )));
    }
    Ok(())
}

/// Find a resource by `name@version`, or by name alone when exactly one
/// version is stored.
async fn find_row(conn: &mut SqliteConnection, nd: &NameDigest) -> Result<Option<ResourceRow>> {
    let rows = match nd.digest() {
        Some(d) => {
            sqlx::query("SELECT ID, Kind, Name, Version, PipeID, ViewID, RuleID FROM Resources WHERE Name = ? AND Version = ?")
                .bind(nd.name())
                .bind(d)
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            sqlx::query("SELECT ID, Kind, Name, Version, PipeID, ViewID, RuleID FROM Resources WHERE Name = ?")
                .bind(nd.name())
                .fetch_all(&mut *conn)
                .await?
        }
    };
    if rows.len() > 1 {
        return Err(Error::Ambiguous {
            name: nd.name().to_string(),
            count: rows.len(),
        });
    }
    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    let kind: String = row.try_get("Kind")?;
    Ok(Some(ResourceRow {
        id: row.try_get("ID")?,
        key: NameDigest::with_digest(
            row.try_get::<String, _>("Name")?,
            row.try_get::<String, _>("Version")?,
        ),
        kind: kind.parse()?,
        pipe_id: row.try_get("PipeID")?,
        view_id: row.try_get("ViewID")?,
        rule_id: row.try_get("RuleID")?,
    }))
}

async fn load_resource(conn: &mut SqliteConnection, id: i64) -> Result<Resource> {
    let row = sqlx::query("SELECT APIVersion, Kind, Name, Description, Spec FROM Resources WHERE ID = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    let labels: Vec<String> =
        sqlx::query_scalar("SELECT Label FROM ResourceLabels WHERE ResourceID = ? ORDER BY ID")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
    let spec: String = row.try_get("Spec")?;
    let spec: serde_json::Value = serde_json::from_str(&spec)?;
    let wire = json!({
        "api_version": row.try_get::<String, _>("APIVersion")?,
        "kind": row.try_get::<String, _>("Kind")?,
        "metadata": {
            "name": row.try_get::<String, _>("Name")?,
            "description": row.try_get::<Option<String>, _>("Description")?,
            "labels": labels,
        },
        "spec": spec,
    });
    let bytes = serde_json::to_vec(&wire).map_err(|e| Error::internal(e.to_string()))?;
    Resource::from_json(&bytes)
}

fn spec_json(spec: &Spec) -> Result<String> {
    let json = match spec {
        Spec::Pipe(p) => serde_json::to_string(p),
        Spec::View(v) => serde_json::to_string(v),
        Spec::Rule(r) => serde_json::to_string(r),
    };
    json.map_err(|e| Error::internal(e.to_string()))
}
