//! View persistence: the `Views` row, its `ViewPipes` links, the backing
//! collection table, and the `view_<uuid>` SQL view.

use std::collections::HashMap;

use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqliteConnection, TypeInfo, ValueRef};
use tracing::info;
use uuid::Uuid;

use nuggit_core::point::Point;
use nuggit_core::resource::Resource;
use nuggit_core::sql::{self, Collection};
use nuggit_core::view::View;
use nuggit_core::{Error, NameDigest, Result};

use crate::sqlite_store::{dependency_index, load_pipe, pipe_id, SqliteStore};

#[derive(Debug, Clone, Serialize)]
pub struct StoredView {
    pub uuid: Uuid,
    pub digest: String,
    pub view: View,
}

/// Validate, qualify, and store `view` under a new UUID.
pub async fn create_view(store: &SqliteStore, view: View) -> Result<StoredView> {
    view.validate()?;
    let mut tx = store.pool().begin().await?;
    let view = qualify_view(&mut tx, view).await?;
    let (_, stored) = insert_view(&mut tx, &view).await?;
    tx.commit().await?;
    Ok(stored)
}

pub async fn get_view(store: &SqliteStore, uuid: &Uuid) -> Result<StoredView> {
    let row = sqlx::query("SELECT Digest, Spec FROM Views WHERE UUID = ?")
        .bind(uuid.to_string())
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| Error::not_found(format!("view not found: {}", uuid)))?;
    let spec: String = row.try_get("Spec")?;
    Ok(StoredView {
        uuid: *uuid,
        digest: row.try_get("Digest")?,
        view: serde_json::from_str(&spec)?,
    })
}

/// Every row of the view's SQL view, one JSON object per trigger event.
pub async fn view_rows(store: &SqliteStore, uuid: &Uuid) -> Result<Vec<Map<String, Value>>> {
    get_view(store, uuid).await?;
    let rows = sqlx::query(&format!("SELECT * FROM {}", sql::view_name(uuid)))
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(row_to_json).collect()
}

async fn qualify_view(conn: &mut SqliteConnection, view: View) -> Result<View> {
    let resource = Resource::view("view", view);
    let deps = dependency_index(conn, &resource).await?;
    resource
        .qualify(&deps)?
        .as_view()
        .cloned()
        .ok_or_else(|| Error::internal("qualified view changed kind"))
}

async fn points(conn: &mut SqliteConnection, view: &View) -> Result<HashMap<NameDigest, Point>> {
    let mut points = HashMap::new();
    for col in &view.columns {
        let pipe = load_pipe(conn, &col.pipe).await?;
        points.insert(col.pipe.clone(), pipe.point);
    }
    Ok(points)
}

/// Store a qualified view and create its collection table and SQL views.
pub(crate) async fn insert_view(conn: &mut SqliteConnection, view: &View) -> Result<(i64, StoredView)> {
    if let Some(alias) = &view.alias {
        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ? COLLATE NOCASE",
        )
        .bind(alias)
        .fetch_one(&mut *conn)
        .await?;
        if taken > 0 {
            return Err(Error::AlreadyExists(format!(
                "view alias is already in use: {}",
                alias
            )));
        }
    }
    let digest = view.digest()?;
    let uuid = Uuid::new_v4();
    let spec = serde_json::to_string(view).map_err(|e| Error::internal(e.to_string()))?;
    let view_id: i64 =
        sqlx::query_scalar("INSERT INTO Views (UUID, Digest, Spec) VALUES (?, ?, ?) RETURNING ID")
            .bind(uuid.to_string())
            .bind(&digest)
            .bind(&spec)
            .fetch_one(&mut *conn)
            .await?;
    for col in &view.columns {
        let id = pipe_id(conn, &col.pipe).await?;
        sqlx::query("INSERT INTO ViewPipes (ViewID, PipeID) VALUES (?, ?)")
            .bind(view_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    let points = points(conn, view).await?;
    let collection = Collection::for_view(&uuid, view, &digest, &points)?;
    sqlx::query(&sql::create_table(&collection))
        .execute(&mut *conn)
        .await?;
    for stmt in sql::create_view(&uuid, view, &points)? {
        sqlx::query(&stmt).execute(&mut *conn).await?;
    }
    info!(view = %uuid, table = %collection.table_name(), "created view");
    Ok((
        view_id,
        StoredView {
            uuid,
            digest,
            view: view.clone(),
        },
    ))
}

/// Remove a view and its SQL views. The collection table keeps its rows.
pub(crate) async fn delete_view(conn: &mut SqliteConnection, view_id: i64) -> Result<()> {
    let row = sqlx::query("SELECT UUID, Spec FROM Views WHERE ID = ?")
        .bind(view_id)
        .fetch_one(&mut *conn)
        .await?;
    let uuid: String = row.try_get("UUID")?;
    let uuid = Uuid::parse_str(&uuid).map_err(|e| Error::internal(e.to_string()))?;
    let spec: String = row.try_get("Spec")?;
    let view: View = serde_json::from_str(&spec)?;

    if let Some(alias) = &view.alias {
        if sql::is_sql_identifier(alias) {
            sqlx::query(&format!("DROP VIEW IF EXISTS {}", sql::quote_ident(alias)))
                .execute(&mut *conn)
                .await?;
        }
    }
    sqlx::query(&format!("DROP VIEW IF EXISTS {}", sql::view_name(&uuid)))
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM ViewPipes WHERE ViewID = ?")
        .bind(view_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM Views WHERE ID = ?")
        .bind(view_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Collections of every stored view.
pub(crate) async fn collections(conn: &mut SqliteConnection) -> Result<Vec<Collection>> {
    let rows = sqlx::query("SELECT UUID, Digest, Spec FROM Views ORDER BY ID")
        .fetch_all(&mut *conn)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let uuid: String = row.try_get("UUID")?;
        let uuid = Uuid::parse_str(&uuid).map_err(|e| Error::internal(e.to_string()))?;
        let digest: String = row.try_get("Digest")?;
        let spec: String = row.try_get("Spec")?;
        let view: View = serde_json::from_str(&spec)?;
        let points = points(conn, &view).await?;
        out.push(Collection::for_view(&uuid, &view, &digest, &points)?);
    }
    Ok(out)
}

fn row_to_json(row: &SqliteRow) -> Result<Map<String, Value>> {
    let mut obj = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => Value::from(row.try_get::<f64, _>(i)?),
                "BLOB" => Value::from(
                    base64::engine::general_purpose::STANDARD.encode(row.try_get::<Vec<u8>, _>(i)?),
                ),
                _ => Value::from(row.try_get::<String, _>(i)?),
            }
        };
        obj.insert(col.name().to_string(), value);
    }
    Ok(obj)
}
