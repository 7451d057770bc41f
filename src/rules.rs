//! Trigger rule persistence.
//!
//! A `TriggerRules` row is one predicate (hostname, URL pattern, always).
//! Rules with the same predicate share the row. Each `PipeRules` link is
//! owned by the rule resource that made it, or by the rules API, so
//! removing one rule never unlinks a pipe another rule still attaches.

use sqlx::SqliteConnection;
use tracing::info;

use nuggit_core::resource::Resource;
use nuggit_core::rule::Rule;
use nuggit_core::{Error, Result};

use crate::sqlite_store::{dependency_index, pipe_id, SqliteStore};

/// Owner of links made through the rules API rather than a rule resource.
pub(crate) const API_OWNER: i64 = 0;

/// Validate, qualify, and store `rule`. Returns the qualified rule.
pub async fn create_rule(store: &SqliteStore, rule: Rule) -> Result<Rule> {
    let rule = rule.normalized();
    rule.validate()?;
    let mut tx = store.pool().begin().await?;
    let rule = qualify_rule(&mut tx, rule).await?;
    let rule_id = insert_predicate(&mut tx, &rule).await?;
    link_pipes(&mut tx, rule_id, &rule, API_OWNER).await?;
    tx.commit().await?;
    info!(
        hostname = rule.hostname.as_deref().unwrap_or_default(),
        pattern = rule.url_pattern.as_deref().unwrap_or_default(),
        pipes = rule.pipes.len(),
        "created rule"
    );
    Ok(rule)
}

/// Unlink `rule`'s pipes from its predicate. Links owned by rule resources
/// are left alone; the predicate row is removed once nothing uses it.
pub async fn delete_rule(store: &SqliteStore, rule: Rule) -> Result<()> {
    let rule = rule.normalized();
    let mut tx = store.pool().begin().await?;
    let rule = qualify_rule(&mut tx, rule).await?;
    let rule_id = find_rule(&mut tx, &rule)
        .await?
        .ok_or_else(|| Error::not_found("no rule with this predicate"))?;
    let mut unlinked = 0;
    for nd in &rule.pipes {
        let id = pipe_id(&mut tx, nd).await?;
        unlinked += sqlx::query(
            "DELETE FROM PipeRules WHERE PipeID = ? AND RuleID = ? AND ResourceID = ?",
        )
        .bind(id)
        .bind(rule_id)
        .bind(API_OWNER)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    if unlinked == 0 {
        return Err(Error::not_found(
            "none of these pipes are linked to this predicate through the rules API",
        ));
    }
    prune_rule(&mut tx, rule_id).await?;
    tx.commit().await?;
    info!(rule_id, unlinked, "deleted rule");
    Ok(())
}

async fn qualify_rule(conn: &mut SqliteConnection, rule: Rule) -> Result<Rule> {
    let resource = Resource::rule("rule", rule);
    let deps = dependency_index(conn, &resource).await?;
    let qualified = resource.qualify(&deps)?;
    qualified
        .as_rule()
        .cloned()
        .ok_or_else(|| Error::internal("qualified rule changed kind"))
}

fn predicate(rule: &Rule) -> (&str, &str, bool) {
    (
        rule.hostname.as_deref().unwrap_or_default(),
        rule.url_pattern.as_deref().unwrap_or_default(),
        rule.always_trigger,
    )
}

pub(crate) async fn find_rule(conn: &mut SqliteConnection, rule: &Rule) -> Result<Option<i64>> {
    let (hostname, pattern, always) = predicate(rule);
    Ok(sqlx::query_scalar(
        "SELECT ID FROM TriggerRules WHERE Hostname = ? AND URLPattern = ? AND AlwaysTrigger = ?",
    )
    .bind(hostname)
    .bind(pattern)
    .bind(always)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Get or create the predicate row for `rule`.
pub(crate) async fn insert_predicate(conn: &mut SqliteConnection, rule: &Rule) -> Result<i64> {
    let (hostname, pattern, always) = predicate(rule);
    sqlx::query(
        "INSERT INTO TriggerRules (Hostname, URLPattern, AlwaysTrigger) VALUES (?, ?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(hostname)
    .bind(pattern)
    .bind(always)
    .execute(&mut *conn)
    .await?;
    find_rule(conn, rule)
        .await?
        .ok_or_else(|| Error::internal("rule row missing after insert"))
}

/// Link `rule`'s qualified pipes to the predicate on behalf of `owner`.
pub(crate) async fn link_pipes(
    conn: &mut SqliteConnection,
    rule_id: i64,
    rule: &Rule,
    owner: i64,
) -> Result<()> {
    for nd in &rule.pipes {
        let id = pipe_id(conn, nd).await?;
        sqlx::query(
            "INSERT INTO PipeRules (PipeID, RuleID, ResourceID) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(rule_id)
        .bind(owner)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Drop the links a rule resource owns, then the predicate if it is unused.
pub(crate) async fn unlink_owner(
    conn: &mut SqliteConnection,
    rule_id: i64,
    owner: i64,
) -> Result<()> {
    sqlx::query("DELETE FROM PipeRules WHERE RuleID = ? AND ResourceID = ?")
        .bind(rule_id)
        .bind(owner)
        .execute(&mut *conn)
        .await?;
    prune_rule(conn, rule_id).await
}

async fn prune_rule(conn: &mut SqliteConnection, rule_id: i64) -> Result<()> {
    sqlx::query(
        "DELETE FROM TriggerRules WHERE ID = ? \
         AND NOT EXISTS (SELECT 1 FROM PipeRules WHERE RuleID = ?) \
         AND NOT EXISTS (SELECT 1 FROM Resources WHERE RuleID = ?)",
    )
    .bind(rule_id)
    .bind(rule_id)
    .bind(rule_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
