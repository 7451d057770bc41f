use anyhow::Result;
use sqlx::SqlitePool;

/// Core schema. Collection tables and `view_<uuid>` views are created per
/// view by [`crate::views`].
///
/// `PipeRules.ResourceID` is the rule resource owning a link, or 0 for links
/// made through the rules API. `TriggerPlanPipes.ExchangeDigest` is the
/// digest of the flattened pipe named by the plan's exchange.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS Pipes (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        Name TEXT NOT NULL,
        Digest TEXT NOT NULL,
        Spec TEXT NOT NULL CHECK (json_valid(Spec)),
        Disabled BOOLEAN NOT NULL DEFAULT FALSE,
        UNIQUE (Name, Digest)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Views (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        UUID TEXT NOT NULL UNIQUE,
        Digest TEXT NOT NULL,
        Spec TEXT NOT NULL CHECK (json_valid(Spec))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS TriggerRules (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        Hostname TEXT NOT NULL DEFAULT '',
        URLPattern TEXT NOT NULL DEFAULT '',
        AlwaysTrigger BOOLEAN NOT NULL DEFAULT FALSE,
        UNIQUE (Hostname, URLPattern, AlwaysTrigger)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS PipeRules (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        PipeID INTEGER NOT NULL REFERENCES Pipes (ID),
        RuleID INTEGER NOT NULL REFERENCES TriggerRules (ID),
        ResourceID INTEGER NOT NULL DEFAULT 0,
        UNIQUE (PipeID, RuleID, ResourceID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ViewPipes (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        ViewID INTEGER NOT NULL REFERENCES Views (ID),
        PipeID INTEGER NOT NULL REFERENCES Pipes (ID),
        UNIQUE (ViewID, PipeID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Resources (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        APIVersion TEXT NOT NULL,
        Kind TEXT NOT NULL CHECK (Kind IN ('pipe', 'view', 'rule')),
        Name TEXT NOT NULL,
        Version TEXT NOT NULL,
        Description TEXT,
        Spec TEXT NOT NULL CHECK (json_valid(Spec)),
        PipeID INTEGER REFERENCES Pipes (ID),
        ViewID INTEGER REFERENCES Views (ID),
        RuleID INTEGER REFERENCES TriggerRules (ID),
        UNIQUE (Name, Version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ResourceLabels (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        ResourceID INTEGER NOT NULL REFERENCES Resources (ID) ON DELETE CASCADE,
        Label TEXT NOT NULL,
        UNIQUE (ResourceID, Label)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS TriggerPlans (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        UUID TEXT NOT NULL UNIQUE,
        Plan TEXT NOT NULL CHECK (json_valid(Plan)),
        Finished BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS TriggerPlanPipes (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        PlanID INTEGER NOT NULL REFERENCES TriggerPlans (ID) ON DELETE CASCADE,
        PipeID INTEGER NOT NULL REFERENCES Pipes (ID),
        ExchangeDigest TEXT NOT NULL,
        UNIQUE (PlanID, PipeID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS TriggerEvents (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        Timestamp TEXT NOT NULL,
        URL TEXT NOT NULL,
        PlanID INTEGER REFERENCES TriggerPlans (ID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS TriggerResults (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        EventID INTEGER NOT NULL REFERENCES TriggerEvents (ID),
        PipeID INTEGER NOT NULL REFERENCES Pipes (ID),
        Result,
        UNIQUE (EventID, PipeID)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pipes_name ON Pipes (Name)",
    "CREATE INDEX IF NOT EXISTS idx_trigger_rules_hostname ON TriggerRules (Hostname)",
    "CREATE INDEX IF NOT EXISTS idx_pipe_rules_rule ON PipeRules (RuleID)",
    "CREATE INDEX IF NOT EXISTS idx_view_pipes_pipe ON ViewPipes (PipeID)",
    "CREATE INDEX IF NOT EXISTS idx_trigger_results_event ON TriggerResults (EventID)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = db::connect_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('Pipes', 'Views', 'TriggerRules', 'PipeRules', 'ViewPipes', 'Resources', \
              'ResourceLabels', 'TriggerPlans', 'TriggerPlanPipes', 'TriggerEvents', 'TriggerResults')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 11);
    }
}
