use super::traits::DurableStore;
use crate::primitives::{EventDelivery, Primitive, PrimitiveKind};
use crate::process::{AgentDefinition, ProcessRecord};
use crate::window::ArchivedConversation;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

const STORE_SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS conclave_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const STORE_SCHEMA_VERSION_KEY: &str = "store_schema_version";
const STORE_SCHEMA_VERSION: u32 = 1;

async fn ensure_store_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(STORE_SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create conclave_schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM conclave_schema_meta WHERE key = $1")
            .bind(STORE_SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load store schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid store schema version value: {value}"))?;
        anyhow::ensure!(
            parsed == STORE_SCHEMA_VERSION,
            "incompatible store schema version: stored={parsed}, expected={STORE_SCHEMA_VERSION}. \
remove the database and restart."
        );
        return Ok(());
    }

    sqlx::query("INSERT INTO conclave_schema_meta (key, value) VALUES ($1, $2)")
        .bind(STORE_SCHEMA_VERSION_KEY)
        .bind(STORE_SCHEMA_VERSION.to_string())
        .execute(pool)
        .await
        .context("persist store schema version")?;

    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("serialize row body")
}

/// Fixed-width timestamps so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).context("deserialize row body")
}

/// SQLite-backed [`DurableStore`]. Rows keep their full value as a JSON body
/// next to the columns queries filter on.
pub struct SqliteDurableStore {
    pool: SqlitePool,
}

impl SqliteDurableStore {
    /// Create a store over an existing pool and run migrations.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        ensure_store_schema_version(&pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS primitives (
                 kind TEXT NOT NULL,
                 id TEXT NOT NULL,
                 type_id TEXT NOT NULL,
                 status TEXT,
                 priority INTEGER NOT NULL DEFAULT 0,
                 created_at TEXT NOT NULL,
                 body TEXT NOT NULL,
                 PRIMARY KEY (kind, id)
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_primitives_type
                 ON primitives(kind, type_id, status, created_at)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_deliveries (
                 event_id TEXT NOT NULL,
                 subscriber_process_id TEXT NOT NULL,
                 event_type TEXT NOT NULL,
                 completed INTEGER NOT NULL DEFAULT 0,
                 delivered_at TEXT NOT NULL,
                 body TEXT NOT NULL,
                 PRIMARY KEY (event_id, subscriber_process_id)
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_definitions (
                 name TEXT PRIMARY KEY,
                 body TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS processes (
                 process_id TEXT PRIMARY KEY,
                 agent_id TEXT NOT NULL,
                 body TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversation_archives (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 process_id TEXT NOT NULL,
                 archived_at TEXT NOT NULL,
                 body TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file.
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .with_context(|| format!("invalid database path {path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("open database {path}"))?;
        Self::new(pool).await
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl DurableStore for SqliteDurableStore {
    fn save_primitive<'a>(&'a self, primitive: &'a Primitive) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = encode(primitive)?;
            sqlx::query(
                "INSERT INTO primitives (kind, id, type_id, status, priority, created_at, body)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT(kind, id) DO UPDATE SET
                     status = excluded.status,
                     priority = excluded.priority,
                     body = excluded.body",
            )
            .bind(primitive.kind().as_ref())
            .bind(primitive.id())
            .bind(primitive.type_id())
            .bind(primitive.status().map(|s| s.to_string()))
            .bind(primitive.priority())
            .bind(timestamp(primitive.created_at()))
            .bind(&body)
            .execute(&self.pool)
            .await
            .context("upsert primitive")?;
            Ok(())
        })
    }

    fn load_primitive<'a>(
        &'a self,
        kind: PrimitiveKind,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Primitive>>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT body FROM primitives WHERE kind = $1 AND id = $2")
                    .bind(kind.as_ref())
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .context("query primitive by id")?;
            row.map(|(body,)| decode(&body)).transpose()
        })
    }

    fn list_primitives<'a>(
        &'a self,
        kind: PrimitiveKind,
        type_id: &'a str,
        outstanding_only: bool,
    ) -> BoxFuture<'a, Result<Vec<Primitive>>> {
        Box::pin(async move {
            let rows = if outstanding_only {
                sqlx::query(
                    "SELECT body FROM primitives
                     WHERE kind = $1 AND type_id = $2
                       AND (status IS NULL OR status IN ('pending', 'in_progress'))
                     ORDER BY created_at ASC, id ASC",
                )
                .bind(kind.as_ref())
                .bind(type_id)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query(
                    "SELECT body FROM primitives
                     WHERE kind = $1 AND type_id = $2
                     ORDER BY created_at ASC, id ASC",
                )
                .bind(kind.as_ref())
                .bind(type_id)
                .fetch_all(&self.pool)
                .await?
            };

            rows.iter()
                .map(|row| {
                    let body: String = row.try_get("body")?;
                    decode(&body)
                })
                .collect()
        })
    }

    fn save_delivery<'a>(&'a self, delivery: &'a EventDelivery) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = encode(delivery)?;
            sqlx::query(
                "INSERT INTO event_deliveries
                     (event_id, subscriber_process_id, event_type, completed, delivered_at, body)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT(event_id, subscriber_process_id) DO UPDATE SET
                     completed = excluded.completed,
                     body = excluded.body",
            )
            .bind(&delivery.event_id)
            .bind(&delivery.subscriber_process_id)
            .bind(&delivery.event_type)
            .bind(delivery.completed)
            .bind(timestamp(delivery.delivered_at))
            .bind(&body)
            .execute(&self.pool)
            .await
            .context("upsert event delivery")?;
            Ok(())
        })
    }

    fn list_deliveries<'a>(
        &'a self,
        subscriber_process_id: &'a str,
        pending_only: bool,
    ) -> BoxFuture<'a, Result<Vec<EventDelivery>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT body FROM event_deliveries
                 WHERE subscriber_process_id = $1 AND ($2 = 0 OR completed = 0)
                 ORDER BY delivered_at ASC, event_id ASC",
            )
            .bind(subscriber_process_id)
            .bind(pending_only)
            .fetch_all(&self.pool)
            .await
            .context("query event deliveries")?;

            rows.iter()
                .map(|row| {
                    let body: String = row.try_get("body")?;
                    decode(&body)
                })
                .collect()
        })
    }

    fn save_agent_definition<'a>(
        &'a self,
        definition: &'a AgentDefinition,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = encode(definition)?;
            sqlx::query(
                "INSERT INTO agent_definitions (name, body, updated_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT(name) DO UPDATE SET
                     body = excluded.body,
                     updated_at = excluded.updated_at",
            )
            .bind(&definition.name)
            .bind(&body)
            .bind(timestamp(Utc::now()))
            .execute(&self.pool)
            .await
            .context("upsert agent definition")?;
            Ok(())
        })
    }

    fn load_agent_definition<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<AgentDefinition>>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT body FROM agent_definitions WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .context("query agent definition")?;
            row.map(|(body,)| decode(&body)).transpose()
        })
    }

    fn save_process<'a>(&'a self, record: &'a ProcessRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = encode(record)?;
            sqlx::query(
                "INSERT INTO processes (process_id, agent_id, body, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT(process_id) DO UPDATE SET
                     body = excluded.body,
                     updated_at = excluded.updated_at",
            )
            .bind(&record.process_id)
            .bind(&record.agent_id)
            .bind(&body)
            .bind(timestamp(record.updated_at))
            .execute(&self.pool)
            .await
            .context("upsert process record")?;
            Ok(())
        })
    }

    fn load_process<'a>(
        &'a self,
        process_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessRecord>>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT body FROM processes WHERE process_id = $1")
                    .bind(process_id)
                    .fetch_optional(&self.pool)
                    .await
                    .context("query process record")?;
            row.map(|(body,)| decode(&body)).transpose()
        })
    }

    fn archive_conversation<'a>(
        &'a self,
        archive: &'a ArchivedConversation,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = encode(archive)?;
            sqlx::query(
                "INSERT INTO conversation_archives (process_id, archived_at, body)
                 VALUES ($1, $2, $3)",
            )
            .bind(&archive.process_id)
            .bind(timestamp(archive.archived_at))
            .bind(&body)
            .execute(&self.pool)
            .await
            .context("insert conversation archive")?;
            Ok(())
        })
    }

    fn load_archives<'a>(
        &'a self,
        process_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ArchivedConversation>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT body FROM conversation_archives
                 WHERE process_id = $1
                 ORDER BY seq ASC",
            )
            .bind(process_id)
            .fetch_all(&self.pool)
            .await
            .context("query conversation archives")?;

            rows.iter()
                .map(|row| {
                    let body: String = row.try_get("body")?;
                    decode(&body)
                })
                .collect()
        })
    }
}
