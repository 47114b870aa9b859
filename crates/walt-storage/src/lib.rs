//! Result persistence: a console sink for local runs and a Postgres sink
//! for the consumer side of the pipeline.
//!
//! Schema and DDL mirror the original project's `queries.py` almost
//! verbatim: two tables, `result` for successful probes and `error` for
//! failed ones, each with a Postgres enum column and a btree index on `url`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, PgPool};
use tokio::sync::RwLock;
use walt_config::PostgresConfig;
use walt_result::{Pattern, ProbeResult, ResultKind};

pub mod queries {
    pub const DROP_TABLES_SQL: &str = r#"
DROP TABLE IF EXISTS result;
DROP TYPE IF EXISTS pattern_type;
DROP TABLE IF EXISTS error;
DROP TYPE IF EXISTS error_type;
"#;

    pub const CREATE_TABLES_SQL: &str = r#"
CREATE TYPE pattern_type AS ENUM ('FOUND', 'NO_PATTERN', 'NOT_FOUND', 'IRRELEVANT');

CREATE TABLE IF NOT EXISTS result (
    result_id INT GENERATED ALWAYS AS IDENTITY,
    url VARCHAR NOT NULL,
    response_time decimal not null,
    status_code int not null,
    pattern pattern_type not null,
    timestamp timestamptz
);

CREATE INDEX result_url_index ON result(url ASC NULLS LAST);

CREATE TYPE error_type AS ENUM ('CLIENT_ERROR', 'TIMEOUT_ERROR', 'ERROR');

CREATE TABLE IF NOT EXISTS error (
    error_id INT GENERATED ALWAYS AS IDENTITY,
    url VARCHAR NOT NULL,
    error error_type not null,
    timestamp timestamptz
);

CREATE INDEX error_url_index ON error(url ASC NULLS LAST);
"#;
}

/// Where a [`ProbeResult`] is written once the Consumer has decoded it off
/// the wire. `connect`/`disconnect` default to no-ops so sinks that need no
/// session setup (the console sink) don't have to implement them.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, result: &ProbeResult) -> Result<()>;

    async fn disconnect(&self) {}
}

/// Prints results to stdout. Used when no Postgres sink is configured, or
/// in local/manual runs.
pub struct ConsoleSink;

#[async_trait]
impl ResultSink for ConsoleSink {
    async fn save(&self, result: &ProbeResult) -> Result<()> {
        println!("Got a result: {result:?}");
        Ok(())
    }
}

/// Postgres-backed sink. Routes successful probes into `result` and
/// failures into `error`, matching the two-table split in the DDL above.
///
/// The pool lives behind a lock so `connect`/`disconnect` can be `&self`
/// methods on the shared trait rather than consuming/rebuilding the sink;
/// `save` before `connect` logs and returns rather than erroring, matching
/// the "log and skip" error policy used for every other message-loop fault.
pub struct PostgresSink {
    config: PostgresConfig,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresSink {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config, pool: RwLock::new(None) }
    }
}

#[async_trait]
impl ResultSink for PostgresSink {
    async fn connect(&self) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(connect_options(&self.config))
            .await
            .context("failed to connect to Postgres")?;
        *self.pool.write().await = Some(pool);
        Ok(())
    }

    async fn save(&self, result: &ProbeResult) -> Result<()> {
        let guard = self.pool.read().await;
        let Some(pool) = guard.as_ref() else {
            tracing::error!("save() called before connect(); dropping result for {}", result.url);
            return Ok(());
        };

        if result.result_type.is_success() {
            tracing::debug!("inserting result row for {}", result.url);
            sqlx::query(
                "INSERT INTO result (url, response_time, status_code, pattern, timestamp) \
                 VALUES ($1, $2, $3, $4::pattern_type, to_timestamp($5::double precision / 1000.0))",
            )
            .bind(&result.url)
            .bind(result.response_time)
            .bind(result.status_code as i32)
            .bind(pattern_label(result.pattern))
            .bind(result.utc_timestamp_ms)
            .execute(pool)
            .await
            .context("failed to insert result row")?;
        } else {
            tracing::debug!("inserting error row for {}", result.url);
            sqlx::query(
                "INSERT INTO error (url, error, timestamp) \
                 VALUES ($1, $2::error_type, to_timestamp($3::double precision / 1000.0))",
            )
            .bind(&result.url)
            .bind(error_label(result.result_type))
            .bind(result.utc_timestamp_ms)
            .execute(pool)
            .await
            .context("failed to insert error row")?;
        }
        Ok(())
    }

    /// Closes the pool and waits for in-flight work to drain.
    async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }
}

fn pattern_label(pattern: Pattern) -> &'static str {
    match pattern {
        Pattern::Found => "FOUND",
        Pattern::NoPattern => "NO_PATTERN",
        Pattern::NotFound => "NOT_FOUND",
        Pattern::Irrelevant => "IRRELEVANT",
    }
}

fn error_label(kind: ResultKind) -> &'static str {
    match kind {
        ResultKind::ClientError => "CLIENT_ERROR",
        ResultKind::TimeoutError => "TIMEOUT_ERROR",
        ResultKind::Error => "ERROR",
        ResultKind::Result => unreachable!("error_label called on a successful ResultKind"),
    }
}

fn connect_options(cfg: &PostgresConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.dbname)
}

/// Creates `cfg.dbname` and its tables. Connects first to the server's
/// default `postgres` maintenance database, issues `CREATE DATABASE`
/// outside of any transaction, then reconnects to the new database to run
/// [`queries::CREATE_TABLES_SQL`].
pub async fn setup_database(cfg: &PostgresConfig) -> Result<()> {
    let maintenance = connect_options(cfg).database("postgres");
    let mut conn = maintenance.connect().await.context("failed to connect for database setup")?;
    tracing::info!("Creating database {}", cfg.dbname);
    sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&cfg.dbname)))
        .execute(&mut conn)
        .await
        .context("failed to create database")?;
    conn.close().await.ok();

    let mut conn = connect_options(cfg)
        .connect()
        .await
        .context("failed to connect to the new database")?;
    tracing::info!("Creating tables on {}", cfg.dbname);
    exec_statements(&mut conn, queries::CREATE_TABLES_SQL).await.context("failed to create tables")?;
    conn.close().await.ok();
    Ok(())
}

/// Drops `cfg.dbname`'s tables and then the database itself, in that order
/// so the maintenance connection never sees a half-torn-down schema.
pub async fn teardown_database(cfg: &PostgresConfig) -> Result<()> {
    let mut conn = connect_options(cfg)
        .connect()
        .await
        .context("failed to connect to the target database")?;
    tracing::info!("Dropping tables from {}", cfg.dbname);
    exec_statements(&mut conn, queries::DROP_TABLES_SQL).await.context("failed to drop tables")?;
    conn.close().await.ok();

    let maintenance = connect_options(cfg).database("postgres");
    let mut conn = maintenance
        .connect()
        .await
        .context("failed to connect for database teardown")?;
    tracing::info!("Dropping database {}", cfg.dbname);
    sqlx::query(&format!("DROP DATABASE {}", quote_ident(&cfg.dbname)))
        .execute(&mut conn)
        .await
        .context("failed to drop database")?;
    conn.close().await.ok();
    Ok(())
}

/// Runs each `;`-separated statement in `script` in turn. `sqlx` has no
/// multi-statement `execute`, so the static DDL blocks are split on plain
/// semicolons; none of our DDL contains a semicolon inside a string or
/// identifier.
async fn exec_statements(conn: &mut sqlx::PgConnection, script: &str) -> Result<()> {
    for statement in script.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Quotes `name` as a Postgres identifier, doubling embedded quotes. The
/// database name comes from local config, not untrusted input, but this
/// keeps `CREATE DATABASE`/`DROP DATABASE` honest about special characters.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
