//! Exercises the real DDL and insert paths against a live Postgres server.
//! Skipped locally/in CI when `WALT_TEST_PG_HOST` isn't set, mirroring the
//! DB-backed scenario tests in the rest of the workspace.

use walt_config::PostgresConfig;
use walt_result::{Pattern, ProbeResult, ResultKind};
use walt_storage::{teardown_database, PostgresSink, ResultSink};

fn test_config() -> Option<PostgresConfig> {
    let host = std::env::var("WALT_TEST_PG_HOST").ok()?;
    Some(PostgresConfig {
        host,
        port: std::env::var("WALT_TEST_PG_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5432),
        user: std::env::var("WALT_TEST_PG_USER").unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("WALT_TEST_PG_PASSWORD").unwrap_or_default(),
        dbname: std::env::var("WALT_TEST_PG_DBNAME").unwrap_or_else(|_| "walt_scenario_test".to_string()),
    })
}

#[tokio::test]
async fn setup_then_save_then_teardown_round_trips() -> anyhow::Result<()> {
    let Some(cfg) = test_config() else {
        eprintln!("SKIP: WALT_TEST_DATABASE_URL not set");
        return Ok(());
    };

    walt_storage::setup_database(&cfg).await?;

    let sink = PostgresSink::new(cfg.clone());
    sink.connect().await?;

    let ok = ProbeResult::success("https://example.com", 0.25, 200, Pattern::Found);
    sink.save(&ok).await?;

    let failed = ProbeResult::failure(ResultKind::TimeoutError, "https://example.com/slow");
    sink.save(&failed).await?;

    sink.disconnect().await;
    teardown_database(&cfg).await?;
    Ok(())
}
