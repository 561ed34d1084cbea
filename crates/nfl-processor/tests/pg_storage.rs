//! Upsert tests against a real PostgreSQL
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test -p nfl-processor --test pg_storage -- --ignored --nocapture
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use nfl_common::config::DatabaseConfig;
use nfl_common::connector::Connect;
use nfl_common::record::{columns, parse_with_timestamp, RawRow};
use nfl_common::GameRecord;
use nfl_processor::db::{self, DatabaseConnector};
use nfl_processor::{GameStore, PgGameStore, StorageError, UpsertOutcome};
use sqlx::PgPool;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    async fn start() -> Self {
        let container = Postgres::default()
            .start()
            .await
            .expect("Failed to start PostgreSQL container");
        let host = container.get_host().await.expect("Failed to get container host");
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .expect("Failed to get container port");

        let config = DatabaseConfig {
            host: host.to_string(),
            port,
            name: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 1,
        };
        let pool = DatabaseConnector::new(config)
            .connect()
            .await
            .expect("Failed to connect to PostgreSQL");
        db::run_migrations(&pool).await.expect("Failed to run migrations");

        Self {
            _container: container,
            pool,
        }
    }
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,nfl_processor=debug,sqlx=warn")
        .with_test_writer()
        .try_init();
}

fn bills_at_jets() -> GameRecord {
    let row: RawRow = [
        (columns::GAME_ID, "5001"),
        (columns::DATE, "20230910"),
        (columns::AWAY_TEAM, "Bills"),
        (columns::AWAY_SCORE, "22"),
        (columns::HOME_TEAM, "Jets"),
        (columns::HOME_SCORE, "16"),
        (columns::AWAY_SPREAD_OPEN, "-2.5"),
        (columns::OVER_CLOSE, "45.5"),
    ]
    .into_iter()
    .collect();
    let processed_at = Utc.with_ymd_and_hms(2023, 9, 11, 12, 0, 0).unwrap();
    parse_with_timestamp(&row, processed_at).unwrap()
}

async fn count_games(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM games")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_inserts_then_updates() {
    init_test_tracing();
    let pg = TestPostgres::start().await;
    let store = PgGameStore::new(pg.pool.clone());
    let record = bills_at_jets();

    assert_eq!(store.upsert(&record).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(store.upsert(&record).await.unwrap(), UpsertOutcome::Updated);
    assert_eq!(count_games(&pg.pool).await, 1);

    let (away_team, away_score, spread, over_close, home_spread): (String, Option<i32>, Option<f64>, Option<f64>, Option<f64>) =
        sqlx::query_as(
            "SELECT away_team, away_score, away_spread_open::float8, over_close::float8, home_spread_open::float8
             FROM games WHERE game_id = $1",
        )
        .bind(5001_i64)
        .fetch_one(&pg.pool)
        .await
        .unwrap();

    assert_eq!(away_team, "Bills");
    assert_eq!(away_score, Some(22));
    assert_eq!(spread, Some(-2.5));
    assert_eq!(over_close, Some(45.5));
    assert_eq!(home_spread, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_overwrites_with_null() {
    init_test_tracing();
    let pg = TestPostgres::start().await;
    let store = PgGameStore::new(pg.pool.clone());

    let first = bills_at_jets();
    let mut second = first.clone();
    second.away_spread_open = None;
    second.processed_at = Utc.with_ymd_and_hms(2023, 9, 12, 8, 30, 0).unwrap();

    store.upsert(&first).await.unwrap();
    store.upsert(&second).await.unwrap();

    let (spread, processed_at): (Option<f64>, chrono::DateTime<Utc>) = sqlx::query_as(
        "SELECT away_spread_open::float8, processed_at FROM games WHERE game_id = $1",
    )
    .bind(5001_i64)
    .fetch_one(&pg.pool)
    .await
    .unwrap();

    assert_eq!(spread, None);
    assert_eq!(processed_at, second.processed_at);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_constraint_violation_is_integrity_error() {
    init_test_tracing();
    let pg = TestPostgres::start().await;
    let store = PgGameStore::new(pg.pool.clone());

    let mut record = bills_at_jets();
    record.game_id = -1;

    let err = store.upsert(&record).await.unwrap_err();
    assert!(matches!(err, StorageError::Integrity { game_id: -1, .. }));
    assert_eq!(count_games(&pg.pool).await, 0);

    // Rolled back cleanly; the pool's single connection is still usable
    store.upsert(&bills_at_jets()).await.unwrap();
    assert_eq!(count_games(&pg.pool).await, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_quarter_point_lines_stored_exactly() {
    init_test_tracing();
    let pg = TestPostgres::start().await;
    let store = PgGameStore::new(pg.pool.clone());

    let mut record = bills_at_jets();
    record.away_spread_open = Some(-2.25);
    record.under_close = Some(44.75);
    store.upsert(&record).await.unwrap();

    let (spread, under_close): (Option<f64>, Option<f64>) = sqlx::query_as(
        "SELECT away_spread_open::float8, under_close::float8 FROM games WHERE game_id = $1",
    )
    .bind(5001_i64)
    .fetch_one(&pg.pool)
    .await
    .unwrap();

    assert_eq!(spread, Some(-2.25));
    assert_eq!(under_close, Some(44.75));
}
