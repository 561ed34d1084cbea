//! Game storage
//!
//! Records are written with an upsert keyed on `game_id`. Every data column
//! is overwritten from the incoming record, including with `NULL`, so the
//! stored row always equals the last record applied and redelivered messages
//! are harmless.

use async_trait::async_trait;
use nfl_common::GameRecord;
use sqlx::error::ErrorKind;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};

/// Columns rewritten on conflict, in bind order after `game_id`
pub const MUTABLE_COLUMNS: [&str; 26] = [
    "game_date",
    "away_team",
    "away_score",
    "home_team",
    "home_score",
    "away_spread_open",
    "away_spread_open_odds",
    "away_spread_close",
    "away_spread_close_odds",
    "away_moneyline_open",
    "away_moneyline_close",
    "home_spread_open",
    "home_spread_open_odds",
    "home_spread_close",
    "home_spread_close_odds",
    "home_moneyline_open",
    "home_moneyline_close",
    "over_open",
    "over_open_odds",
    "over_close",
    "over_close_odds",
    "under_open",
    "under_open_odds",
    "under_close",
    "under_close_odds",
    "processed_at",
];

const UPSERT_SQL: &str = r#"
    INSERT INTO games (
        game_id, game_date, away_team, away_score, home_team, home_score,
        away_spread_open, away_spread_open_odds, away_spread_close, away_spread_close_odds,
        away_moneyline_open, away_moneyline_close,
        home_spread_open, home_spread_open_odds, home_spread_close, home_spread_close_odds,
        home_moneyline_open, home_moneyline_close,
        over_open, over_open_odds, over_close, over_close_odds,
        under_open, under_open_odds, under_close, under_close_odds,
        processed_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6,
        $7, $8, $9, $10,
        $11, $12,
        $13, $14, $15, $16,
        $17, $18,
        $19, $20, $21, $22,
        $23, $24, $25, $26,
        $27
    )
    ON CONFLICT (game_id) DO UPDATE SET
        game_date = EXCLUDED.game_date,
        away_team = EXCLUDED.away_team,
        away_score = EXCLUDED.away_score,
        home_team = EXCLUDED.home_team,
        home_score = EXCLUDED.home_score,
        away_spread_open = EXCLUDED.away_spread_open,
        away_spread_open_odds = EXCLUDED.away_spread_open_odds,
        away_spread_close = EXCLUDED.away_spread_close,
        away_spread_close_odds = EXCLUDED.away_spread_close_odds,
        away_moneyline_open = EXCLUDED.away_moneyline_open,
        away_moneyline_close = EXCLUDED.away_moneyline_close,
        home_spread_open = EXCLUDED.home_spread_open,
        home_spread_open_odds = EXCLUDED.home_spread_open_odds,
        home_spread_close = EXCLUDED.home_spread_close,
        home_spread_close_odds = EXCLUDED.home_spread_close_odds,
        home_moneyline_open = EXCLUDED.home_moneyline_open,
        home_moneyline_close = EXCLUDED.home_moneyline_close,
        over_open = EXCLUDED.over_open,
        over_open_odds = EXCLUDED.over_open_odds,
        over_close = EXCLUDED.over_close,
        over_close_odds = EXCLUDED.over_close_odds,
        under_open = EXCLUDED.under_open,
        under_open_odds = EXCLUDED.under_open_odds,
        under_close = EXCLUDED.under_close,
        under_close_odds = EXCLUDED.under_close_odds,
        processed_at = EXCLUDED.processed_at,
        updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

/// Whether an upsert created the row or overwrote an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The row violates a table constraint; retrying the same record cannot help
    #[error("Integrity error storing game {game_id}: {source}")]
    Integrity {
        game_id: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error storing game {game_id}: {source}")]
    Database {
        game_id: i64,
        #[source]
        source: sqlx::Error,
    },
}

impl StorageError {
    fn classify(game_id: i64, source: sqlx::Error) -> Self {
        let integrity = match &source {
            sqlx::Error::Database(db_err) => matches!(
                db_err.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ),
            _ => false,
        };

        if integrity {
            Self::Integrity { game_id, source }
        } else {
            Self::Database { game_id, source }
        }
    }

    pub fn game_id(&self) -> i64 {
        match self {
            Self::Integrity { game_id, .. } | Self::Database { game_id, .. } => *game_id,
        }
    }
}

/// Durable home for game records
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Insert or fully overwrite the row for `record.game_id`; returns after commit
    async fn upsert(&self, record: &GameRecord) -> Result<UpsertOutcome, StorageError>;
}

/// [`GameStore`] over the `games` table
#[derive(Debug, Clone)]
pub struct PgGameStore {
    pool: PgPool,
}

impl PgGameStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameStore for PgGameStore {
    async fn upsert(&self, record: &GameRecord) -> Result<UpsertOutcome, StorageError> {
        let game_id = record.game_id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::classify(game_id, e))?;

        let result = sqlx::query_scalar::<_, bool>(UPSERT_SQL)
            .bind(record.game_id)
            .bind(record.game_date)
            .bind(&record.away_team)
            .bind(record.away_score)
            .bind(&record.home_team)
            .bind(record.home_score)
            .bind(record.away_spread_open)
            .bind(record.away_spread_open_odds)
            .bind(record.away_spread_close)
            .bind(record.away_spread_close_odds)
            .bind(record.away_moneyline_open)
            .bind(record.away_moneyline_close)
            .bind(record.home_spread_open)
            .bind(record.home_spread_open_odds)
            .bind(record.home_spread_close)
            .bind(record.home_spread_close_odds)
            .bind(record.home_moneyline_open)
            .bind(record.home_moneyline_close)
            .bind(record.over_open)
            .bind(record.over_open_odds)
            .bind(record.over_close)
            .bind(record.over_close_odds)
            .bind(record.under_open)
            .bind(record.under_open_odds)
            .bind(record.under_close)
            .bind(record.under_close_odds)
            .bind(record.processed_at)
            .fetch_one(&mut *tx)
            .await;

        let inserted = match result {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(game_id, error = %rollback, "Rollback failed");
                }
                return Err(StorageError::classify(game_id, e));
            },
        };

        tx.commit()
            .await
            .map_err(|e| StorageError::classify(game_id, e))?;

        let outcome = if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };
        debug!(game_id, ?outcome, "Upsert committed");
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_column_is_overwritten_on_conflict() {
        for column in MUTABLE_COLUMNS {
            let assignment = format!("{column} = EXCLUDED.{column}");
            assert!(UPSERT_SQL.contains(&assignment), "missing assignment for {column}");
        }
        assert!(UPSERT_SQL.contains("updated_at = NOW()"));
    }

    #[test]
    fn test_placeholder_count_matches_columns() {
        // game_id plus every mutable column
        let expected = MUTABLE_COLUMNS.len() + 1;
        assert!(UPSERT_SQL.contains(&format!("${expected}")));
        assert!(!UPSERT_SQL.contains(&format!("${}", expected + 1)));
    }

    #[test]
    fn test_non_database_errors_are_not_integrity() {
        let err = StorageError::classify(7, sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::Database { game_id: 7, .. }));
        assert_eq!(err.game_id(), 7);
    }
}
