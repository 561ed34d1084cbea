//! Game record codec
//!
//! Turns one CSV row (a column-name to text mapping) into a validated
//! [`GameRecord`], or rejects it with a [`Rejected`] describing why.
//!
//! Parsing is pure: no I/O, no logging. Callers decide how to report a
//! rejection and always continue with the next row.
//!
//! # Field rules
//!
//! - Required: `Game ID` (positive integer), `Date` (`YYYYMMDD`), `Away Team`, `Home Team`
//! - Optional integers and decimals use trim-then-parse; empty, whitespace-only or
//!   unparseable text becomes `None`, never zero
//!
//! # Example
//!
//! ```
//! use nfl_common::record::{parse, RawRow};
//!
//! let row: RawRow = [
//!     ("Game ID", "5001"),
//!     ("Date", "20230910"),
//!     ("Away Team", "Bills"),
//!     ("Home Team", "Jets"),
//!     ("Away Score", "22"),
//!     ("Home Score", " "),
//! ]
//! .into_iter()
//! .collect();
//!
//! let record = parse(&row).unwrap();
//! assert_eq!(record.game_id, 5001);
//! assert_eq!(record.away_score, Some(22));
//! assert_eq!(record.home_score, None);
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Source column names in the input file
pub mod columns {
    pub const GAME_ID: &str = "Game ID";
    pub const DATE: &str = "Date";
    pub const AWAY_TEAM: &str = "Away Team";
    pub const AWAY_SCORE: &str = "Away Score";
    pub const HOME_TEAM: &str = "Home Team";
    pub const HOME_SCORE: &str = "Home Score";

    pub const AWAY_SPREAD_OPEN: &str = "Away Spread Open";
    pub const AWAY_SPREAD_OPEN_ODDS: &str = "Away Spread Open Odds";
    pub const AWAY_SPREAD_CLOSE: &str = "Away Spread Close";
    pub const AWAY_SPREAD_CLOSE_ODDS: &str = "Away Spread Close Odds";
    pub const AWAY_MONEYLINE_OPEN: &str = "Away MoneyLine Open";
    pub const AWAY_MONEYLINE_CLOSE: &str = "Away MoneyLine Close";

    pub const HOME_SPREAD_OPEN: &str = "Home Spread Open";
    pub const HOME_SPREAD_OPEN_ODDS: &str = "Home Spread Open Odds";
    pub const HOME_SPREAD_CLOSE: &str = "Home Spread Close";
    pub const HOME_SPREAD_CLOSE_ODDS: &str = "Home Spread Close Odds";
    pub const HOME_MONEYLINE_OPEN: &str = "Home MoneyLine Open";
    pub const HOME_MONEYLINE_CLOSE: &str = "Home MoneyLine Close";

    pub const OVER_OPEN: &str = "Over Open";
    pub const OVER_OPEN_ODDS: &str = "Over Open Odds";
    pub const OVER_CLOSE: &str = "Over Close";
    pub const OVER_CLOSE_ODDS: &str = "Over Close Odds";
    pub const UNDER_OPEN: &str = "Under Open";
    pub const UNDER_OPEN_ODDS: &str = "Under Open Odds";
    pub const UNDER_CLOSE: &str = "Under Close";
    pub const UNDER_CLOSE_ODDS: &str = "Under Close Odds";

    /// Columns that must be present and non-blank before any parsing happens
    pub const REQUIRED: [&str; 4] = [GAME_ID, DATE, AWAY_TEAM, HOME_TEAM];
}

/// Placeholder identifier used in diagnostics when a row has no `Game ID`
pub const UNKNOWN_ROW_ID: &str = "Unknown";

/// One input row: column name to raw text value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(HashMap<String, String>);

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value for a column, if the column exists
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    /// The raw `Game ID` text, used to identify the row in diagnostics
    pub fn row_id(&self) -> String {
        match self.get(columns::GAME_ID) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => UNKNOWN_ROW_ID.to_string(),
        }
    }

    fn int(&self, column: &str) -> Option<i32> {
        self.get(column).and_then(parse_optional_int)
    }

    fn decimal(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(parse_optional_decimal)
    }
}

impl From<HashMap<String, String>> for RawRow {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A validated NFL game with its betting-market lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub away_team: String,
    pub away_score: Option<i32>,
    pub home_team: String,
    pub home_score: Option<i32>,

    // Away team betting data
    pub away_spread_open: Option<f64>,
    pub away_spread_open_odds: Option<i32>,
    pub away_spread_close: Option<f64>,
    pub away_spread_close_odds: Option<i32>,
    pub away_moneyline_open: Option<i32>,
    pub away_moneyline_close: Option<i32>,

    // Home team betting data
    pub home_spread_open: Option<f64>,
    pub home_spread_open_odds: Option<i32>,
    pub home_spread_close: Option<f64>,
    pub home_spread_close_odds: Option<i32>,
    pub home_moneyline_open: Option<i32>,
    pub home_moneyline_close: Option<i32>,

    // Over/under data
    pub over_open: Option<f64>,
    pub over_open_odds: Option<i32>,
    pub over_close: Option<f64>,
    pub over_close_odds: Option<i32>,
    pub under_open: Option<f64>,
    pub under_open_odds: Option<i32>,
    pub under_close: Option<f64>,
    pub under_close_odds: Option<i32>,

    /// When the record was built from its source row
    pub processed_at: DateTime<Utc>,
}

impl GameRecord {
    /// Human-readable `"Away @ Home"` label for log events
    pub fn matchup(&self) -> String {
        format!("{} @ {}", self.away_team, self.home_team)
    }

    /// Check the record-level invariants
    ///
    /// Records built by [`parse`] always pass; this exists for records that
    /// arrive from elsewhere (e.g. decoded off the queue).
    pub fn validate(&self) -> std::result::Result<(), RejectReason> {
        if self.game_id <= 0 {
            return Err(RejectReason::InvalidGameId);
        }
        if self.away_team.trim().is_empty() || self.home_team.trim().is_empty() {
            return Err(RejectReason::EmptyTeamName);
        }
        Ok(())
    }
}

/// Why a row was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("game id is not a positive integer")]
    InvalidGameId,

    #[error("date is not a valid YYYYMMDD calendar date")]
    InvalidDate,

    #[error("team name is empty")]
    EmptyTeamName,
}

/// A rejected row, identified by its raw `Game ID` for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row_id} rejected: {reason}")]
pub struct Rejected {
    pub row_id: String,
    pub reason: RejectReason,
}

impl Rejected {
    fn new(row: &RawRow, reason: RejectReason) -> Self {
        Self {
            row_id: row.row_id(),
            reason,
        }
    }
}

/// Parse a row into a [`GameRecord`], stamping it with the current time
pub fn parse(row: &RawRow) -> std::result::Result<GameRecord, Rejected> {
    parse_with_timestamp(row, Utc::now())
}

/// Parse a row into a [`GameRecord`] with an explicit `processed_at`
pub fn parse_with_timestamp(
    row: &RawRow,
    processed_at: DateTime<Utc>,
) -> std::result::Result<GameRecord, Rejected> {
    // Cheap reject before touching any numeric field
    for column in columns::REQUIRED {
        let present = row.get(column).is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(Rejected::new(row, RejectReason::MissingField(column)));
        }
    }

    let game_id = row.get(columns::GAME_ID).and_then(parse_game_id);
    let game_date = row.get(columns::DATE).and_then(parse_game_date);
    let away_team = row.get(columns::AWAY_TEAM).unwrap_or_default().trim().to_string();
    let home_team = row.get(columns::HOME_TEAM).unwrap_or_default().trim().to_string();

    let Some(game_id) = game_id else {
        return Err(Rejected::new(row, RejectReason::InvalidGameId));
    };
    let Some(game_date) = game_date else {
        return Err(Rejected::new(row, RejectReason::InvalidDate));
    };
    if away_team.is_empty() || home_team.is_empty() {
        return Err(Rejected::new(row, RejectReason::EmptyTeamName));
    }

    Ok(GameRecord {
        game_id,
        game_date,
        away_team,
        away_score: row.int(columns::AWAY_SCORE),
        home_team,
        home_score: row.int(columns::HOME_SCORE),

        away_spread_open: row.decimal(columns::AWAY_SPREAD_OPEN),
        away_spread_open_odds: row.int(columns::AWAY_SPREAD_OPEN_ODDS),
        away_spread_close: row.decimal(columns::AWAY_SPREAD_CLOSE),
        away_spread_close_odds: row.int(columns::AWAY_SPREAD_CLOSE_ODDS),
        away_moneyline_open: row.int(columns::AWAY_MONEYLINE_OPEN),
        away_moneyline_close: row.int(columns::AWAY_MONEYLINE_CLOSE),

        home_spread_open: row.decimal(columns::HOME_SPREAD_OPEN),
        home_spread_open_odds: row.int(columns::HOME_SPREAD_OPEN_ODDS),
        home_spread_close: row.decimal(columns::HOME_SPREAD_CLOSE),
        home_spread_close_odds: row.int(columns::HOME_SPREAD_CLOSE_ODDS),
        home_moneyline_open: row.int(columns::HOME_MONEYLINE_OPEN),
        home_moneyline_close: row.int(columns::HOME_MONEYLINE_CLOSE),

        over_open: row.decimal(columns::OVER_OPEN),
        over_open_odds: row.int(columns::OVER_OPEN_ODDS),
        over_close: row.decimal(columns::OVER_CLOSE),
        over_close_odds: row.int(columns::OVER_CLOSE_ODDS),
        under_open: row.decimal(columns::UNDER_OPEN),
        under_open_odds: row.int(columns::UNDER_OPEN_ODDS),
        under_close: row.decimal(columns::UNDER_CLOSE),
        under_close_odds: row.int(columns::UNDER_CLOSE_ODDS),

        processed_at,
    })
}

/// Trim-then-parse a `Game ID`; only positive 64-bit integers are accepted
pub fn parse_game_id(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|id| *id > 0)
}

/// Trim-then-parse an optional integer field
pub fn parse_optional_int(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Trim-then-parse an optional decimal field
///
/// `NaN` and infinities are treated as absent: the wire format is JSON,
/// which has no representation for them.
pub fn parse_optional_decimal(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an 8-digit `YYYYMMDD` date, validating it against the calendar
pub fn parse_game_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = value[0..4].parse().ok()?;
    let month: u32 = value[4..6].parse().ok()?;
    let day: u32 = value[6..8].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}
