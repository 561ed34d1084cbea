//! Property tests for the row codec

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Datelike, NaiveDate};
use nfl_common::message;
use nfl_common::record::{columns, parse, parse_game_date, parse_game_id, parse_optional_int, RawRow};
use proptest::prelude::*;

fn base_row(game_id: &str) -> RawRow {
    [
        (columns::GAME_ID, game_id),
        (columns::DATE, "20231015"),
        (columns::AWAY_TEAM, "Eagles"),
        (columns::HOME_TEAM, "Jets"),
    ]
    .into_iter()
    .collect()
}

proptest! {
    #[test]
    fn parse_never_panics(
        cells in proptest::collection::hash_map(
            prop::sample::select(vec![
                columns::GAME_ID,
                columns::DATE,
                columns::AWAY_TEAM,
                columns::HOME_TEAM,
                columns::AWAY_SCORE,
                columns::OVER_OPEN,
                columns::HOME_MONEYLINE_CLOSE,
            ]),
            ".{0,12}",
            0..7,
        )
    ) {
        let row: RawRow = cells.into_iter().collect();
        if let Ok(record) = parse(&row) {
            prop_assert!(record.game_id > 0);
            prop_assert!(!record.away_team.is_empty());
            prop_assert!(!record.home_team.is_empty());
        }
    }

    #[test]
    fn calendar_dates_parse_to_themselves(days in 0i64..60_000) {
        let date = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap() + chrono::Duration::days(days);
        let text = date.format("%Y%m%d").to_string();

        let parsed = parse_game_date(&text).unwrap();
        prop_assert_eq!(parsed, date);
        prop_assert_eq!(parsed.year(), date.year());
    }

    #[test]
    fn integers_survive_surrounding_whitespace(n in any::<i32>(), pad in "[ \t]{0,3}") {
        prop_assert_eq!(parse_optional_int(&format!("{pad}{n}{pad}")), Some(n));
    }

    #[test]
    fn non_positive_ids_are_rejected(id in i64::MIN..=0) {
        prop_assert!(parse(&base_row(&id.to_string())).is_err());
    }

    #[test]
    fn positive_ids_parse_to_themselves(id in 1i64..=i64::MAX, pad in "[ \t]{0,3}") {
        prop_assert_eq!(parse_game_id(&format!("{pad}{id}{pad}")), Some(id));
    }

    #[test]
    fn decoded_messages_match_parsed_rows(
        id in 1i64..=i64::MAX,
        tenths in -300i32..300,
        odds in proptest::option::of(-500i32..500),
    ) {
        let mut row = base_row(&id.to_string());
        row.insert(columns::AWAY_SPREAD_OPEN, format!("{:.1}", f64::from(tenths) / 10.0));
        if let Some(odds) = odds {
            row.insert(columns::AWAY_SPREAD_OPEN_ODDS, odds.to_string());
        }

        let record = parse(&row).unwrap();
        let decoded = message::decode(&message::encode(&record).unwrap()).unwrap();

        prop_assert_eq!(decoded.away_spread_open_odds, odds);
        prop_assert_eq!(decoded, record);
    }
}
