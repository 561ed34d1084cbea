//! Queue wire format
//!
//! One self-describing JSON object per message. The object carries every
//! [`GameRecord`] field under its data-model name plus a `schema_version`
//! tag, so publisher and consumer can evolve independently:
//!
//! - messages without a tag are read as version 1
//! - versions newer than [`SCHEMA_VERSION`] are refused rather than guessed at

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{GameRecord, RejectReason};

/// Wire schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// MIME type set on published messages
pub const CONTENT_TYPE: &str = "application/json";

#[derive(Serialize)]
struct OutboundMessage<'a> {
    schema_version: u32,
    #[serde(flatten)]
    record: &'a GameRecord,
}

#[derive(Deserialize)]
struct InboundMessage {
    #[serde(default = "legacy_schema_version")]
    schema_version: u32,
    #[serde(flatten)]
    record: GameRecord,
}

fn legacy_schema_version() -> u32 {
    1
}

/// Reasons a payload could not be turned back into a record
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed message payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported schema version {found} (this build reads up to {SCHEMA_VERSION})")]
    UnsupportedVersion { found: u32 },

    #[error("Message violates record invariants: {0}")]
    Invalid(RejectReason),
}

/// Serialize a record into a message payload
pub fn encode(record: &GameRecord) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&OutboundMessage {
        schema_version: SCHEMA_VERSION,
        record,
    })
}

/// Deserialize a message payload into a record
pub fn decode(payload: &[u8]) -> Result<GameRecord, DecodeError> {
    let message: InboundMessage = serde_json::from_slice(payload)?;

    if message.schema_version > SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            found: message.schema_version,
        });
    }

    message.record.validate().map_err(DecodeError::Invalid)?;

    Ok(message.record)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::{columns, parse, RawRow};
    use serde_json::{json, Value};

    fn sample_record() -> GameRecord {
        let row: RawRow = [
            (columns::GAME_ID, "5001"),
            (columns::DATE, "20230910"),
            (columns::AWAY_TEAM, "Bills"),
            (columns::HOME_TEAM, "Jets"),
            (columns::AWAY_SCORE, "22"),
            (columns::HOME_SCORE, "16"),
            (columns::AWAY_SPREAD_OPEN, "-2.5"),
            (columns::UNDER_CLOSE_ODDS, "-105"),
        ]
        .into_iter()
        .collect();
        parse(&row).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let record = sample_record();
        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_payload_uses_data_model_names() {
        let payload: Value = serde_json::from_slice(&encode(&sample_record()).unwrap()).unwrap();

        assert_eq!(payload["schema_version"], json!(SCHEMA_VERSION));
        assert_eq!(payload["game_id"], json!(5001));
        assert_eq!(payload["game_date"], json!("2023-09-10"));
        assert_eq!(payload["away_spread_open"], json!(-2.5));
        assert_eq!(payload["home_spread_open"], Value::Null);
        assert!(payload.get("processed_at").is_some());
    }

    #[test]
    fn test_untagged_message_is_version_one() {
        let mut payload: Value =
            serde_json::from_slice(&encode(&sample_record()).unwrap()).unwrap();
        payload.as_object_mut().unwrap().remove("schema_version");

        let decoded = decode(&serde_json::to_vec(&payload).unwrap()).unwrap();
        assert_eq!(decoded.game_id, 5001);
    }

    #[test]
    fn test_future_version_rejected() {
        let mut payload: Value =
            serde_json::from_slice(&encode(&sample_record()).unwrap()).unwrap();
        payload["schema_version"] = json!(SCHEMA_VERSION + 1);

        let err = decode(&serde_json::to_vec(&payload).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion { found } if found == SCHEMA_VERSION + 1));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(decode(b"{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(br#"{"game_id": 1}"#), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_invalid_record_rejected() {
        let mut record = sample_record();
        record.game_id = -4;
        let err = decode(&encode(&record).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(RejectReason::InvalidGameId)));
    }
}
