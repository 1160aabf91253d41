//! Record id helpers.
//!
//! Ids of time-ordered records follow `{unixTimestamp}-{typeTag}-{slug}`.
//! The leading timestamp is the ledger's notion of creation time.

use super::{Payload, SignedRecord};
use crate::{Error, Result};

/// Parse the leading unix timestamp (seconds) of a time-ordered id.
pub fn parse_id_timestamp(id: &str) -> Result<i64> {
    let (head, rest) = id
        .split_once('-')
        .ok_or_else(|| Error::InvalidId(format!("ID has no timestamp prefix: {}", id)))?;

    if rest.is_empty() {
        return Err(Error::InvalidId(format!("ID has no type tag: {}", id)));
    }

    match head.parse::<i64>() {
        Ok(ts) if ts > 0 => Ok(ts),
        _ => Err(Error::InvalidId(format!(
            "ID timestamp must be a positive integer, got '{}' in: {}",
            head, id
        ))),
    }
}

/// Creation time of a record in unix seconds.
///
/// Time-ordered kinds use their id timestamp. Actors, whose ids carry no
/// timestamp, use the first signature instead.
pub fn created_at_secs<P: Payload>(record: &SignedRecord<P>) -> Option<i64> {
    if P::KIND.is_time_ordered() {
        parse_id_timestamp(record.payload.id()).ok()
    } else {
        record.header.first_signature().map(|s| s.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_id() {
        assert_eq!(
            parse_id_timestamp("1752274500-task-implement-login").unwrap(),
            1752274500
        );
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(parse_id_timestamp("task-implement-login").is_err());
        assert!(parse_id_timestamp("0-task-zero").is_err());
        assert!(parse_id_timestamp("-5-task-negative").is_err());
        assert!(parse_id_timestamp("1752274500").is_err());
        assert!(parse_id_timestamp("1752274500-").is_err());
        assert!(parse_id_timestamp("human:alice").is_err());
    }
}
