//! Last-writer-wins reconciliation between a locally cached row and the
//! copy pulled from the remote store.
//!
//! Contract: the row with the later `updated_at` wins. Native timestamps,
//! integer millis and RFC 3339 text all compare as instants. The remote copy
//! wins ties and wins when the timestamps cannot be compared. If only one
//! side carries a timestamp, that side wins. A timestamped local row
//! therefore only survives a pull when it is strictly newer than the
//! server's copy.

use std::cmp::Ordering;

use crate::field_value::{FieldValue, Row};
use crate::mutation::UPDATED_AT_FIELD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

fn compare_updated_at(local: &FieldValue, remote: &FieldValue) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (local.as_epoch_ms(), remote.as_epoch_ms()) {
        return Some(a.cmp(&b));
    }
    match (local, remote) {
        // Unparseable text still orders lexicographically.
        (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Decide which copy of a row to keep.
pub fn pick_winner(local: Option<&Row>, remote: &Row) -> Winner {
    let Some(local) = local else {
        return Winner::Remote;
    };
    let (Some(local_ts), Some(remote_ts)) =
        (local.get(UPDATED_AT_FIELD), remote.get(UPDATED_AT_FIELD))
    else {
        return match (local.get(UPDATED_AT_FIELD), remote.get(UPDATED_AT_FIELD)) {
            (Some(ts), None) if !ts.is_null() => Winner::Local,
            _ => Winner::Remote,
        };
    };
    match compare_updated_at(local_ts, remote_ts) {
        Some(Ordering::Greater) => Winner::Local,
        _ => Winner::Remote,
    }
}

/// Merge a pulled row into the local copy, returning the row to store.
pub fn merge_rows(local: Option<Row>, remote: Row) -> Row {
    match pick_winner(local.as_ref(), &remote) {
        Winner::Remote => remote,
        Winner::Local => local.unwrap_or(remote),
    }
}
