// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Longest reason string persisted into the errors column.
pub const MAX_ERROR_REASON_LEN: usize = 256;

#[derive(Queryable, Selectable, Clone, Serialize, Debug)]
#[diesel(table_name = crate::schema::train_runs)]
pub struct TrainRun {
    pub run_id: String,
    pub schedule_id: i64,
    pub train_no: i64,
    pub run_date: NaiveDate,
    pub has_started: i16,
    pub has_arrived: i16,
    pub current_status: Option<String>,
    pub last_known_lat_u6: Option<i64>,
    pub last_known_lng_u6: Option<i64>,
    pub last_known_snapped_lat_u6: Option<i64>,
    pub last_known_snapped_lng_u6: Option<i64>,
    pub last_route_frac_u4: Option<i64>,
    pub last_bearing_deg: Option<i64>,
    pub last_known_distance_km_u4: Option<i64>,
    pub last_updated_sno: Option<String>,
    pub errors: Value,
    pub last_update_timestamp_iso: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a run row. `None` leaves the column untouched, which is
/// what makes reconciler writes idempotent and composable.
#[derive(AsChangeset, Default, Clone, Debug)]
#[diesel(table_name = crate::schema::train_runs)]
pub struct RunStatusUpdate {
    pub has_started: Option<i16>,
    pub has_arrived: Option<i16>,
    pub current_status: Option<String>,
    pub last_known_lat_u6: Option<i64>,
    pub last_known_lng_u6: Option<i64>,
    pub last_known_snapped_lat_u6: Option<i64>,
    pub last_known_snapped_lng_u6: Option<i64>,
    pub last_route_frac_u4: Option<i64>,
    pub last_bearing_deg: Option<i64>,
    pub last_known_distance_km_u4: Option<i64>,
    pub last_updated_sno: Option<String>,
    pub errors: Option<Value>,
    pub last_update_timestamp_iso: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::train_run_locations)]
pub struct NewRunLocation {
    pub run_id: String,
    pub timestamp_iso: String,
    pub lat_u6: i64,
    pub lng_u6: i64,
    pub snapped_lat_u6: Option<i64>,
    pub snapped_lng_u6: Option<i64>,
    pub distance_km_u4: i64,
    pub segment_station_code: String,
    pub at_station: i16,
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct ErrorCounter {
    pub count: i64,
    #[serde(default)]
    pub last_seen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error counters carried on the run row as a JSONB blob. A missing counter
/// means count = 0. The poll queue query gates on these via JSON path
/// extraction without decoding the blob.
#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct RunErrors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_response: Option<ErrorCounter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_error: Option<ErrorCounter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<ErrorCounter>,
}

impl RunErrors {
    /// Decode from the JSONB column value. Malformed blobs decode to the
    /// empty record rather than poisoning the reconciler.
    pub fn from_value(value: &Value) -> RunErrors {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    pub fn static_count(&self) -> i64 {
        self.static_response.as_ref().map_or(0, |c| c.count)
    }

    pub fn total_count(&self) -> i64 {
        self.static_count()
            + self.api_error.as_ref().map_or(0, |c| c.count)
            + self.unknown.as_ref().map_or(0, |c| c.count)
    }

    pub fn bump_static(&mut self, now_iso: &str) {
        let counter = self.static_response.get_or_insert_with(Default::default);
        counter.count += 1;
        counter.last_seen = now_iso.to_string();
    }

    pub fn bump_api_error(&mut self, now_iso: &str, reason: &str) {
        let counter = self.api_error.get_or_insert_with(Default::default);
        counter.count += 1;
        counter.last_seen = now_iso.to_string();
        counter.reason = Some(truncate_reason(reason));
    }

    pub fn bump_unknown(&mut self, now_iso: &str, reason: &str) {
        let counter = self.unknown.get_or_insert_with(Default::default);
        counter.count += 1;
        counter.last_seen = now_iso.to_string();
        counter.reason = Some(truncate_reason(reason));
    }

    /// A valid upstream response clears the static-page suspicion.
    pub fn reset_static(&mut self) {
        if let Some(counter) = self.static_response.as_mut() {
            counter.count = 0;
        }
    }
}

pub fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_ERROR_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_ERROR_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn errors_roundtrip_and_absence_is_zero() {
        let errors = RunErrors::from_value(&json!({}));
        assert_eq!(errors.static_count(), 0);
        assert_eq!(errors.total_count(), 0);

        let errors = RunErrors::from_value(&json!({
            "static_response": {"count": 3, "last_seen": "2025-05-10T08:00:00+05:30"},
            "api_error": {"count": 1, "last_seen": "2025-05-10T08:05:00+05:30", "reason": "timeout"},
        }));
        assert_eq!(errors.static_count(), 3);
        assert_eq!(errors.total_count(), 4);

        let value = errors.to_value();
        assert_eq!(RunErrors::from_value(&value), errors);
        // absent counters stay absent in the serialised blob
        assert!(value.get("unknown").is_none());
    }

    #[test]
    fn malformed_blob_decodes_to_empty() {
        let errors = RunErrors::from_value(&json!({"static_response": "not an object"}));
        assert_eq!(errors, RunErrors::default());
    }

    #[test]
    fn bump_and_reset() {
        let mut errors = RunErrors::default();
        errors.bump_static("t1");
        errors.bump_static("t2");
        errors.bump_api_error("t3", "connect refused");
        errors.bump_unknown("t4", "bad json");
        assert_eq!(errors.static_count(), 2);
        assert_eq!(errors.total_count(), 4);
        assert_eq!(
            errors.static_response.as_ref().unwrap().last_seen,
            "t2".to_string()
        );

        errors.reset_static();
        assert_eq!(errors.static_count(), 0);
        // the counter object survives with count = 0
        assert!(errors.static_response.is_some());
        assert_eq!(errors.total_count(), 2);
    }

    #[test]
    fn reason_truncation_respects_char_boundaries() {
        let long = "x".repeat(MAX_ERROR_REASON_LEN + 50);
        assert_eq!(truncate_reason(&long).len(), MAX_ERROR_REASON_LEN);

        let multibyte = "é".repeat(MAX_ERROR_REASON_LEN);
        let truncated = truncate_reason(&multibyte);
        assert!(truncated.len() <= MAX_ERROR_REASON_LEN);
        assert!(multibyte.starts_with(&truncated));
    }
}
