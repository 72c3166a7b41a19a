use crate::live_status::{DayScheduleEntry, LiveStatus};
use crate::models::RunErrors;
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;

// Service-area bounding box; anything outside is treated as a bogus fix.
const LAT_MIN: f64 = 6.0;
const LAT_MAX: f64 = 37.0;
const LNG_MIN: f64 = 68.0;
const LNG_MAX: f64 = 97.0;

#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalStatus {
    pub canonical: String,
    pub terminal: bool,
}

/// Map the raw upstream status (either spelling of the key) to its canonical
/// form and terminality. Unknown non-empty statuses pass through lower-cased
/// and non-terminal.
pub fn canonical_status(raw: &str, alt: &str) -> CanonicalStatus {
    let mut status = raw.trim().to_lowercase();
    if status.is_empty() {
        status = alt.trim().to_lowercase();
    }

    let (canonical, terminal) = match status.as_str() {
        "end" => ("completed".to_string(), true),
        "cancelled" => ("cancelled".to_string(), true),
        "terminated" => ("terminated".to_string(), true),
        "rescheduled" => ("rescheduled".to_string(), false),
        "" => ("unknown".to_string(), false),
        other => (other.to_string(), false),
    };

    CanonicalStatus {
        canonical,
        terminal,
    }
}

/// Build the pipe-separated stop cursor from the current-station entry.
/// `None` if any ordinal/time field is out of its valid range.
pub fn cursor_string(entry: &DayScheduleEntry) -> Option<String> {
    if entry.sno < 0
        || entry.station_code.is_empty()
        || entry.sch_arrival_tm <= 0
        || entry.actual_arrival_tm < 0
        || entry.sch_departure_tm <= 0
        || entry.actual_departure_tm < 0
    {
        return None;
    }

    Some(format!(
        "{}|{}|{}|{}|{}|{}",
        entry.sno,
        entry.station_code,
        entry.sch_arrival_tm,
        entry.actual_arrival_tm,
        entry.sch_departure_tm,
        entry.actual_departure_tm,
    ))
}

/// The cursor only ever moves forward: a new value is accepted when there is
/// no existing cursor, or the incoming stop ordinal strictly exceeds the
/// existing one. An existing cursor whose leading integer will not parse is
/// kept as-is.
pub fn cursor_advances(existing: Option<&str>, incoming_sno: i64) -> bool {
    let existing = match existing {
        None | Some("") => return true,
        Some(value) => value,
    };

    match existing.split('|').next().and_then(|s| s.parse::<i64>().ok()) {
        Some(existing_sno) => incoming_sno > existing_sno,
        None => false,
    }
}

/// Geolocation may only move forward in time. No stored timestamp (or a
/// corrupt one) trusts the incoming instant.
pub fn location_allowed(existing_iso: Option<&str>, incoming: &DateTime<FixedOffset>) -> bool {
    let existing = match existing_iso {
        None | Some("") => return true,
        Some(value) => value,
    };

    match DateTime::parse_from_rfc3339(existing) {
        Ok(existing) => *incoming > existing,
        Err(_) => true,
    }
}

/// Both coordinates present, not the (0, 0) null island, and inside the
/// service-area bounding box.
pub fn valid_coords(lat: Option<f64>, lng: Option<f64>) -> Option<(f64, f64)> {
    let (lat, lng) = (lat?, lng?);
    if lat == 0.0 && lng == 0.0 {
        return None;
    }
    if !(LAT_MIN..=LAT_MAX).contains(&lat) || !(LNG_MIN..=LNG_MAX).contains(&lng) {
        return None;
    }
    Some((lat, lng))
}

pub fn to_u6(value: f64) -> i64 {
    (value * 1e6).round() as i64
}

pub fn to_u4(value: f64) -> i64 {
    (value * 1e4).round() as i64
}

#[derive(Clone, Debug)]
pub struct PlannedLocation {
    pub lat: f64,
    pub lng: f64,
    pub lat_u6: i64,
    pub lng_u6: i64,
    pub distance_km_u4: i64,
}

/// Everything the valid-response transition will write, computed without
/// touching the store.
#[derive(Clone, Debug)]
pub struct ValidPlan {
    pub status: CanonicalStatus,
    pub errors: RunErrors,
    /// Accepted forward-moving cursor, if any.
    pub cursor: Option<String>,
    /// Incoming timestamp normalised to the configured zone; `Some` only
    /// when it is strictly newer than what is stored (keeps the stored
    /// value non-decreasing).
    pub last_update_iso: Option<String>,
    /// `Some` only when the timestamp gate passed and the coordinates are
    /// valid.
    pub location: Option<PlannedLocation>,
    pub segment_station_code: String,
    pub at_station: bool,
}

pub fn plan_valid(
    existing_cursor: Option<&str>,
    existing_timestamp: Option<&str>,
    mut errors: RunErrors,
    response: &LiveStatus,
    tz: Tz,
) -> ValidPlan {
    let status = canonical_status(&response.running_status, &response.running_status_alt);

    errors.reset_static();

    let current_station = response.current_station();

    let cursor = current_station
        .filter(|entry| cursor_advances(existing_cursor, entry.sno))
        .and_then(cursor_string);

    let api_time = DateTime::parse_from_rfc3339(response.last_update_iso_date.trim()).ok();

    let allowed = api_time
        .as_ref()
        .is_some_and(|incoming| location_allowed(existing_timestamp, incoming));

    let last_update_iso = if allowed {
        api_time.map(|t| t.with_timezone(&tz).to_rfc3339())
    } else {
        None
    };

    let location = if allowed {
        valid_coords(response.lat, response.lng).map(|(lat, lng)| PlannedLocation {
            lat,
            lng,
            lat_u6: to_u6(lat),
            lng_u6: to_u6(lng),
            distance_km_u4: to_u4(response.distance),
        })
    } else {
        None
    };

    ValidPlan {
        status,
        errors,
        cursor,
        last_update_iso,
        location,
        segment_station_code: current_station
            .map(|entry| entry.station_code.clone())
            .unwrap_or_default(),
        at_station: !response.departed_cur_stn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;
    use serde_json::json;

    fn running_response() -> LiveStatus {
        serde_json::from_value(json!({
            "running_status": "running",
            "lastUpdateIsoDate": "2025-05-10T08:30:00+05:30",
            "lat": 19.1,
            "lng": 72.9,
            "distance": 12.3456,
            "departedCurStn": false,
            "days_schedule": [
                {"sno": 3, "station_code": "BCT", "curStn": true,
                 "sch_arrival_tm": 1746843000, "actual_arrival_tm": 1746843120,
                 "sch_departure_tm": 1746843300, "actual_departure_tm": 1746843420}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn status_mapping_table() {
        assert_eq!(
            canonical_status("END", ""),
            CanonicalStatus {
                canonical: "completed".into(),
                terminal: true
            }
        );
        assert!(canonical_status(" Cancelled ", "").terminal);
        assert!(canonical_status("terminated", "").terminal);
        assert!(!canonical_status("rescheduled", "").terminal);
        assert_eq!(canonical_status("", "end").canonical, "completed");
        assert_eq!(
            canonical_status("Running Late", "").canonical,
            "running late"
        );
        assert!(!canonical_status("Running Late", "").terminal);
        assert_eq!(canonical_status("", "").canonical, "unknown");
    }

    #[test]
    fn cursor_monotonicity() {
        assert!(cursor_advances(None, 1));
        assert!(cursor_advances(Some(""), 1));
        assert!(cursor_advances(Some("2|ST|1|1|1|1"), 3));
        assert!(!cursor_advances(Some("3|ST|1|1|1|1"), 3));
        assert!(!cursor_advances(Some("5|ST|1|1|1|1"), 3));
        // corrupt leading integer keeps the stored cursor
        assert!(!cursor_advances(Some("junk|ST|1|1|1|1"), 3));
    }

    #[test]
    fn cursor_string_validation() {
        let mut entry = DayScheduleEntry {
            sno: 3,
            station_code: "BCT".into(),
            cur_stn: Some(true),
            sch_arrival_tm: 100,
            actual_arrival_tm: 110,
            sch_departure_tm: 120,
            actual_departure_tm: 130,
        };
        assert_eq!(
            cursor_string(&entry).unwrap(),
            "3|BCT|100|110|120|130"
        );

        entry.sch_arrival_tm = 0;
        assert!(cursor_string(&entry).is_none());
        entry.sch_arrival_tm = 100;
        entry.actual_departure_tm = -1;
        assert!(cursor_string(&entry).is_none());
    }

    #[test]
    fn location_gate_truth_table() {
        let incoming = DateTime::parse_from_rfc3339("2025-05-10T08:30:00+05:30").unwrap();
        assert!(location_allowed(None, &incoming));
        assert!(location_allowed(Some(""), &incoming));
        assert!(location_allowed(
            Some("2025-05-10T08:29:00+05:30"),
            &incoming
        ));
        // equal is not strictly after
        assert!(!location_allowed(
            Some("2025-05-10T08:30:00+05:30"),
            &incoming
        ));
        assert!(!location_allowed(
            Some("2025-05-10T08:31:00+05:30"),
            &incoming
        ));
        // corrupt stored value trusts the incoming instant
        assert!(location_allowed(Some("not a timestamp"), &incoming));
    }

    #[test]
    fn coordinate_gate() {
        assert_eq!(valid_coords(Some(19.1), Some(72.9)), Some((19.1, 72.9)));
        assert_eq!(valid_coords(None, Some(72.9)), None);
        assert_eq!(valid_coords(Some(19.1), None), None);
        assert_eq!(valid_coords(Some(0.0), Some(0.0)), None);
        // out of the service-area box
        assert_eq!(valid_coords(Some(48.8), Some(2.3)), None);
        assert_eq!(valid_coords(Some(19.1), Some(120.0)), None);
        // box edges are inclusive
        assert!(valid_coords(Some(6.0), Some(68.0)).is_some());
        assert!(valid_coords(Some(37.0), Some(97.0)).is_some());
    }

    #[test]
    fn integer_encoding_rounds() {
        assert_eq!(to_u6(19.1), 19_100_000);
        assert_eq!(to_u6(72.9), 72_900_000);
        assert_eq!(to_u4(12.3456), 123_456);
        assert_eq!(to_u6(-0.0000004), 0);
    }

    #[test]
    fn happy_path_plan() {
        // S1: fresh run, running status, good coordinates
        let plan = plan_valid(None, None, RunErrors::default(), &running_response(), Kolkata);

        assert_eq!(plan.status.canonical, "running");
        assert!(!plan.status.terminal);
        assert_eq!(
            plan.cursor.as_deref(),
            Some("3|BCT|1746843000|1746843120|1746843300|1746843420")
        );
        let location = plan.location.as_ref().unwrap();
        assert_eq!(location.lat_u6, 19_100_000);
        assert_eq!(location.lng_u6, 72_900_000);
        assert_eq!(location.distance_km_u4, 123_456);
        assert_eq!(plan.segment_station_code, "BCT");
        assert!(plan.at_station);
        assert_eq!(
            plan.last_update_iso.as_deref(),
            Some("2025-05-10T08:30:00+05:30")
        );
    }

    #[test]
    fn terminal_plan_resets_static_counter() {
        // S2: "end" response on a run with accumulated static suspicion
        let mut response = running_response();
        response.running_status = "end".into();

        let mut errors = RunErrors::default();
        errors.bump_static("t1");
        errors.bump_static("t2");

        let plan = plan_valid(None, None, errors, &response, Kolkata);
        assert!(plan.status.terminal);
        assert_eq!(plan.status.canonical, "completed");
        assert_eq!(plan.errors.static_count(), 0);
    }

    #[test]
    fn stale_timestamp_keeps_location_but_cursor_moves() {
        // S5: upstream reports an older instant than what is stored
        let plan = plan_valid(
            Some("2|ST|1|1|1|1"),
            Some("2025-05-10T08:31:00+05:30"),
            RunErrors::default(),
            &running_response(),
            Kolkata,
        );

        assert!(plan.location.is_none());
        assert!(plan.last_update_iso.is_none());
        assert_eq!(plan.status.canonical, "running");
        // the stop cursor is gated on sno, not on the timestamp
        assert!(plan.cursor.is_some());
    }

    #[test]
    fn null_island_coordinates_are_discarded() {
        // S6
        let mut response = running_response();
        response.lat = Some(0.0);
        response.lng = Some(0.0);

        let plan = plan_valid(None, None, RunErrors::default(), &response, Kolkata);
        assert!(plan.location.is_none());
        assert_eq!(plan.status.canonical, "running");
        // timestamp still advances; only geolocation is withheld
        assert!(plan.last_update_iso.is_some());
    }

    #[test]
    fn unparseable_upstream_timestamp_blocks_location() {
        let mut response = running_response();
        response.last_update_iso_date = "garbage".into();

        let plan = plan_valid(None, None, RunErrors::default(), &response, Kolkata);
        assert!(plan.location.is_none());
        assert!(plan.last_update_iso.is_none());
    }

    #[test]
    fn cursor_not_written_when_times_invalid() {
        let mut response = running_response();
        response.days_schedule[0].sch_departure_tm = 0;

        let plan = plan_valid(None, None, RunErrors::default(), &response, Kolkata);
        assert!(plan.cursor.is_none());
        // the entry still names the segment for the location log
        assert_eq!(plan.segment_station_code, "BCT");
    }
}
