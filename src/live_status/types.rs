use serde::Deserialize;

/// The subset of the upstream live-status document the reconciler reads.
/// Unknown fields are ignored; the upstream payload carries dozens more.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct LiveStatus {
    #[serde(default)]
    pub running_status: String,
    /// Some payload variants spell the status key with a space.
    #[serde(default, rename = "running status")]
    pub running_status_alt: String,
    #[serde(default, rename = "lastUpdateIsoDate")]
    pub last_update_iso_date: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub distance: f64,
    #[serde(default, rename = "departedCurStn")]
    pub departed_cur_stn: bool,
    #[serde(default)]
    pub days_schedule: Vec<DayScheduleEntry>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct DayScheduleEntry {
    #[serde(default)]
    pub sno: i64,
    #[serde(default)]
    pub station_code: String,
    #[serde(default, rename = "curStn")]
    pub cur_stn: Option<bool>,
    #[serde(default)]
    pub sch_arrival_tm: i64,
    #[serde(default)]
    pub actual_arrival_tm: i64,
    #[serde(default)]
    pub sch_departure_tm: i64,
    #[serde(default)]
    pub actual_departure_tm: i64,
}

impl LiveStatus {
    /// The first schedule entry flagged as the current station. Ordinal and
    /// time-field validity is the cursor logic's concern, not selection's.
    pub fn current_station(&self) -> Option<&DayScheduleEntry> {
        self.days_schedule
            .iter()
            .find(|entry| entry.cur_stn == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_representative_payload() {
        let body = r#"{
            "running_status": "running",
            "lastUpdateIsoDate": "2025-05-10T08:30:00+05:30",
            "lat": 19.1,
            "lng": 72.9,
            "distance": 12.3456,
            "departedCurStn": false,
            "train_name": "EXPRESS",
            "days_schedule": [
                {"sno": 2, "station_code": "ST", "sch_arrival_tm": 100,
                 "actual_arrival_tm": 110, "sch_departure_tm": 120,
                 "actual_departure_tm": 130},
                {"sno": 3, "station_code": "BCT", "curStn": true,
                 "sch_arrival_tm": 200, "actual_arrival_tm": 210,
                 "sch_departure_tm": 220, "actual_departure_tm": 230}
            ]
        }"#;

        let parsed: LiveStatus = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.running_status, "running");
        assert_eq!(parsed.lat, Some(19.1));
        assert!(!parsed.departed_cur_stn);

        let cur = parsed.current_station().unwrap();
        assert_eq!(cur.sno, 3);
        assert_eq!(cur.station_code, "BCT");
    }

    #[test]
    fn alternate_status_key_and_missing_fields() {
        let body = r#"{"running status": "END", "lat": null, "lng": null}"#;
        let parsed: LiveStatus = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.running_status, "");
        assert_eq!(parsed.running_status_alt, "END");
        assert_eq!(parsed.lat, None);
        assert!(parsed.current_station().is_none());
    }

    #[test]
    fn current_station_is_first_flagged_entry() {
        let body = r#"{"days_schedule": [
            {"sno": 2, "station_code": "AA"},
            {"sno": 3, "station_code": "BB", "curStn": true},
            {"sno": 4, "station_code": "CC", "curStn": true}
        ]}"#;
        let parsed: LiveStatus = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.current_station().unwrap().station_code, "BB");
    }
}
