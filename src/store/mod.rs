use crate::models::{NewRunLocation, RunStatusUpdate, TrainRun};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Date, Double, Integer, Jsonb, Nullable, Text, Timestamp};
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use serde::Serialize;

/// Deterministic run key, `"<train_no>_<YYYY-MM-DD>"`.
pub fn run_id_for(train_no: i64, run_date: NaiveDate) -> String {
    format!("{}_{}", train_no, run_date.format("%Y-%m-%d"))
}

/// Weekday bit index for the running-days bitmap: bit 0 = Sunday.
pub fn weekday_bit(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// One row of the polling queue: the run plus the schedule columns the
/// upstream request needs.
#[derive(QueryableByName, Clone, Debug)]
pub struct RunToPoll {
    #[diesel(sql_type = Text)]
    pub run_id: String,
    #[diesel(sql_type = BigInt)]
    pub schedule_id: i64,
    #[diesel(sql_type = BigInt)]
    pub train_no: i64,
    #[diesel(sql_type = Date)]
    pub run_date: NaiveDate,
    #[diesel(sql_type = Nullable<Text>)]
    pub last_updated_sno: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub last_update_timestamp_iso: Option<String>,
    #[diesel(sql_type = Jsonb)]
    pub errors: serde_json::Value,
    #[diesel(sql_type = Text)]
    pub origin_station_code: String,
    #[diesel(sql_type = Text)]
    pub terminus_station_code: String,
}

/// Eligible runs at `now` (a wall-clock instant already in the configured
/// zone, passed naive). Error-counter gates read the JSONB blob with path
/// extraction so rows are never decoded just to be filtered out. Stalest
/// runs come back first, never-polled runs before everything.
pub async fn list_runs_to_poll(
    conn: &mut AsyncPgConnection,
    now: NaiveDateTime,
    static_threshold: i64,
    total_threshold: i64,
) -> QueryResult<Vec<RunToPoll>> {
    diesel::sql_query(
        "SELECT r.run_id, r.schedule_id, r.train_no, r.run_date, \
                r.last_updated_sno, r.last_update_timestamp_iso, r.errors, \
                s.origin_station_code, s.terminus_station_code \
         FROM train_runs r \
         JOIN train_schedules s ON s.schedule_id = r.schedule_id \
         WHERE r.has_arrived = 0 \
           AND r.run_date BETWEEN ($1::timestamp::date - 5) AND $1::timestamp::date \
           AND COALESCE((r.errors #>> '{static_response,count}')::bigint, 0) < $2 \
           AND COALESCE((r.errors #>> '{static_response,count}')::bigint, 0) \
             + COALESCE((r.errors #>> '{api_error,count}')::bigint, 0) \
             + COALESCE((r.errors #>> '{unknown,count}')::bigint, 0) < $3 \
           AND r.run_date::timestamp \
             + make_interval(mins => s.origin_sch_departure_min) <= $1::timestamp \
         ORDER BY r.last_update_timestamp_iso ASC NULLS FIRST",
    )
    .bind::<Timestamp, _>(now)
    .bind::<BigInt, _>(static_threshold)
    .bind::<BigInt, _>(total_threshold)
    .load(conn)
    .await
}

#[derive(QueryableByName, Clone, Copy, Debug)]
pub struct RunSnap {
    #[diesel(sql_type = BigInt)]
    pub snapped_lat_u6: i64,
    #[diesel(sql_type = BigInt)]
    pub snapped_lng_u6: i64,
    #[diesel(sql_type = BigInt)]
    pub route_frac_u4: i64,
    #[diesel(sql_type = BigInt)]
    pub bearing_deg: i64,
}

/// Project raw coordinates onto the run's route line: closest point,
/// linear-reference fraction, and a forward bearing taken towards a point
/// slightly ahead on the line. `None` means the schedule has no route
/// geometry, which callers treat as non-fatal.
pub async fn get_run_snap(
    conn: &mut AsyncPgConnection,
    run_id: &str,
    lat: f64,
    lng: f64,
) -> QueryResult<Option<RunSnap>> {
    diesel::sql_query(
        "SELECT ROUND(ST_Y(snap.pt) * 1e6)::bigint AS snapped_lat_u6, \
                ROUND(ST_X(snap.pt) * 1e6)::bigint AS snapped_lng_u6, \
                ROUND(snap.frac * 1e4)::bigint AS route_frac_u4, \
                COALESCE(ROUND(degrees(ST_Azimuth(snap.pt, \
                    ST_LineInterpolatePoint(snap.geom, LEAST(snap.frac + 0.0005, 1.0)) \
                )))::bigint, 0) AS bearing_deg \
         FROM ( \
             SELECT ST_ClosestPoint(rt.geom, ST_SetSRID(ST_MakePoint($2, $3), 4326)) AS pt, \
                    ST_LineLocatePoint(rt.geom, ST_SetSRID(ST_MakePoint($2, $3), 4326)) AS frac, \
                    rt.geom \
             FROM train_runs r \
             JOIN train_routes rt ON rt.schedule_id = r.schedule_id \
             WHERE r.run_id = $1 \
         ) snap",
    )
    .bind::<Text, _>(run_id)
    .bind::<Double, _>(lng)
    .bind::<Double, _>(lat)
    .get_result(conn)
    .await
    .optional()
}

/// Partial, idempotent run update. `None` fields leave the stored value
/// intact; `updated_at` is stamped on every call.
pub async fn update_run_status(
    conn: &mut AsyncPgConnection,
    run_id: &str,
    update: &RunStatusUpdate,
) -> QueryResult<usize> {
    use crate::schema::train_runs::dsl;

    let mut update = update.clone();
    update.updated_at = Some(Utc::now());

    diesel::update(dsl::train_runs.filter(dsl::run_id.eq(run_id)))
        .set(&update)
        .execute(conn)
        .await
}

/// Append a location sample. The `(run_id, timestamp_iso)` key makes the
/// insert a no-op if a late task from a previous cycle already wrote it.
pub async fn log_run_location(
    conn: &mut AsyncPgConnection,
    row: &NewRunLocation,
) -> QueryResult<usize> {
    use crate::schema::train_run_locations::dsl;

    diesel::insert_into(dsl::train_run_locations)
        .values(row)
        .on_conflict((dsl::run_id, dsl::timestamp_iso))
        .do_nothing()
        .execute(conn)
        .await
}

/// Mask off the weekday bit of `run_date` on the schedule's running-days
/// bitmap. Bits are only ever cleared.
pub async fn clear_running_day_bit(
    conn: &mut AsyncPgConnection,
    schedule_id: i64,
    run_date: NaiveDate,
) -> QueryResult<usize> {
    diesel::sql_query(
        "UPDATE train_schedules \
         SET running_days_bitmap = (running_days_bitmap & ~(1 << $2))::smallint, \
             updated_at = now() \
         WHERE schedule_id = $1",
    )
    .bind::<BigInt, _>(schedule_id)
    .bind::<Integer, _>(weekday_bit(run_date))
    .execute(conn)
    .await
}

/// Materialise run rows for `run_date` from every schedule whose bitmap has
/// the date's weekday bit set. Re-running for the same date is a no-op.
pub async fn generate_runs_for_date(
    conn: &mut AsyncPgConnection,
    run_date: NaiveDate,
) -> QueryResult<usize> {
    diesel::sql_query(
        "INSERT INTO train_runs (run_id, schedule_id, train_no, run_date) \
         SELECT s.train_no::text || '_' || to_char($1, 'YYYY-MM-DD'), \
                s.schedule_id, s.train_no, $1 \
         FROM train_schedules s \
         WHERE ((s.running_days_bitmap >> $2) & 1) = 1 \
         ON CONFLICT (train_no, run_date) DO NOTHING",
    )
    .bind::<Date, _>(run_date)
    .bind::<Integer, _>(weekday_bit(run_date))
    .execute(conn)
    .await
}

pub async fn get_run(
    conn: &mut AsyncPgConnection,
    run_id: &str,
) -> QueryResult<Option<TrainRun>> {
    use crate::schema::train_runs::dsl;

    dsl::train_runs
        .filter(dsl::run_id.eq(run_id))
        .select(TrainRun::as_select())
        .first(conn)
        .await
        .optional()
}

#[derive(QueryableByName, Serialize, Clone, Debug)]
pub struct LiveTrainRow {
    #[diesel(sql_type = Text)]
    pub run_id: String,
    #[diesel(sql_type = BigInt)]
    pub train_no: i64,
    #[diesel(sql_type = Nullable<Text>)]
    pub train_name: Option<String>,
    #[diesel(sql_type = Date)]
    pub run_date: NaiveDate,
    #[diesel(sql_type = Nullable<Text>)]
    pub current_status: Option<String>,
    #[diesel(sql_type = BigInt)]
    pub lat_u6: i64,
    #[diesel(sql_type = BigInt)]
    pub lng_u6: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub last_route_frac_u4: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub last_bearing_deg: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub last_known_distance_km_u4: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    pub last_update_timestamp_iso: Option<String>,
}

/// Live (started, not arrived) runs whose last known position falls inside
/// the viewport. Bounds arrive already u6-encoded; the comparison never
/// leaves integer space. Snapped coordinates win over raw ones.
pub async fn live_trains_in_viewport(
    conn: &mut AsyncPgConnection,
    min_lat_u6: i64,
    max_lat_u6: i64,
    min_lng_u6: i64,
    max_lng_u6: i64,
) -> QueryResult<Vec<LiveTrainRow>> {
    diesel::sql_query(
        "SELECT r.run_id, r.train_no, t.train_name, r.run_date, r.current_status, \
                COALESCE(r.last_known_snapped_lat_u6, r.last_known_lat_u6) AS lat_u6, \
                COALESCE(r.last_known_snapped_lng_u6, r.last_known_lng_u6) AS lng_u6, \
                r.last_route_frac_u4, r.last_bearing_deg, r.last_known_distance_km_u4, \
                r.last_update_timestamp_iso \
         FROM train_runs r \
         LEFT JOIN trains t ON t.train_no = r.train_no \
         WHERE r.has_started = 1 AND r.has_arrived = 0 \
           AND COALESCE(r.last_known_snapped_lat_u6, r.last_known_lat_u6) \
               BETWEEN $1 AND $2 \
           AND COALESCE(r.last_known_snapped_lng_u6, r.last_known_lng_u6) \
               BETWEEN $3 AND $4",
    )
    .bind::<BigInt, _>(min_lat_u6)
    .bind::<BigInt, _>(max_lat_u6)
    .bind::<BigInt, _>(min_lng_u6)
    .bind::<BigInt, _>(max_lng_u6)
    .load(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        assert_eq!(run_id_for(12345, date), "12345_2025-05-10");
    }

    #[test]
    fn weekday_bit_starts_at_sunday() {
        // 2025-05-11 is a Sunday
        assert_eq!(weekday_bit(NaiveDate::from_ymd_opt(2025, 5, 11).unwrap()), 0);
        // 2025-05-14 is a Wednesday
        assert_eq!(weekday_bit(NaiveDate::from_ymd_opt(2025, 5, 14).unwrap()), 3);
        assert_eq!(weekday_bit(NaiveDate::from_ymd_opt(2025, 5, 17).unwrap()), 6);
    }

    #[test]
    fn clearing_wednesday_bit_masks_correctly() {
        // the SQL applies the same expression: bitmap & ~(1 << bit)
        let bit = weekday_bit(NaiveDate::from_ymd_opt(2025, 5, 14).unwrap());
        assert_eq!(127 & !(1 << bit), 119);
        // clearing an already-clear bit is a no-op
        assert_eq!(119 & !(1 << bit), 119);
    }
}
