pub mod plan;

pub use plan::{plan_valid, CanonicalStatus, PlannedLocation, ValidPlan};

use crate::live_status::{classify, Classification, FetchError, LiveStatus};
use crate::models::{NewRunLocation, RunErrors, RunStatusUpdate};
use crate::store::{self, RunToPoll};
use chrono_tz::Tz;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use diesel_async::AsyncPgConnection;

pub const STATUS_NOT_RUNNING: &str = "not_running_today";
pub const STATUS_TIMETABLE: &str = "timetable_update";
pub const STATUS_UNKNOWN_SHORT: &str = "unknown_short_response";

/// Per-run result descriptor; only ever aggregated into cycle counters.
#[derive(Clone, Debug, Default)]
pub struct RunOutcome {
    pub run_id: String,
    pub success: bool,
    pub short_response: Option<&'static str>,
    pub static_response: bool,
    pub api_error: bool,
    pub unknown_error: bool,
    pub no_coords: bool,
    pub coords_logged: bool,
    pub became_arrived: bool,
}

impl RunOutcome {
    fn new(run_id: &str) -> RunOutcome {
        RunOutcome {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }
}

/// Turn one fetched (or failed) upstream response into exactly one committed
/// state transition on the run. Store failures are absorbed: the outcome is
/// still returned and the next cycle retries implicitly.
pub async fn process(
    conn: &mut AsyncPgConnection,
    run: &RunToPoll,
    fetched: Result<Vec<u8>, FetchError>,
    tz: Tz,
) -> RunOutcome {
    let body = match fetched {
        Ok(body) => body,
        Err(err) => return apply_api_error(conn, run, &err, tz).await,
    };

    match classify(&body) {
        Classification::ShortNotRunning => apply_short(conn, run, STATUS_NOT_RUNNING).await,
        Classification::ShortTimetable => apply_short(conn, run, STATUS_TIMETABLE).await,
        Classification::ShortUnknown => {
            tracing::warn!(
                "unexpected short response for {}: {}",
                run.run_id,
                String::from_utf8_lossy(&body)
            );
            apply_short(conn, run, STATUS_UNKNOWN_SHORT).await
        }
        Classification::Static => apply_static(conn, run, tz).await,
        Classification::Malformed(reason) => apply_malformed(conn, run, &reason, tz).await,
        Classification::Valid(parsed) => apply_valid(conn, run, &parsed, tz).await,
    }
}

fn now_iso(tz: Tz) -> String {
    chrono::Utc::now().with_timezone(&tz).to_rfc3339()
}

/// Short blurbs are authoritative: the run is finished for today. A
/// "not running" blurb additionally clears the schedule's weekday bit so
/// tomorrow's expansion skips the day.
async fn apply_short(
    conn: &mut AsyncPgConnection,
    run: &RunToPoll,
    short_status: &'static str,
) -> RunOutcome {
    let mut outcome = RunOutcome::new(&run.run_id);
    outcome.short_response = Some(short_status);

    let update = RunStatusUpdate {
        has_arrived: Some(1),
        current_status: Some(short_status.to_string()),
        ..Default::default()
    };

    let tx = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                store::update_run_status(conn, &run.run_id, &update).await?;
                if short_status == STATUS_NOT_RUNNING {
                    store::clear_running_day_bit(conn, run.schedule_id, run.run_date).await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await;

    if let Err(err) = tx {
        tracing::warn!("short-response update failed for {}: {}", run.run_id, err);
    }

    outcome
}

async fn apply_static(conn: &mut AsyncPgConnection, run: &RunToPoll, tz: Tz) -> RunOutcome {
    let mut outcome = RunOutcome::new(&run.run_id);
    outcome.static_response = true;

    let mut errors = RunErrors::from_value(&run.errors);
    errors.bump_static(&now_iso(tz));

    let update = RunStatusUpdate {
        errors: Some(errors.to_value()),
        ..Default::default()
    };
    if let Err(err) = store::update_run_status(conn, &run.run_id, &update).await {
        tracing::warn!("static-response update failed for {}: {}", run.run_id, err);
    }

    outcome
}

async fn apply_api_error(
    conn: &mut AsyncPgConnection,
    run: &RunToPoll,
    fetch_err: &FetchError,
    tz: Tz,
) -> RunOutcome {
    let mut outcome = RunOutcome::new(&run.run_id);
    outcome.api_error = true;

    let mut errors = RunErrors::from_value(&run.errors);
    errors.bump_api_error(&now_iso(tz), &fetch_err.to_string());

    let update = RunStatusUpdate {
        errors: Some(errors.to_value()),
        ..Default::default()
    };
    if let Err(err) = store::update_run_status(conn, &run.run_id, &update).await {
        tracing::warn!("api-error update failed for {}: {}", run.run_id, err);
    }

    outcome
}

async fn apply_malformed(
    conn: &mut AsyncPgConnection,
    run: &RunToPoll,
    reason: &str,
    tz: Tz,
) -> RunOutcome {
    let mut outcome = RunOutcome::new(&run.run_id);
    outcome.unknown_error = true;

    let mut errors = RunErrors::from_value(&run.errors);
    errors.bump_unknown(&now_iso(tz), reason);

    let update = RunStatusUpdate {
        errors: Some(errors.to_value()),
        ..Default::default()
    };
    if let Err(err) = store::update_run_status(conn, &run.run_id, &update).await {
        tracing::warn!("malformed-response update failed for {}: {}", run.run_id, err);
    }

    outcome
}

/// The rich path: plan the transition, project onto the route line if
/// geolocation is moving, then commit status + cursor + coordinates + the
/// location-log row in one transaction.
async fn apply_valid(
    conn: &mut AsyncPgConnection,
    run: &RunToPoll,
    response: &LiveStatus,
    tz: Tz,
) -> RunOutcome {
    let mut outcome = RunOutcome::new(&run.run_id);
    outcome.success = true;

    let plan = plan_valid(
        run.last_updated_sno.as_deref(),
        run.last_update_timestamp_iso.as_deref(),
        RunErrors::from_value(&run.errors),
        response,
        tz,
    );

    let terminal = plan.status.terminal;

    // route projection is a read; keep it outside the write transaction
    let snap = match &plan.location {
        Some(location) => {
            match store::get_run_snap(conn, &run.run_id, location.lat, location.lng).await {
                Ok(snap) => snap,
                Err(err) => {
                    tracing::warn!("snapping error for {}: {}", run.run_id, err);
                    None
                }
            }
        }
        None => None,
    };

    let mut update = RunStatusUpdate {
        has_started: Some(1),
        has_arrived: Some(if terminal { 1 } else { 0 }),
        current_status: Some(plan.status.canonical.clone()),
        last_updated_sno: plan.cursor.clone(),
        last_update_timestamp_iso: plan.last_update_iso.clone(),
        errors: Some(plan.errors.to_value()),
        ..Default::default()
    };

    let log_row = match (&plan.location, &plan.last_update_iso) {
        (Some(location), Some(timestamp_iso)) => {
            update.last_known_lat_u6 = Some(location.lat_u6);
            update.last_known_lng_u6 = Some(location.lng_u6);
            update.last_known_distance_km_u4 = Some(location.distance_km_u4);
            if let Some(snap) = &snap {
                update.last_known_snapped_lat_u6 = Some(snap.snapped_lat_u6);
                update.last_known_snapped_lng_u6 = Some(snap.snapped_lng_u6);
                update.last_route_frac_u4 = Some(snap.route_frac_u4);
                update.last_bearing_deg = Some(snap.bearing_deg);
            }

            Some(NewRunLocation {
                run_id: run.run_id.clone(),
                timestamp_iso: timestamp_iso.clone(),
                lat_u6: location.lat_u6,
                lng_u6: location.lng_u6,
                snapped_lat_u6: snap.as_ref().map(|s| s.snapped_lat_u6),
                snapped_lng_u6: snap.as_ref().map(|s| s.snapped_lng_u6),
                distance_km_u4: location.distance_km_u4,
                segment_station_code: plan.segment_station_code.clone(),
                at_station: if plan.at_station { 1 } else { 0 },
            })
        }
        _ => None,
    };

    let log_row_ref = &log_row;
    let update_ref = &update;
    let tx = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                store::update_run_status(conn, &run.run_id, update_ref).await?;
                if let Some(row) = log_row_ref {
                    store::log_run_location(conn, row).await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await;

    match tx {
        Ok(()) => {
            outcome.coords_logged = log_row.is_some();
            outcome.no_coords = log_row.is_none();
            outcome.became_arrived = terminal;
        }
        Err(err) => {
            tracing::warn!("valid-response commit failed for {}: {}", run.run_id, err);
            outcome.no_coords = true;
        }
    }

    outcome
}
