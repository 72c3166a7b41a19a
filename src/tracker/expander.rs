use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use railtrace::postgres_tools::RailtracePostgresPool;
use railtrace::store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Runs for the next day are materialised at 20:00 local time, late enough
/// that same-day schedule edits are reflected.
const GENERATION_HOUR: u32 = 20;

/// The next 20:00 wall-clock instant in the configured zone, rolling to
/// tomorrow if today's has already passed.
pub fn next_generation_at(now: DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let at = tz
        .with_ymd_and_hms(
            today.year(),
            today.month(),
            today.day(),
            GENERATION_HOUR,
            0,
            0,
        )
        .earliest()
        .unwrap_or(now + ChronoDuration::hours(24));

    if now > at {
        at + ChronoDuration::hours(24)
    } else {
        at
    }
}

/// Daily expander tick. Generates today's runs once at startup, then waits
/// for each 20:00 boundary.
pub async fn run(
    pool: Arc<RailtracePostgresPool>,
    tz: Tz,
    mut shutdown: watch::Receiver<bool>,
) {
    generate(&pool, Utc::now().with_timezone(&tz)).await;

    loop {
        let now = Utc::now().with_timezone(&tz);
        let next = next_generation_at(now);
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(
            "next run generation at {} (in {:?})",
            next.to_rfc3339(),
            delay
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                tracing::info!("expander shutting down");
                return;
            }
        }

        generate(&pool, Utc::now().with_timezone(&tz)).await;
    }
}

async fn generate(pool: &RailtracePostgresPool, tick: DateTime<Tz>) {
    let run_date = tick.date_naive();
    tracing::info!("generating runs for {}", run_date);

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!("failed to get connection for run generation: {}", err);
            return;
        }
    };

    match store::generate_runs_for_date(&mut conn, run_date).await {
        Ok(inserted) => {
            tracing::info!("run generation for {} | inserted: {}", run_date, inserted)
        }
        Err(err) => tracing::warn!("failed to generate runs for {}: {}", run_date, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    #[test]
    fn before_the_boundary_targets_today() {
        let now = Kolkata.with_ymd_and_hms(2025, 5, 10, 9, 0, 0).unwrap();
        let next = next_generation_at(now);
        assert_eq!(
            next,
            Kolkata.with_ymd_and_hms(2025, 5, 10, 20, 0, 0).unwrap()
        );
    }

    #[test]
    fn after_the_boundary_rolls_to_tomorrow() {
        let now = Kolkata.with_ymd_and_hms(2025, 5, 10, 21, 30, 0).unwrap();
        let next = next_generation_at(now);
        assert_eq!(
            next,
            Kolkata.with_ymd_and_hms(2025, 5, 11, 20, 0, 0).unwrap()
        );
    }

    #[test]
    fn exactly_at_the_boundary_fires_today() {
        // only a boundary already past rolls over; exact equality fires now
        let now = Kolkata.with_ymd_and_hms(2025, 5, 10, 20, 0, 0).unwrap();
        let next = next_generation_at(now);
        assert_eq!(next, now);
    }
}
