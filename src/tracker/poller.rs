use chrono::Utc;
use chrono_tz::Tz;
use railtrace::config::PollerConfig;
use railtrace::live_status::LiveStatusClient;
use railtrace::postgres_tools::RailtracePostgresPool;
use railtrace::reconcile::{self, RunOutcome, STATUS_NOT_RUNNING, STATUS_TIMETABLE};
use railtrace::store::{self, RunToPoll};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::MissedTickBehavior;

/// Floor on the inter-request delay; prevents a thundering dispatch when the
/// eligible set is small and the window large.
const MIN_PACE: Duration = Duration::from_millis(20);

/// Inter-request delay that spreads the batch evenly across the window,
/// rounded to whole milliseconds.
pub fn pace_for(window: Duration, targets: usize) -> Duration {
    let raw = window / targets.max(1) as u32;
    if raw <= MIN_PACE {
        return MIN_PACE;
    }
    Duration::from_millis(((raw.as_micros() + 500) / 1000) as u64)
}

#[derive(Default, Debug)]
struct CycleStats {
    processed: usize,
    success: usize,
    short_not_running: usize,
    short_timetable: usize,
    short_unknown: usize,
    static_response: usize,
    api_error: usize,
    unknown_error: usize,
    no_coords: usize,
    coords_logged: usize,
    became_arrived: usize,
}

impl CycleStats {
    fn absorb(&mut self, outcome: &RunOutcome) {
        self.processed += 1;
        if outcome.success {
            self.success += 1;
            if outcome.coords_logged {
                self.coords_logged += 1;
            } else {
                self.no_coords += 1;
            }
            if outcome.became_arrived {
                self.became_arrived += 1;
            }
        }
        match outcome.short_response {
            Some(STATUS_NOT_RUNNING) => self.short_not_running += 1,
            Some(STATUS_TIMETABLE) => self.short_timetable += 1,
            Some(_) => self.short_unknown += 1,
            None => {}
        }
        if outcome.static_response {
            self.static_response += 1;
        }
        if outcome.api_error {
            self.api_error += 1;
        }
        if outcome.unknown_error {
            self.unknown_error += 1;
        }
    }
}

/// Repeats poll cycles until shutdown, holding each cycle to at least the
/// configured window.
pub async fn run(
    pool: Arc<RailtracePostgresPool>,
    client: Arc<LiveStatusClient>,
    cfg: PollerConfig,
    tz: Tz,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        "poller started | workers: {} | window: {:?} | static_error_thres: {} | total_error_thres: {}",
        cfg.concurrency,
        cfg.window,
        cfg.static_error_threshold,
        cfg.total_error_threshold
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let start = Instant::now();
        let processed = execute_cycle(&pool, &client, &cfg, tz, &mut shutdown).await;
        let elapsed = start.elapsed();

        if elapsed < cfg.window {
            let floor = cfg.window - elapsed;
            tokio::select! {
                _ = tokio::time::sleep(floor) => {
                    tracing::info!(
                        "cycle completed | processed: {} | elapsed: {:.2?} | slept: {:.2?}",
                        processed, elapsed, floor
                    );
                }
                _ = shutdown.changed() => break,
            }
        } else {
            tracing::info!(
                "cycle completed | processed: {} | elapsed: {:.2?}",
                processed,
                elapsed
            );
        }
    }

    tracing::info!("poller shutting down");
}

/// One full pass over the eligible set. Exposed so the `--once` flag can
/// drive a single cycle.
pub async fn execute_cycle(
    pool: &Arc<RailtracePostgresPool>,
    client: &Arc<LiveStatusClient>,
    cfg: &PollerConfig,
    tz: Tz,
    shutdown: &mut watch::Receiver<bool>,
) -> usize {
    let now = Utc::now().with_timezone(&tz).naive_local();

    let runs = {
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!("failed to get connection for poll queue: {}", err);
                return 0;
            }
        };
        match store::list_runs_to_poll(
            &mut conn,
            now,
            cfg.static_error_threshold,
            cfg.total_error_threshold,
        )
        .await
        {
            Ok(runs) => runs,
            Err(err) => {
                tracing::warn!("failed to list runs to poll: {}", err);
                return 0;
            }
        }
    };

    if runs.is_empty() {
        return 0;
    }

    let pace = pace_for(cfg.window, runs.len());
    tracing::info!("cycle start | targets: {} | rate_delay: {:?}", runs.len(), pace);

    let (results_tx, mut results_rx) = mpsc::channel::<RunOutcome>(runs.len());
    let semaphore = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
    // first tick lands one pace interval from now, like a fresh ticker
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + pace, pace);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'dispatch: for run in runs {
        tokio::select! {
            _ = shutdown.changed() => break 'dispatch,
            _ = ticker.tick() => {}
        }

        let permit = tokio::select! {
            _ = shutdown.changed() => break 'dispatch,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break 'dispatch,
            },
        };

        let pool = Arc::clone(pool);
        let client = Arc::clone(client);
        let results_tx = results_tx.clone();
        tokio::spawn(async move {
            let outcome = process_run(&pool, &client, run, tz).await;
            let _ = results_tx.send(outcome).await;
            drop(permit);
        });
    }
    drop(results_tx);

    let mut stats = CycleStats::default();
    while let Some(outcome) = results_rx.recv().await {
        stats.absorb(&outcome);
    }

    tracing::info!(
        "cycle results | processed: {} | success: {} | short_resp: {}/{}/{} (not_run/timetable/unknown) | static_resp: {} | api_err: {} | unknown_err: {} | no_coords: {} | coords_logged: {} | became_arrived: {}",
        stats.processed,
        stats.success,
        stats.short_not_running,
        stats.short_timetable,
        stats.short_unknown,
        stats.static_response,
        stats.api_error,
        stats.unknown_error,
        stats.no_coords,
        stats.coords_logged,
        stats.became_arrived
    );

    stats.processed
}

/// Fetch, classify and reconcile one run. Never fails the cycle: every error
/// path ends in a counter bump or a logged warning.
async fn process_run(
    pool: &RailtracePostgresPool,
    client: &LiveStatusClient,
    run: RunToPoll,
    tz: Tz,
) -> RunOutcome {
    let fetched = client
        .fetch_status(
            run.train_no,
            &run.origin_station_code,
            &run.terminus_station_code,
            run.run_date,
        )
        .await;

    match pool.get().await {
        Ok(mut conn) => reconcile::process(&mut conn, &run, fetched, tz).await,
        Err(err) => {
            tracing::warn!("failed to get connection for {}: {}", run.run_id, err);
            RunOutcome {
                run_id: run.run_id.clone(),
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_spreads_batch_across_window() {
        assert_eq!(
            pace_for(Duration::from_secs(60), 100),
            Duration::from_millis(600)
        );
        assert_eq!(
            pace_for(Duration::from_secs(60), 7),
            Duration::from_millis(8571)
        );
    }

    #[test]
    fn pace_has_a_floor() {
        assert_eq!(pace_for(Duration::from_secs(60), 100_000), MIN_PACE);
        // an empty or single-run batch gets the whole window
        assert_eq!(pace_for(Duration::from_secs(60), 0), Duration::from_secs(60));
        assert_eq!(pace_for(Duration::from_secs(60), 1), Duration::from_secs(60));
    }

    #[test]
    fn stats_aggregate_outcomes() {
        let mut stats = CycleStats::default();

        stats.absorb(&RunOutcome {
            run_id: "a".into(),
            success: true,
            coords_logged: true,
            became_arrived: true,
            ..Default::default()
        });
        stats.absorb(&RunOutcome {
            run_id: "b".into(),
            success: true,
            no_coords: true,
            ..Default::default()
        });
        stats.absorb(&RunOutcome {
            run_id: "c".into(),
            short_response: Some(STATUS_NOT_RUNNING),
            ..Default::default()
        });
        stats.absorb(&RunOutcome {
            run_id: "d".into(),
            api_error: true,
            ..Default::default()
        });

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.coords_logged, 1);
        assert_eq!(stats.no_coords, 1);
        assert_eq!(stats.became_arrived, 1);
        assert_eq!(stats.short_not_running, 1);
        assert_eq!(stats.api_error, 1);
    }
}
