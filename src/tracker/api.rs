use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use chrono::{NaiveDate, Utc};
use railtrace::config::ServerConfig;
use railtrace::postgres_tools::RailtracePostgresPool;
use railtrace::store;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

#[actix_web::get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}

#[actix_web::get("/v1/runs/{train_no}/{run_date}")]
async fn get_run(
    pool: web::Data<Arc<RailtracePostgresPool>>,
    path: web::Path<(i64, String)>,
) -> impl Responder {
    let (train_no, run_date) = path.into_inner();

    if train_no <= 0 {
        return HttpResponse::BadRequest().body("invalid 'train_no' parameter");
    }
    let run_date = match NaiveDate::parse_from_str(&run_date, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => {
            return HttpResponse::BadRequest()
                .body("invalid 'run_date' parameter; expected YYYY-MM-DD")
        }
    };

    let run_id = store::run_id_for(train_no, run_date);

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!("api: failed to get connection: {}", err);
            return HttpResponse::InternalServerError().body("internal server error");
        }
    };

    match store::get_run(&mut conn, &run_id).await {
        Ok(Some(run)) => HttpResponse::Ok().json(run),
        Ok(None) => HttpResponse::NotFound().body("run not found"),
        Err(err) => {
            tracing::warn!("api: failed to load run {}: {}", run_id, err);
            HttpResponse::InternalServerError().body("internal server error")
        }
    }
}

#[derive(Deserialize)]
struct ViewportQuery {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
    buffer: Option<f64>,
}

#[derive(Serialize)]
struct ViewportBounds {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

#[derive(Serialize)]
struct ViewportResponse {
    trains: Vec<store::LiveTrainRow>,
    count: usize,
    bounds: ViewportBounds,
    timestamp: String,
}

#[actix_web::get("/v1/trains/viewport")]
async fn trains_in_viewport(
    pool: web::Data<Arc<RailtracePostgresPool>>,
    query: web::Query<ViewportQuery>,
) -> impl Responder {
    // optional buffer in degrees, default 0.5 (~55 km), capped at 5
    let buffer = query
        .buffer
        .filter(|b| (0.0..=5.0).contains(b))
        .unwrap_or(0.5);

    let min_lat = query.min_lat - buffer;
    let max_lat = query.max_lat + buffer;
    let min_lng = query.min_lng - buffer;
    let max_lng = query.max_lng + buffer;

    if min_lat < -90.0 || max_lat > 90.0 || min_lng < -180.0 || max_lng > 180.0 {
        return HttpResponse::BadRequest().body("invalid coordinates");
    }
    if min_lat >= max_lat || min_lng >= max_lng {
        return HttpResponse::BadRequest().body("min values must be less than max values");
    }

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!("api: failed to get connection: {}", err);
            return HttpResponse::InternalServerError().body("internal server error");
        }
    };

    // viewport comparisons stay in integer space
    let trains = match store::live_trains_in_viewport(
        &mut conn,
        (min_lat * 1e6) as i64,
        (max_lat * 1e6) as i64,
        (min_lng * 1e6) as i64,
        (max_lng * 1e6) as i64,
    )
    .await
    {
        Ok(trains) => trains,
        Err(err) => {
            tracing::warn!("api: viewport query failed: {}", err);
            return HttpResponse::InternalServerError().body("internal server error");
        }
    };

    let count = trains.len();
    HttpResponse::Ok().json(ViewportResponse {
        trains,
        count,
        bounds: ViewportBounds {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        },
        timestamp: Utc::now().to_rfc3339(),
    })
}

fn build_server(
    cfg: &ServerConfig,
    pool: Arc<RailtracePostgresPool>,
) -> std::io::Result<(actix_web::dev::Server, ServerHandle)> {
    let pool_data = web::Data::new(pool);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .service(healthz)
            .service(get_run)
            .service(trains_in_viewport)
    })
    .keep_alive(cfg.idle_timeout)
    .client_request_timeout(cfg.read_timeout)
    .client_disconnect_timeout(cfg.write_timeout)
    .shutdown_timeout(cfg.shutdown_timeout.as_secs())
    .disable_signals()
    .bind(&cfg.addr)?
    .run();

    let handle = server.handle();
    Ok((server, handle))
}

/// Owns the HTTP listener. A restart signal tears the listener down and
/// rebuilds it without touching poller or expander; shutdown stops it for
/// good.
pub async fn supervise(
    cfg: ServerConfig,
    pool: Arc<RailtracePostgresPool>,
    mut shutdown: watch::Receiver<bool>,
    mut restart: watch::Receiver<()>,
) {
    loop {
        let (server, handle) = match build_server(&cfg, Arc::clone(&pool)) {
            Ok(built) => built,
            Err(err) => {
                tracing::error!("api: failed to bind {}: {}", cfg.addr, err);
                return;
            }
        };
        tracing::info!("api: server listening on {}", cfg.addr);

        let mut server_task = tokio::spawn(server);

        tokio::select! {
            result = &mut server_task => {
                match result {
                    Ok(Err(err)) => tracing::error!("api: server error: {}", err),
                    Err(err) => tracing::error!("api: server task panicked: {}", err),
                    _ => {}
                }
                return;
            }
            _ = restart.changed() => {
                tracing::info!("api: restart requested, rebuilding listener");
                handle.stop(true).await;
                let _ = server_task.await;
            }
            _ = shutdown.changed() => {
                tracing::info!("api: shutting down server");
                handle.stop(true).await;
                let _ = server_task.await;
                return;
            }
        }
    }
}
