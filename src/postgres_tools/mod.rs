// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::config::DatabaseConfig;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::RecyclingMethod;
use diesel_async::pooled_connection::bb8::Pool;

/// This type alias is the pool, which can be queried for connections.
/// It is typically wrapped in Arc to allow thread safe cloning to the same pool
pub type RailtracePostgresPool =
    bb8::Pool<AsyncDieselConnectionManager<diesel_async::AsyncPgConnection>>;

/// Type alias to the pooled connection
/// This must be used in a single thread, since it is mutable
pub type RailtraceConn<'a> = &'a mut bb8::PooledConnection<
    'a,
    diesel_async::pooled_connection::AsyncDieselConnectionManager<diesel_async::AsyncPgConnection>,
>;

pub async fn make_async_pool(
    db_config: &DatabaseConfig,
) -> Result<RailtracePostgresPool, Box<dyn std::error::Error + Sync + Send>> {
    let mut custom_conf = ManagerConfig::default();

    custom_conf.recycling_method = RecyclingMethod::Fast;

    let config: AsyncDieselConnectionManager<diesel_async::AsyncPgConnection> =
        AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new_with_config(
            db_config.url.clone(),
            custom_conf,
        );
    let pool = Pool::builder()
        .max_size(db_config.max_open_connections)
        .min_idle(Some(db_config.min_idle_connections))
        .max_lifetime(Some(db_config.connection_max_lifetime))
        .idle_timeout(Some(db_config.connection_max_idle_time))
        .build(config)
        .await?;

    Ok(pool)
}
