use std::sync::Arc;

use chrono::Duration;
use redis::aio::MultiplexedConnection;
use sqlx::{Pool, Postgres};

use crate::{
    config::Config,
    error::{CacheError, Error},
    images::ImageStore,
    jwt::SessionKeys,
    setup::{connect, init_schema},
};

/// Everything a request handler needs. Shared behind an `Arc`.
pub struct State {
    pub pool: Pool<Postgres>,
    pub cache: MultiplexedConnection,
    pub images: ImageStore,
    pub keys: Arc<SessionKeys>,
}

impl State {
    pub async fn new(config: &Config) -> Result<Arc<Self>, Error> {
        let pool = connect(&config.database_url).await?;
        init_schema(&pool).await?;

        let cache = connect_redis(&config.redis_url).await?;
        let keys = SessionKeys::new(
            config.jwt_secret.as_bytes(),
            Duration::hours(config.jwt_lifetime_hours),
        )?;

        Ok(Arc::new(Self {
            pool,
            cache,
            images: ImageStore::new(&config.media_root, &config.media_url),
            keys: Arc::new(keys),
        }))
    }

    /// A handle to the shared multiplexed connection.
    pub fn cache(&self) -> MultiplexedConnection {
        self.cache.clone()
    }
}

pub async fn connect_redis(redis_url: &str) -> Result<MultiplexedConnection, Error> {
    let client = redis::Client::open(redis_url).map_err(CacheError::from)?;
    let connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(CacheError::from)?;

    log::info!("Connected to redis");
    Ok(connection)
}
