use sqlx::{postgres::PgPoolOptions, Executor, Pool, Postgres};

use crate::error::QueryError;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

pub async fn connect(database_url: &str) -> Result<Pool<Postgres>, crate::error::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(QueryError::from)?;

    Ok(pool)
}

/// Applies the schema. Every statement is idempotent, so this runs on each start.
pub async fn init_schema(pool: &Pool<Postgres>) -> Result<(), crate::error::Error> {
    pool.execute(SCHEMA).await.map_err(QueryError::from)?;
    log::info!("Database schema is up to date");

    Ok(())
}
