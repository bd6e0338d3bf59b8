use serde::{Deserialize, Serialize};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::info;

pub mod models;

pub type Id = i64;

/// Marker for records which have not been written to the store yet.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct NoId;

/// Initializes and returns a database connection pool.
pub async fn setup_pool(options: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
    info!("Initializing database connection pool");
    PgPoolOptions::new().connect_with(options).await
}
