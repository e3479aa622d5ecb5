use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Pool, Postgres};

use crate::bootstrap::config::DatabaseSettings;

pub type PgPool = Pool<Postgres>;

pub fn connect_options(db: &DatabaseSettings) -> PgConnectOptions {
    let mut opts = PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .ssl_mode(PgSslMode::Disable);
    if !db.user.is_empty() {
        opts = opts.username(&db.user);
    }
    if !db.password.is_empty() {
        opts = opts.password(&db.password);
    }
    if !db.name.is_empty() {
        opts = opts.database(&db.name);
    }
    opts
}

/// Opens a pool capped at a single connection.
pub async fn connect_pool(db: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(db.connect_timeout())
        .connect_with(connect_options(db))
        .await
}

pub mod repositories;
