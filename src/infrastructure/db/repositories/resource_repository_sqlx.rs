use async_trait::async_trait;
use sqlx::Connection;

use crate::application::ports::resource_layer::{RepositoryError, ResourceLayer};
use crate::bootstrap::config::DatabaseSettings;
use crate::infrastructure::db::{self, PgPool};

pub struct SqlxRepository {
    pool: PgPool,
}

impl SqlxRepository {
    /// Connects and pings the database; no handle is returned unless the
    /// ping succeeds.
    pub async fn open(db: &DatabaseSettings) -> Result<Self, RepositoryError> {
        let pool = db::connect_pool(db)
            .await
            .map_err(|source| RepositoryError::Connect {
                addr: format!("{}:{}", db.host, db.port),
                source,
            })?;
        let repo = Self { pool };
        if let Err(e) = repo.ping().await {
            repo.pool.close().await;
            return Err(e);
        }
        tracing::info!(host = %db.host, port = db.port, database = %db.name, "database_connected");
        Ok(repo)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResourceLayer for SqlxRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::Ping)?;
        conn.ping().await.map_err(RepositoryError::Ping)
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        if self.pool.is_closed() {
            return Ok(());
        }
        self.pool.close().await;
        tracing::info!("database_connection_closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    fn unreachable() -> DatabaseSettings {
        DatabaseSettings {
            host: "127.0.0.1".into(),
            // Port 1 is reserved and never has a Postgres behind it.
            port: 1,
            user: "test_user".into(),
            password: "test_password".into(),
            name: "test_db".into(),
            connect_timeout_secs: 2,
        }
    }

    #[tokio::test]
    async fn open_fails_fast_when_database_is_unreachable() {
        let started = std::time::Instant::now();
        let err = SqlxRepository::open(&unreachable()).await.err().unwrap();
        assert!(matches!(err, RepositoryError::Connect { .. }), "{err:?}");
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let repo = SqlxRepository {
            pool: PgPoolOptions::new().connect_lazy_with(db::connect_options(&unreachable())),
        };
        repo.close().await.unwrap();
        repo.close().await.unwrap();
        assert!(repo.pool().is_closed());
    }

    #[test]
    fn connect_options_use_configured_endpoint() {
        let opts = db::connect_options(&unreachable());
        assert_eq!(opts.get_host(), "127.0.0.1");
        assert_eq!(opts.get_port(), 1);
    }
}
