use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("failed to connect to database at {addr}")]
    Connect {
        addr: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to ping database")]
    Ping(#[source] sqlx::Error),
}

/// Owner of the single external connection behind the service layer.
///
/// Query methods go here as the service grows; today the handle is only
/// opened, pinged and closed.
#[async_trait]
pub trait ResourceLayer: Send + Sync {
    /// Round-trips the connection.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Releases the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), RepositoryError>;
}
