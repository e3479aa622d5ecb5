use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::ports::resource_layer::{RepositoryError, ResourceLayer};
use crate::application::services::business::Service;
use crate::bootstrap::config::Settings;
use crate::bootstrap::server::{self, Drain};
use crate::infrastructure::db::repositories::resource_repository_sqlx::SqlxRepository;
use crate::presentation::http::{self, Handler};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to create repository")]
    Repository(#[source] RepositoryError),
    #[error("failed to listen on {addr}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("application already started")]
    AlreadyStarted,
    #[error("application already stopped")]
    Stopped,
    #[error("shutdown failed: {}", format_errors(.0))]
    Shutdown(Vec<ShutdownError>),
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("server did not drain within {0:?}")]
    Timeout(Duration),
    #[error("server shutdown failed: {0}")]
    Server(String),
    #[error("repository close failed")]
    Repository(#[source] RepositoryError),
}

fn format_errors(errors: &[ShutdownError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

/// A started HTTP listener: the trigger for graceful shutdown plus the task
/// driving the accept loop.
struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<Duration>,
    task: JoinHandle<Drain>,
}

impl ServerHandle {
    /// Stops accepting and waits up to `grace` for open connections. Any still
    /// open afterwards are aborted before this returns.
    async fn shutdown(self, grace: Duration) -> Result<(), ShutdownError> {
        let ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        } = self;
        // The accept loop may already be gone; its result is collected below.
        let _ = shutdown_tx.send(grace);
        match task.await {
            Ok(Drain::Complete) => {
                info!(%local_addr, "server_stopped");
                Ok(())
            }
            Ok(Drain::Abandoned(aborted)) => {
                warn!(%local_addr, ?grace, aborted, "server_drain_timeout_connections_aborted");
                Err(ShutdownError::Timeout(grace))
            }
            Err(e) => Err(ShutdownError::Server(e.to_string())),
        }
    }
}

/// Owns the resource layer, service, handler and (while running) the HTTP
/// listener, and tears them down in that reverse order.
pub struct App {
    settings: Settings,
    repository: Arc<dyn ResourceLayer>,
    service: Arc<Service>,
    handler: Handler,
    server: Mutex<Option<ServerHandle>>,
    state: Arc<watch::Sender<AppState>>,
    torn_down: AtomicBool,
}

impl App {
    /// Opens the database and wires the layers on top of it.
    pub async fn new(settings: Settings) -> Result<Self, AppError> {
        let repository = SqlxRepository::open(&settings.database)
            .await
            .map_err(AppError::Repository)?;
        Ok(Self::with_resource(settings, Arc::new(repository)))
    }

    /// Wires the layers around an already opened resource layer.
    pub fn with_resource(settings: Settings, repository: Arc<dyn ResourceLayer>) -> Self {
        let service = Arc::new(Service::new(Some(repository.clone())));
        let handler = Handler::new(service.clone());
        let (state, _) = watch::channel(AppState::Created);
        Self {
            settings,
            repository,
            service,
            handler,
            server: Mutex::new(None),
            state: Arc::new(state),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn state(&self) -> AppState {
        *self.state.borrow()
    }

    /// Address the listener is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.local_addr)
    }

    /// Binds the configured address and spawns the accept loop. Returns the
    /// bound address, which differs from the configured one for port 0.
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        let mut server = self.server.lock().await;
        match self.state() {
            AppState::Created if server.is_none() => {}
            AppState::ShuttingDown | AppState::Stopped => return Err(AppError::Stopped),
            _ => return Err(AppError::AlreadyStarted),
        }

        let host = self.settings.server.host.as_str();
        let port = self.settings.server.port;
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| AppError::Listen {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AppError::Listen { addr, source })?;

        let app = http::router(&self.handler);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let result = server::serve(listener, app, shutdown_rx).await;
            // Leaving Running on our own means the accept loop died.
            state.send_if_modified(|s| {
                if *s == AppState::Running {
                    *s = AppState::Stopped;
                    true
                } else {
                    false
                }
            });
            result
        });

        *server = Some(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        });
        self.state.send_replace(AppState::Running);
        info!(%local_addr, "HTTP server listening");
        Ok(local_addr)
    }

    /// Starts the listener and waits until the application leaves Running.
    /// Returns an error if binding fails or the accept loop exits on its own.
    pub async fn run(&self) -> Result<(), AppError> {
        let addr = self.start().await?;
        let mut state = self.state.subscribe();
        // The sender lives as long as `self`, so this only ends on a transition.
        let _ = state.wait_for(|s| *s != AppState::Running).await;

        // A handle still in place means shutdown() did not take it.
        let Some(server) = self.server.lock().await.take() else {
            return Ok(());
        };
        match server.task.await {
            Ok(_) => Ok(()),
            Err(e) => Err(AppError::Listen {
                addr: addr.to_string(),
                source: std::io::Error::other(e),
            }),
        }
    }

    /// Stops the listener (waiting up to the configured grace period for
    /// in-flight requests, then aborting the rest) and then closes the
    /// repository. The repository is closed even if the listener step fails;
    /// all failures are returned together. Only the first call tears down;
    /// later calls return `Ok` without touching anything.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Take the handle before announcing ShuttingDown so run() never races
        // us for it.
        let server = self.server.lock().await.take();
        // A dead accept loop already moved us to Stopped; never go back.
        self.state.send_if_modified(|s| {
            if *s == AppState::Stopped {
                false
            } else {
                *s = AppState::ShuttingDown;
                true
            }
        });
        let mut errors = Vec::new();

        if let Some(server) = server {
            let grace = self.settings.server.shutdown_timeout();
            if let Err(e) = server.shutdown(grace).await {
                error!(error = %e, "server_shutdown_failed");
                errors.push(e);
            }
        }

        if let Err(e) = self.repository.close().await {
            error!(error = ?e, "repository_close_failed");
            errors.push(ShutdownError::Repository(e));
        }

        self.state.send_replace(AppState::Stopped);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Shutdown(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingResource {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl ResourceLayer for CountingResource {
        async fn ping(&self) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), RepositoryError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn local_settings() -> Settings {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings
    }

    #[tokio::test]
    async fn new_fails_when_database_is_unreachable() {
        let mut settings = local_settings();
        settings.database.host = "127.0.0.1".into();
        settings.database.port = 1;
        settings.database.connect_timeout_secs = 1;

        let err = App::new(settings).await.err().unwrap();
        assert!(matches!(err, AppError::Repository(_)), "{err:?}");
    }

    #[tokio::test]
    async fn with_resource_wires_every_layer() {
        let resource: Arc<dyn ResourceLayer> = Arc::new(CountingResource::default());
        let app = App::with_resource(local_settings(), resource.clone());

        assert_eq!(app.state(), AppState::Created);
        assert!(Arc::ptr_eq(app.service().repository().unwrap(), &resource));
        assert!(app.local_addr().await.is_none());
        assert_eq!(app.settings().server.port, 0);
    }

    #[tokio::test]
    async fn shutdown_without_start_only_closes_repository() {
        let resource = Arc::new(CountingResource::default());
        let app = App::with_resource(local_settings(), resource.clone());

        app.shutdown().await.unwrap();
        assert_eq!(resource.closes.load(Ordering::SeqCst), 1);
        assert_eq!(app.state(), AppState::Stopped);
    }

    #[tokio::test]
    async fn start_then_shutdown_walks_the_lifecycle() {
        let resource = Arc::new(CountingResource::default());
        let app = App::with_resource(local_settings(), resource.clone());

        let addr = app.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(app.state(), AppState::Running);
        assert_eq!(app.local_addr().await, Some(addr));

        app.shutdown().await.unwrap();
        assert_eq!(app.state(), AppState::Stopped);
        assert!(app.local_addr().await.is_none());
        assert_eq!(resource.closes.load(Ordering::SeqCst), 1);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let app = App::with_resource(local_settings(), Arc::new(CountingResource::default()));
        app.start().await.unwrap();
        assert!(matches!(app.start().await, Err(AppError::AlreadyStarted)));
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn start_after_shutdown_reports_stopped() {
        let app = App::with_resource(local_settings(), Arc::new(CountingResource::default()));
        app.start().await.unwrap();
        app.shutdown().await.unwrap();

        let err = app.start().await.unwrap_err();
        assert!(matches!(err, AppError::Stopped), "{err:?}");
        assert_eq!(err.to_string(), "application already stopped");
    }

    #[tokio::test]
    async fn second_shutdown_leaves_stopped_state_untouched() {
        let resource = Arc::new(CountingResource::default());
        let app = App::with_resource(local_settings(), resource.clone());
        app.start().await.unwrap();
        app.shutdown().await.unwrap();

        let mut states = app.state.subscribe();
        states.mark_unchanged();
        app.shutdown().await.unwrap();

        assert!(!states.has_changed().unwrap());
        assert_eq!(app.state(), AppState::Stopped);
        assert_eq!(resource.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bind_failure_is_a_listen_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut settings = local_settings();
        settings.server.port = taken.local_addr().unwrap().port();

        let app = App::with_resource(settings, Arc::new(CountingResource::default()));
        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Listen { .. }), "{err:?}");
        assert_eq!(app.state(), AppState::Created);
    }

    #[test]
    fn shutdown_error_lists_every_failure() {
        let err = AppError::Shutdown(vec![
            ShutdownError::Timeout(Duration::from_secs(5)),
            ShutdownError::Server("boom".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("did not drain"));
        assert!(msg.contains("boom"));
    }
}
