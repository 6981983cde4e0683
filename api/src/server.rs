use crate::{create_router, AppState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&crate::config::ServerConfig> for ApiConfig {
    fn from(server: &crate::config::ServerConfig) -> Self {
        Self::new().with_host(server.host.clone()).with_port(server.port)
    }
}

/// Serves the API on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let app = create_router(state);
    axum::serve(listener, app).await
}

/// Start the API server with the given configuration
pub async fn start_server(state: AppState, config: ApiConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.address()).await?;
    info!("API server listening on {}", listener.local_addr()?);
    info!(
        "OpenAPI document at http://localhost:{}/api/v1/openapi.json",
        config.port
    );

    serve(listener, state).await
}

/// Binds `config`'s address and serves in a background task. Returns the
/// bound address, which differs from the configured one for port 0.
pub async fn spawn_server(
    state: AppState,
    config: ApiConfig,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(config.address()).await?;
    let addr = listener.local_addr()?;
    info!("API server listening on {}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, state).await {
            tracing::error!("API server error: {}", e);
        }
    });
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeystoneConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_config_address() {
        let config = ApiConfig::new().with_host("127.0.0.1").with_port(8081);
        assert_eq!(config.address(), "127.0.0.1:8081");

        let server = crate::config::ServerConfig::default();
        assert_eq!(ApiConfig::from(&server).address(), "0.0.0.0:3030");
    }

    #[tokio::test]
    async fn test_spawned_server_answers_health() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = KeystoneConfig::from_yaml("{}").unwrap();
        config.database.path = dir.path().join("keystone.db");
        let state = AppState::initialize(&config).await.unwrap();

        let (addr, handle) = spawn_server(state, ApiConfig::new().with_host("127.0.0.1").with_port(0))
            .await
            .unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/v1/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("healthy"));

        handle.abort();
    }
}
