//! TCP listener: accepts clients and runs each one through the handshake

use crate::auth::{Authenticator, ConfigError};
use crate::config::GateConfig;
use crate::protocol::ServerInfo;
use crate::server::connections::{ClientConnection, ConnectionManager};
use crate::server::dataplane::DataPlane;
use crate::server::handshake::Handshake;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The gate in front of a data plane
pub struct GateServer {
    config: GateConfig,
    server_id: String,
    authenticator: Arc<Authenticator>,
    connections: Arc<ConnectionManager>,
    data_plane: Arc<dyn DataPlane>,
}

impl GateServer {
    /// Build a server. Fails if the auth configuration is unusable.
    pub fn new(config: GateConfig, data_plane: Arc<dyn DataPlane>) -> Result<Self, ConfigError> {
        let authenticator = Authenticator::from_config(&config.auth, &config.hash_policy)?;

        Ok(Self {
            config,
            server_id: generate_server_id(),
            authenticator: Arc::new(authenticator),
            connections: Arc::new(ConnectionManager::new()),
            data_plane,
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Connections currently handed to the data plane
    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.connections.clone()
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    /// Bind the configured address
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr).await
    }

    /// Bind and serve until the process exits
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, CancellationToken::new()).await
    }

    /// Accept clients on `listener` until `shutdown` is cancelled.
    ///
    /// Connections already accepted keep running after shutdown; only the
    /// accept loop stops.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let local = listener.local_addr()?;
        let info = ServerInfo::advertise(
            &self.authenticator,
            self.server_id.clone(),
            local.ip().to_string(),
            local.port(),
            self.config.max_payload,
        );

        info!(
            addr = %local,
            server_id = %self.server_id,
            strategy = self.authenticator.strategy(),
            auth_timeout_ms = self.config.auth_timeout.as_millis() as u64,
            "gate listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(addr = %local, "gate stopped accepting");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let session = Session {
                authenticator: self.authenticator.clone(),
                connections: self.connections.clone(),
                data_plane: self.data_plane.clone(),
                info: info.clone(),
                auth_timeout: self.config.auth_timeout,
            };

            tokio::spawn(session.handle(stream, peer));
        }
    }
}

/// Everything one connection task needs, cloned out of the server
struct Session {
    authenticator: Arc<Authenticator>,
    connections: Arc<ConnectionManager>,
    data_plane: Arc<dyn DataPlane>,
    info: ServerInfo,
    auth_timeout: Duration,
}

impl Session {
    async fn handle(self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "could not set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let handshake = Handshake::new(
            reader,
            writer,
            self.authenticator,
            self.info,
            self.auth_timeout,
        )
        .with_peer(peer);

        debug!(conn_id = %handshake.id(), peer = %peer, "client accepted");

        // Rejections are logged and answered inside the handshake
        let Ok(conn) = handshake.run().await else {
            return;
        };

        let conn_id = conn.id;
        self.connections.add(Arc::new(ClientConnection::new(
            conn_id,
            conn.peer,
            conn.permissions.clone(),
        )));

        if let Err(e) = self.data_plane.serve(conn).await {
            warn!(conn_id = %conn_id, error = %e, "data plane error");
        }

        self.connections.remove(conn_id);
        debug!(conn_id = %conn_id, "client removed");
    }
}

fn generate_server_id() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
