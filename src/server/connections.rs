//! Authorized connection bookkeeping

use crate::auth::Permissions;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// An authorized client, as seen by the rest of the server
#[derive(Debug)]
pub struct ClientConnection {
    /// Connection ID, shared with the handshake that admitted it
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    /// Grant attached at authorization time
    pub permissions: Option<Permissions>,
    pub authorized_at: Instant,
}

impl ClientConnection {
    pub fn new(id: Uuid, peer: Option<SocketAddr>, permissions: Option<Permissions>) -> Self {
        Self {
            id,
            peer,
            permissions,
            authorized_at: Instant::now(),
        }
    }

    /// Whether this connection runs under a token-supplied grant
    pub fn is_restricted(&self) -> bool {
        self.permissions.is_some()
    }
}

/// Tracks every connection between authorization and disconnect
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Arc<ClientConnection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly authorized connection
    pub fn add(&self, conn: Arc<ClientConnection>) {
        self.connections.insert(conn.id, conn);
    }

    /// Remove a connection
    pub fn remove(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    /// Get a connection by ID
    pub fn get(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Grant attached to a connection, for the authorization collaborator
    pub fn permissions_for(&self, id: Uuid) -> Option<Permissions> {
        self.connections
            .get(&id)
            .and_then(|conn| conn.permissions.clone())
    }

    /// IDs of every registered connection
    pub fn ids(&self) -> Vec<Uuid> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
