//! Connection handshake
//!
//! ```text
//!                 CONNECT              ok
//! AwaitingConnect ───────> Verifying ─────> Authorized
//!        │                     │
//!        │ other frame /       │ rejected
//!        │ bad payload         v
//!        └───────────────> Rejected
//!
//! AwaitingConnect | Verifying ──(deadline)──> TimedOut
//! ```
//!
//! Authorized hands the connection to the data plane. Rejected and TimedOut
//! send `-ERR` and close the socket; there is no retry on the same connection.

use crate::auth::{AuthError, Authenticator, Permissions};
use crate::protocol::{self, ClientFrame, LineRead, ProtocolError, ServerFrame, ServerInfo};
use crate::server::deadline::{self, AuthDeadline};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a handshake attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    AwaitingConnect,
    Verifying,
    Authorized,
    Rejected,
    TimedOut,
}

impl HandshakeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeStatus::Authorized | HandshakeStatus::Rejected | HandshakeStatus::TimedOut
        )
    }

    fn can_move_to(&self, next: HandshakeStatus) -> bool {
        use HandshakeStatus::*;
        matches!(
            (self, next),
            (AwaitingConnect, Verifying)
                | (AwaitingConnect, Authorized)
                | (AwaitingConnect, Rejected)
                | (AwaitingConnect, TimedOut)
                | (Verifying, Authorized)
                | (Verifying, Rejected)
                | (Verifying, TimedOut)
        )
    }
}

/// Per-connection handshake state
#[derive(Debug)]
pub struct HandshakeAttempt {
    pub id: Uuid,
    status: HandshakeStatus,
}

impl HandshakeAttempt {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: HandshakeStatus::AwaitingConnect,
        }
    }

    pub fn status(&self) -> HandshakeStatus {
        self.status
    }

    /// Move to `next`. Transitions out of a terminal state are ignored.
    pub fn transition(&mut self, next: HandshakeStatus) -> bool {
        if !self.status.can_move_to(next) {
            warn!(conn_id = %self.id, from = ?self.status, to = ?next, "ignoring invalid handshake transition");
            return false;
        }
        debug!(conn_id = %self.id, from = ?self.status, to = ?next, "handshake transition");
        self.status = next;
        true
    }
}

impl Default for HandshakeAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a handshake ended without authorizing the connection
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("authorization timeout")]
    Timeout,

    #[error("{0} received before CONNECT")]
    UnexpectedFrame(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection closed by client")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// Text sent after `-ERR`, or `None` when nothing should be sent
    pub fn wire_message(&self) -> Option<String> {
        match self {
            HandshakeError::Auth(e) => Some(e.to_string()),
            HandshakeError::Timeout => Some("Authorization Timeout".to_string()),
            HandshakeError::UnexpectedFrame(_) => Some("Authorization Violation".to_string()),
            HandshakeError::Protocol(e) => Some(e.wire_message().to_string()),
            HandshakeError::Closed | HandshakeError::Io(_) => None,
        }
    }

    /// The terminal status this error leaves the attempt in
    pub fn status(&self) -> HandshakeStatus {
        match self {
            HandshakeError::Timeout => HandshakeStatus::TimedOut,
            _ => HandshakeStatus::Rejected,
        }
    }
}

/// A connection that passed the handshake
#[derive(Debug)]
pub struct AuthorizedConnection<R, W> {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    /// Grant to enforce on every publish/subscribe, if the credential carried one
    pub permissions: Option<Permissions>,
    pub verbose: bool,
    /// A frame read during the handshake that belongs to the data plane
    pub pending: Option<String>,
    pub reader: BufReader<R>,
    pub writer: W,
}

/// What a successful negotiation produced
struct Admission {
    permissions: Option<Permissions>,
    verbose: bool,
    pending: Option<String>,
}

/// Drives one connection from accept to authorized or closed
pub struct Handshake<R, W> {
    attempt: HandshakeAttempt,
    peer: Option<SocketAddr>,
    reader: BufReader<R>,
    writer: W,
    authenticator: Arc<Authenticator>,
    info: ServerInfo,
    auth_timeout: Duration,
}

impl<R, W> Handshake<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        reader: R,
        writer: W,
        authenticator: Arc<Authenticator>,
        info: ServerInfo,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            attempt: HandshakeAttempt::new(),
            peer: None,
            reader: BufReader::new(reader),
            writer,
            authenticator,
            info,
            auth_timeout,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn id(&self) -> Uuid {
        self.attempt.id
    }

    /// Run the handshake to completion.
    ///
    /// On error the client has already been sent `-ERR` (where applicable)
    /// and the write side has been shut down.
    pub async fn run(mut self) -> Result<AuthorizedConnection<R, W>, HandshakeError> {
        let timer = self
            .authenticator
            .auth_required()
            .then(|| AuthDeadline::arm(self.auth_timeout));

        let outcome = tokio::select! {
            biased;
            _ = deadline::expiry(timer.as_ref()) => Err(HandshakeError::Timeout),
            result = self.negotiate() => result,
        };

        if let Some(timer) = timer {
            timer.disarm();
        }

        match outcome {
            Ok(admission) => self.authorize(admission).await,
            Err(e) => {
                self.reject(&e).await;
                Err(e)
            }
        }
    }

    async fn negotiate(&mut self) -> Result<Admission, HandshakeError> {
        self.send(ServerFrame::Info(self.info.clone())).await?;

        let line = match String::from_utf8(self.read_control_line().await?) {
            Ok(line) => line,
            Err(_) if self.authenticator.auth_required() => {
                return Err(HandshakeError::UnexpectedFrame("non-UTF-8 line".to_string()));
            }
            Err(_) => return Err(ProtocolError::InvalidUtf8.into()),
        };
        let frame = ClientFrame::parse(&line)?;

        match frame {
            ClientFrame::Connect(mut connect) => {
                self.attempt.transition(HandshakeStatus::Verifying);
                let verbose = connect.verbose;
                let credentials = connect.take_credentials();
                debug!(conn_id = %self.attempt.id, client = ?connect, "CONNECT received");

                // Hash verification is CPU-bound; keep it off the reactor so the
                // deadline can still win the race.
                let authenticator = Arc::clone(&self.authenticator);
                let permissions =
                    tokio::task::spawn_blocking(move || authenticator.authenticate(&credentials))
                        .await
                        .map_err(io::Error::other)??;

                Ok(Admission {
                    permissions,
                    verbose,
                    pending: None,
                })
            }
            other if !self.authenticator.auth_required() => {
                debug!(conn_id = %self.attempt.id, op = other.op(), "first frame is not CONNECT, auth not required");
                Ok(Admission {
                    permissions: None,
                    verbose: false,
                    pending: Some(line),
                })
            }
            other => Err(HandshakeError::UnexpectedFrame(other.op().to_string())),
        }
    }

    async fn authorize(
        mut self,
        admission: Admission,
    ) -> Result<AuthorizedConnection<R, W>, HandshakeError> {
        self.attempt.transition(HandshakeStatus::Authorized);

        if admission.verbose {
            if let Err(e) = self.send(ServerFrame::Ok).await {
                debug!(conn_id = %self.attempt.id, error = %e, "failed to acknowledge CONNECT");
                return Err(e.into());
            }
        }

        info!(
            conn_id = %self.attempt.id,
            peer = ?self.peer,
            strategy = self.authenticator.strategy(),
            restricted = admission.permissions.is_some(),
            "client authorized"
        );

        Ok(AuthorizedConnection {
            id: self.attempt.id,
            peer: self.peer,
            permissions: admission.permissions,
            verbose: admission.verbose,
            pending: admission.pending,
            reader: self.reader,
            writer: self.writer,
        })
    }

    async fn reject(&mut self, error: &HandshakeError) {
        self.attempt.transition(error.status());

        match error {
            HandshakeError::Closed => {
                debug!(conn_id = %self.attempt.id, peer = ?self.peer, "client left during handshake");
            }
            HandshakeError::Auth(e) => {
                warn!(conn_id = %self.attempt.id, peer = ?self.peer, kind = e.kind(), "authentication failed");
            }
            other => {
                warn!(conn_id = %self.attempt.id, peer = ?self.peer, error = %other, "handshake failed");
            }
        }

        if let Some(message) = error.wire_message() {
            if let Err(e) = self.send(ServerFrame::Err(message)).await {
                debug!(conn_id = %self.attempt.id, error = %e, "could not deliver -ERR");
            }
        }
        let _ = self.writer.shutdown().await;
    }

    async fn send(&mut self, frame: ServerFrame) -> io::Result<()> {
        self.writer.write_all(&frame.to_bytes()).await?;
        self.writer.flush().await
    }

    /// Read the next non-blank control line, without its line terminator
    async fn read_control_line(&mut self) -> Result<Vec<u8>, HandshakeError> {
        loop {
            match protocol::read_control_line(&mut self.reader).await? {
                LineRead::Eof => return Err(HandshakeError::Closed),
                LineRead::TooLong => return Err(ProtocolError::LineTooLong.into()),
                LineRead::Line(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                LineRead::Line(line) => return Ok(line),
            }
        }
    }
}
