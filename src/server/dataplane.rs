//! Hand-off point to the message-routing engine
//!
//! Once a connection is authorized it belongs to a [`DataPlane`]. The data
//! plane is responsible for enforcing the attached grant on every frame; the
//! gate makes no further decisions.

use crate::protocol::{read_control_line, ClientFrame, LineRead, ProtocolError, ServerFrame};
use crate::server::handshake::AuthorizedConnection;

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// An authorized TCP connection
pub type TcpConnection = AuthorizedConnection<OwnedReadHalf, OwnedWriteHalf>;

/// Receives connections that passed the handshake
#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Serve `conn` until it disconnects
    async fn serve(&self, conn: TcpConnection) -> io::Result<()>;
}

/// Keeps authorized connections open, answering `PING` and ignoring the rest.
///
/// Used when the gate runs without a routing engine attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleDataPlane;

#[async_trait]
impl DataPlane for IdleDataPlane {
    async fn serve(&self, conn: TcpConnection) -> io::Result<()> {
        idle(conn).await
    }
}

async fn idle<R, W>(mut conn: AuthorizedConnection<R, W>) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    if let Some(line) = conn.pending.take() {
        respond(&mut conn, &line).await?;
    }

    loop {
        match read_control_line(&mut conn.reader).await? {
            LineRead::Eof => {
                debug!(conn_id = %conn.id, "client disconnected");
                return Ok(());
            }
            LineRead::TooLong => {
                let err = ProtocolError::LineTooLong;
                debug!(conn_id = %conn.id, error = %err, "dropping client");
                let frame = ServerFrame::Err(err.wire_message().to_string());
                conn.writer.write_all(&frame.to_bytes()).await?;
                return conn.writer.shutdown().await;
            }
            LineRead::Line(line) => {
                let text = String::from_utf8_lossy(&line);
                if !text.trim().is_empty() {
                    respond(&mut conn, &text).await?;
                }
            }
        }
    }
}

async fn respond<R, W>(conn: &mut AuthorizedConnection<R, W>, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    match ClientFrame::parse(line) {
        Ok(ClientFrame::Ping) => {
            conn.writer.write_all(&ServerFrame::Pong.to_bytes()).await?;
            conn.writer.flush().await
        }
        Ok(frame) => {
            debug!(conn_id = %conn.id, op = frame.op(), "no routing engine attached; frame dropped");
            Ok(())
        }
        Err(e) => {
            debug!(conn_id = %conn.id, error = %e, "unparseable frame dropped");
            Ok(())
        }
    }
}
