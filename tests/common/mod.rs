//! Shared helpers: a gate on an ephemeral port and a line-oriented client

#![allow(dead_code)]

use portcullis::auth::AuthConfig;
use portcullis::config::GateConfig;
use portcullis::server::{GateServer, IdleDataPlane};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const AUTH_TOKEN: &str = "_YZZ22_";
pub const AUTH_USER: &str = "derek";
pub const AUTH_PASS: &str = "foobar";

pub const BCRYPT_AUTH_PASS: &str = "IW@$6v(y1(t@fhPDvf!5^%";
pub const BCRYPT_AUTH_HASH: &str = "$2a$04$Q.CgCP2Sl9pkcTXEZHazaeMwPaAkSHk7AI51HkyMt5iJQQyUA4qxq";

pub const BCRYPT_AUTH_TOKEN: &str = "0uhJOSr3GW7xvHvtd^K6pa";
pub const BCRYPT_AUTH_TOKEN_HASH: &str =
    "$2a$04$u5ZClXpcjHgpfc61Ee0VKuwI1K3vTC4zq7SjphjnlHMeb1Llkb5Y6";

pub const JWT_SECRET: &str = "JWT-S3cr3t";

pub const OK: &str = "+OK\r\n";
pub const AUTH_VIOLATION: &str = "-ERR 'Authorization Violation'\r\n";

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A running gate; stops accepting when dropped
pub struct TestGate {
    pub addr: SocketAddr,
    pub server: Arc<GateServer>,
    shutdown: CancellationToken,
}

impl TestGate {
    pub async fn start(auth: AuthConfig) -> Self {
        Self::start_with(auth, Duration::from_secs(2)).await
    }

    pub async fn start_with(auth: AuthConfig, auth_timeout: Duration) -> Self {
        let config =
            GateConfig::new("127.0.0.1:0".parse().unwrap(), auth).auth_timeout(auth_timeout);
        let server = Arc::new(GateServer::new(config, Arc::new(IdleDataPlane)).unwrap());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let serving = server.clone();
        let stop = shutdown.clone();
        tokio::spawn(async move { serving.serve(listener, stop).await });

        Self {
            addr,
            server,
            shutdown,
        }
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    /// Poll until the registry holds `n` connections
    pub async fn wait_for_connections(&self, n: usize) {
        timeout(READ_TIMEOUT, async {
            while self.server.connection_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {} connections, have {}",
                n,
                self.server.connection_count()
            )
        });
    }
}

impl Drop for TestGate {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub info: serde_json::Value,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            info: serde_json::Value::Null,
        };

        let line = client.read_line().await;
        let json = line
            .strip_prefix("INFO ")
            .unwrap_or_else(|| panic!("expected INFO, got {:?}", line));
        client.info = serde_json::from_str(json.trim_end()).unwrap();
        client
    }

    pub fn auth_required(&self) -> bool {
        self.info["auth_required"].as_bool().unwrap()
    }

    pub async fn send(&mut self, data: &str) {
        self.send_bytes(data.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
    }

    /// Send CONNECT the way a typical client library does, empty fields included
    pub async fn auth_connect(&mut self, token: &str, user: &str, pass: &str) {
        let payload = serde_json::json!({
            "verbose": true,
            "auth_token": token,
            "user": user,
            "pass": pass,
        });
        self.send(&format!("CONNECT {}\r\n", payload)).await;
    }

    /// Next line including CRLF; empty string on EOF
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for server")
            .unwrap();
        line
    }

    /// Assert the server closed the connection
    pub async fn expect_closed(&mut self) {
        let mut line = String::new();
        let n = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("connection was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0, "unexpected data after rejection: {:?}", line);
    }

    /// Assert nothing arrives within `wait`
    pub async fn expect_silence(&mut self, wait: Duration) {
        let mut line = String::new();
        let result = timeout(wait, self.reader.read_line(&mut line)).await;
        assert!(result.is_err(), "unexpected data: {:?}", line);
    }

    pub async fn ping(&mut self) -> String {
        self.send("PING\r\n").await;
        self.read_line().await
    }
}
