//! Text protocol frames exchanged during the handshake
//!
//! Every frame is one CRLF-terminated control line:
//!
//! ```text
//! S: INFO {"server_id":"...","auth_required":true,...}
//! C: CONNECT {"verbose":true,"auth_token":"...","user":"...","pass":"..."}
//! S: +OK
//! S: -ERR 'Authorization Violation'
//! ```
//!
//! Only what the handshake needs is parsed here: CONNECT payloads in full,
//! every other operation by name only.

use crate::auth::{Authenticator, Credentials};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const CRLF: &str = "\r\n";

/// Longest control line accepted before the connection is authorized
pub const MAX_CONTROL_LINE: usize = 4096;

/// Protocol version advertised in INFO
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid CONNECT payload: {0}")]
    MalformedConnect(#[from] serde_json::Error),

    #[error("control line exceeds {} bytes", MAX_CONTROL_LINE)]
    LineTooLong,

    #[error("control line is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Text sent to the client after `-ERR`
    pub fn wire_message(&self) -> &'static str {
        match self {
            ProtocolError::MalformedConnect(_) => "Invalid CONNECT Payload",
            ProtocolError::LineTooLong => "Maximum Control Line Exceeded",
            ProtocolError::InvalidUtf8 => "Unknown Protocol Operation",
        }
    }
}

/// Result of reading one control line
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, without its terminator
    Line(Vec<u8>),
    /// [`MAX_CONTROL_LINE`] bytes arrived without a terminator
    TooLong,
    /// The peer closed, possibly mid-line
    Eof,
}

/// Read one CRLF- or LF-terminated line, never buffering more than
/// [`MAX_CONTROL_LINE`] bytes of it
pub async fn read_control_line<R>(reader: &mut R) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(MAX_CONTROL_LINE as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if line.last() != Some(&b'\n') {
        if n >= MAX_CONTROL_LINE {
            return Ok(LineRead::TooLong);
        }
        return Ok(LineRead::Eof);
    }

    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(LineRead::Line(line))
}

/// Server description sent to every client on accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub auth_required: bool,
    pub max_payload: usize,
}

impl ServerInfo {
    /// Build the INFO payload, advertising `auth_required` unless the
    /// authenticator is open
    pub fn advertise(
        authenticator: &Authenticator,
        server_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        max_payload: usize,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            version: PROTOCOL_VERSION.to_string(),
            host: host.into(),
            port,
            auth_required: authenticator.auth_required(),
            max_payload,
        }
    }
}

/// CONNECT payload
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct ConnectInfo {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub pedantic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ConnectInfo {
    /// Move the credential fields out, treating empty strings as absent
    pub fn take_credentials(&mut self) -> Credentials {
        fn present(v: Option<String>) -> Option<String> {
            v.filter(|s| !s.is_empty())
        }
        Credentials {
            token: present(self.auth_token.take()),
            username: present(self.user.take()),
            password: present(self.pass.take()),
        }
    }
}

impl fmt::Debug for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectInfo")
            .field("verbose", &self.verbose)
            .field("pedantic", &self.pedantic)
            .field("user", &self.user)
            .field("name", &self.name)
            .field("lang", &self.lang)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A control line received from a client
#[derive(Debug)]
pub enum ClientFrame {
    Connect(ConnectInfo),
    Ping,
    Pong,
    /// Any other operation, kept verbatim for the data plane
    Other { op: String, line: String },
}

impl ClientFrame {
    /// Parse one control line (without its trailing CRLF)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_start();
        let (op, args) = match line.find(|c: char| c.is_ascii_whitespace()) {
            Some(i) => (&line[..i], line[i..].trim()),
            None => (line, ""),
        };

        if op.eq_ignore_ascii_case("CONNECT") {
            let info: ConnectInfo = serde_json::from_str(args)?;
            return Ok(ClientFrame::Connect(info));
        }
        if op.eq_ignore_ascii_case("PING") {
            return Ok(ClientFrame::Ping);
        }
        if op.eq_ignore_ascii_case("PONG") {
            return Ok(ClientFrame::Pong);
        }

        Ok(ClientFrame::Other {
            op: op.to_ascii_uppercase(),
            line: line.to_string(),
        })
    }

    /// Operation name, for logs and error reporting
    pub fn op(&self) -> &str {
        match self {
            ClientFrame::Connect(_) => "CONNECT",
            ClientFrame::Ping => "PING",
            ClientFrame::Pong => "PONG",
            ClientFrame::Other { op, .. } => op,
        }
    }
}

/// A control line sent to a client
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Info(ServerInfo),
    Ok,
    Err(String),
    Pong,
}

impl ServerFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFrame::Info(info) => {
                let json = serde_json::to_string(info).map_err(|_| fmt::Error)?;
                write!(f, "INFO {}{}", json, CRLF)
            }
            ServerFrame::Ok => write!(f, "+OK{}", CRLF),
            ServerFrame::Err(message) => write!(f, "-ERR '{}'{}", message, CRLF),
            ServerFrame::Pong => write!(f, "PONG{}", CRLF),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, HashPolicy};

    #[test]
    fn test_parse_connect() {
        let frame = ClientFrame::parse(
            r#"CONNECT {"verbose":true,"auth_token":"tok","user":"derek","pass":"foobar"}"#,
        )
        .unwrap();

        let ClientFrame::Connect(mut info) = frame else {
            panic!("expected CONNECT");
        };
        assert!(info.verbose);
        let creds = info.take_credentials();
        assert_eq!(creds.token.as_deref(), Some("tok"));
        assert_eq!(creds.username.as_deref(), Some("derek"));
        assert_eq!(creds.password.as_deref(), Some("foobar"));
        assert!(info.pass.is_none());
    }

    #[test]
    fn test_connect_empty_strings_are_absent() {
        let ClientFrame::Connect(mut info) =
            ClientFrame::parse(r#"CONNECT {"verbose":false,"auth_token":"","user":"","pass":""}"#)
                .unwrap()
        else {
            panic!("expected CONNECT");
        };
        assert!(info.take_credentials().is_empty());
    }

    #[test]
    fn test_connect_is_case_insensitive_and_tolerates_extra_keys() {
        let frame = ClientFrame::parse(r#"connect {"lang":"go","ssl_required":false}"#).unwrap();
        assert_eq!(frame.op(), "CONNECT");
    }

    #[test]
    fn test_malformed_connect() {
        let err = ClientFrame::parse("CONNECT {not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedConnect(_)));
        assert_eq!(err.wire_message(), "Invalid CONNECT Payload");

        assert!(ClientFrame::parse("CONNECT").is_err());
    }

    #[test]
    fn test_parse_other_ops() {
        assert!(matches!(ClientFrame::parse("PING").unwrap(), ClientFrame::Ping));
        assert!(matches!(ClientFrame::parse("pong").unwrap(), ClientFrame::Pong));

        let frame = ClientFrame::parse("pub foo 2").unwrap();
        assert_eq!(frame.op(), "PUB");
        let ClientFrame::Other { line, .. } = frame else {
            panic!("expected other");
        };
        assert_eq!(line, "pub foo 2");
    }

    #[tokio::test]
    async fn test_read_control_line() {
        let input: &[u8] = b"PING\r\n\xff\xfe PUB\nCONN";
        let mut reader = tokio::io::BufReader::new(input);

        assert_eq!(
            read_control_line(&mut reader).await.unwrap(),
            LineRead::Line(b"PING".to_vec())
        );
        assert_eq!(
            read_control_line(&mut reader).await.unwrap(),
            LineRead::Line(b"\xff\xfe PUB".to_vec())
        );
        // Unterminated tail is a hangup, not a line
        assert_eq!(read_control_line(&mut reader).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_read_control_line_is_bounded() {
        let input = vec![b'x'; MAX_CONTROL_LINE * 3];
        let mut reader = tokio::io::BufReader::new(&input[..]);
        assert_eq!(read_control_line(&mut reader).await.unwrap(), LineRead::TooLong);

        let mut exact = vec![b'y'; MAX_CONTROL_LINE - 1];
        exact.push(b'\n');
        let mut reader = tokio::io::BufReader::new(&exact[..]);
        let LineRead::Line(line) = read_control_line(&mut reader).await.unwrap() else {
            panic!("expected a line");
        };
        assert_eq!(line.len(), MAX_CONTROL_LINE - 1);
    }

    #[test]
    fn test_server_frames() {
        assert_eq!(ServerFrame::Ok.to_string(), "+OK\r\n");
        assert_eq!(
            ServerFrame::Err("Authorization Violation".into()).to_string(),
            "-ERR 'Authorization Violation'\r\n"
        );
        assert_eq!(ServerFrame::Pong.to_string(), "PONG\r\n");
    }

    #[test]
    fn test_info_advertises_auth() {
        let open = Authenticator::Open;
        let info = ServerInfo::advertise(&open, "id", "0.0.0.0", 4222, 1024);
        assert!(!info.auth_required);

        let token = Authenticator::from_config(
            &AuthConfig::Token {
                expected: "t".into(),
            },
            &HashPolicy::default(),
        )
        .unwrap();
        let info = ServerInfo::advertise(&token, "id", "0.0.0.0", 4222, 1024);
        assert!(info.auth_required);

        let rendered = ServerFrame::Info(info).to_string();
        assert!(rendered.starts_with("INFO {"));
        assert!(rendered.ends_with("}\r\n"));
        assert!(rendered.contains(r#""auth_required":true"#));
    }

    #[test]
    fn test_connect_debug_hides_secrets() {
        let info = ConnectInfo {
            auth_token: Some("tok-1".into()),
            pass: Some("pw-1".into()),
            ..ConnectInfo::default()
        };
        let out = format!("{:?}", info);
        assert!(!out.contains("tok-1"));
        assert!(!out.contains("pw-1"));
    }
}
