//! Stress tests for the gate
//!
//! Many clients handshake at once against one server; every outcome must
//! depend only on that client's own credentials.

mod common;

use common::*;
use portcullis::auth::{tokens, AuthConfig, Claims, TokenSecret};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
enum Behaviour {
    Good,
    BadPassword,
    Silent,
    Garbage,
}

impl Behaviour {
    fn for_index(i: usize) -> Self {
        match i % 4 {
            0 => Behaviour::Good,
            1 => Behaviour::BadPassword,
            2 => Behaviour::Silent,
            _ => Behaviour::Garbage,
        }
    }
}

/// Mixed good, bad, silent and misbehaving clients against one server
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_handshakes_are_isolated() {
    const CLIENTS: usize = 80;
    let auth_timeout = Duration::from_secs(2);

    let gate = TestGate::start_with(
        AuthConfig::Plain {
            username: AUTH_USER.into(),
            password: BCRYPT_AUTH_HASH.into(),
        },
        auth_timeout,
    )
    .await;

    let mut handles = Vec::with_capacity(CLIENTS);
    for i in 0..CLIENTS {
        let addr = gate.addr;
        handles.push(tokio::spawn(async move {
            let behaviour = Behaviour::for_index(i);
            // The deadline is armed before INFO goes out
            let started = Instant::now();
            let mut client = TestClient::connect(addr).await;

            match behaviour {
                Behaviour::Good => {
                    client.auth_connect("", AUTH_USER, BCRYPT_AUTH_PASS).await;
                    assert_eq!(client.read_line().await, OK, "client {}", i);
                    assert_eq!(client.ping().await, "PONG\r\n");
                }
                Behaviour::BadPassword => {
                    client.auth_connect("", AUTH_USER, "nope").await;
                    assert_eq!(client.read_line().await, AUTH_VIOLATION, "client {}", i);
                    client.expect_closed().await;
                }
                Behaviour::Silent => {
                    assert_eq!(
                        client.read_line().await,
                        "-ERR 'Authorization Timeout'\r\n",
                        "client {}",
                        i
                    );
                    assert!(started.elapsed() >= auth_timeout);
                }
                Behaviour::Garbage => {
                    client.send("SUB foo 1\r\n").await;
                    assert_eq!(client.read_line().await, AUTH_VIOLATION, "client {}", i);
                    client.expect_closed().await;
                }
            }
            (behaviour, client)
        }));
    }

    let mut kept = Vec::new();
    for handle in handles {
        let (behaviour, client) = handle.await.unwrap();
        if matches!(behaviour, Behaviour::Good) {
            kept.push(client);
        }
    }

    // Only the good clients made it past the gate
    gate.wait_for_connections(kept.len()).await;
    assert_eq!(kept.len(), CLIENTS / 4);

    drop(kept);
    gate.wait_for_connections(0).await;
}

/// Parallel signed-token handshakes, a share of them expired
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_signed_tokens_under_load() {
    const CLIENTS: usize = 100;

    let gate = TestGate::start(AuthConfig::SignedToken {
        secret: JWT_SECRET.as_bytes().to_vec(),
    })
    .await;
    let secret = TokenSecret::new(JWT_SECRET);
    let now = chrono::Utc::now().timestamp();

    let mut handles = Vec::with_capacity(CLIENTS);
    for i in 0..CLIENTS {
        let addr = gate.addr;
        // Every third token is already expired
        let exp = if i % 3 == 0 { now - 60 } else { now + 3600 };
        let claims = Claims::new(exp).with_subject(format!("client-{}", i));
        let token = tokens::issue(&claims, &secret);

        handles.push(tokio::spawn(async move {
            let mut client = TestClient::connect(addr).await;
            client.auth_connect(&token, "", "").await;
            let reply = client.read_line().await;
            if i % 3 == 0 {
                assert_eq!(reply, "-ERR 'Authorization Violation: Token Expired'\r\n");
            } else {
                assert_eq!(reply, OK);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}
