//! Portcullis CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use portcullis::auth::password::hash_password;
use portcullis::auth::{tokens, AuthConfig, Claims, HashPolicy, Permissions, TokenSecret};
use portcullis::config::GateConfig;
use portcullis::server::{GateServer, IdleDataPlane};
use rand::{distr::Alphanumeric, Rng};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            auth_timeout_ms,
            token,
            user,
            pass,
            jwt_secret,
            min_hash_cost,
            max_hash_cost,
            max_payload,
        } => {
            let auth = AuthConfig::from_parts(token, user, pass, jwt_secret)
                .context("Invalid authentication options")?;
            let policy = HashPolicy::new(min_hash_cost, max_hash_cost)
                .context("Invalid hash cost range")?;
            let bind_addr = bind.parse().context("Invalid bind address")?;

            let config = GateConfig::new(bind_addr, auth)
                .auth_timeout(Duration::from_millis(auth_timeout_ms))
                .hash_policy(policy)
                .max_payload(max_payload);

            serve(config).await
        }
        Commands::Passwd { password, cost } => passwd(password, cost).await,
        Commands::Token {
            secret,
            ttl,
            subject,
            publish,
            subscribe,
        } => token(secret, ttl, subject, publish, subscribe),
    }
}

async fn serve(config: GateConfig) -> Result<()> {
    let server = GateServer::new(config, Arc::new(IdleDataPlane))
        .context("Invalid authentication configuration")?;
    let listener = server
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}", server.config().bind_addr))?;

    info!("Starting Portcullis gate...");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping gate");
        trigger.cancel();
    });

    server.serve(listener, shutdown).await?;

    info!(connections = server.connection_count(), "Portcullis gate stopped");
    Ok(())
}

async fn passwd(password: Option<String>, cost: u32) -> Result<()> {
    let (password, generated) = match password {
        Some(p) => (p, false),
        None => (random_password(), true),
    };

    // bcrypt at high cost takes a while; keep it off the runtime threads
    let plaintext = password.clone();
    let hash = tokio::task::spawn_blocking(move || hash_password(&plaintext, cost))
        .await
        .context("Hashing task failed")??;

    if generated {
        println!("pass: {}", password);
    }
    println!("bcrypt hash: {}", hash);

    Ok(())
}

fn token(
    secret: String,
    ttl: u64,
    subject: Option<String>,
    publish: Vec<String>,
    subscribe: Vec<String>,
) -> Result<()> {
    let ttl = i64::try_from(ttl).context("TTL too large")?;
    let now = chrono::Utc::now().timestamp();
    let exp = now + ttl;

    let mut claims = Claims::new(exp).issued_at(now);
    if let Some(sub) = subject {
        claims = claims.with_subject(sub);
    }
    let mut grant = Permissions::default();
    for pattern in publish {
        grant.add_publish(pattern);
    }
    for pattern in subscribe {
        grant.add_subscribe(pattern);
    }
    if !grant.is_empty() {
        claims = claims.with_permissions(grant.clone());
    }

    let token = tokens::issue(&claims, &TokenSecret::new(secret.into_bytes()));

    println!("{}", token);
    println!();
    let expires = chrono::DateTime::from_timestamp(exp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| exp.to_string());
    println!("Expires: {}", expires);
    if grant.is_empty() {
        println!("Grant: (server default)");
    } else {
        println!("Grant: {}", grant);
    }

    Ok(())
}

fn random_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(22)
        .map(char::from)
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
