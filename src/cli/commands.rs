//! CLI command definitions

use clap::{Parser, Subcommand};
use portcullis::auth::password::{DEFAULT_COST, MAX_COST, MIN_COST};

#[derive(Parser)]
#[command(name = "portcullis")]
#[command(about = "Client authentication gate for a pub/sub broker", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "PORTCULLIS_LOG", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept clients and authenticate them
    ///
    /// At most one of --token, --user/--pass or --jwt-secret may be given;
    /// with none of them every client is admitted.
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:4222", env = "PORTCULLIS_BIND")]
        bind: String,

        /// Milliseconds a client has to authenticate after connecting
        #[arg(long, default_value_t = 1000, env = "PORTCULLIS_AUTH_TIMEOUT_MS")]
        auth_timeout_ms: u64,

        /// Shared token, plaintext or bcrypt hash
        #[arg(long, env = "PORTCULLIS_TOKEN")]
        token: Option<String>,

        /// Username for user/password authentication
        #[arg(long, env = "PORTCULLIS_USER")]
        user: Option<String>,

        /// Password, plaintext or bcrypt hash
        #[arg(long, env = "PORTCULLIS_PASS")]
        pass: Option<String>,

        /// Secret for verifying signed (HS256) tokens
        #[arg(long, env = "PORTCULLIS_JWT_SECRET")]
        jwt_secret: Option<String>,

        /// Lowest bcrypt cost accepted in a configured hash
        #[arg(long, default_value_t = 4, env = "PORTCULLIS_MIN_HASH_COST")]
        min_hash_cost: u32,

        /// Highest bcrypt cost accepted in a configured hash
        #[arg(long, default_value_t = 31, env = "PORTCULLIS_MAX_HASH_COST")]
        max_hash_cost: u32,

        /// Maximum payload size advertised to clients
        #[arg(long, default_value_t = 1024 * 1024, env = "PORTCULLIS_MAX_PAYLOAD")]
        max_payload: usize,
    },

    /// Hash a password for use with --pass or --token
    ///
    /// Examples:
    ///   portcullis passwd --password 's3cr3t'
    ///   portcullis passwd --cost 12
    Passwd {
        /// Password to hash; a random one is generated when omitted
        #[arg(short, long)]
        password: Option<String>,

        /// bcrypt cost
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_COST,
            value_parser = clap::value_parser!(u32).range(MIN_COST as i64..=MAX_COST as i64)
        )]
        cost: u32,
    },

    /// Mint a signed token
    ///
    /// Examples:
    ///   portcullis token --publish 'orders.>' --subscribe '>'
    ///   portcullis token --ttl 300 --subject worker-7
    Token {
        /// Signing secret, shared with `serve --jwt-secret`
        #[arg(long, env = "PORTCULLIS_JWT_SECRET")]
        secret: String,

        /// Seconds until the token expires
        #[arg(long, default_value_t = 3600)]
        ttl: u64,

        /// Subject recorded in the token
        #[arg(long)]
        subject: Option<String>,

        /// Subject pattern the holder may publish to (can be repeated)
        #[arg(long = "publish")]
        publish: Vec<String>,

        /// Subject pattern the holder may subscribe to (can be repeated)
        #[arg(long = "subscribe")]
        subscribe: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["portcullis", "serve"]).unwrap();
        let Commands::Serve {
            bind,
            auth_timeout_ms,
            token,
            min_hash_cost,
            ..
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert_eq!(bind, "0.0.0.0:4222");
        assert_eq!(auth_timeout_ms, 1000);
        assert!(token.is_none());
        assert_eq!(min_hash_cost, 4);
    }

    #[test]
    fn test_passwd_cost_range() {
        let cli = Cli::try_parse_from(["portcullis", "passwd"]).unwrap();
        assert!(matches!(cli.command, Commands::Passwd { cost: 11, password: None }));

        assert!(Cli::try_parse_from(["portcullis", "passwd", "--cost", "3"]).is_err());
        assert!(Cli::try_parse_from(["portcullis", "passwd", "--cost", "12"]).is_ok());
    }

    #[test]
    fn test_token_repeated_patterns() {
        let cli = Cli::try_parse_from([
            "portcullis",
            "token",
            "--secret",
            "s",
            "--publish",
            "a.>",
            "--publish",
            "b",
            "--subscribe",
            ">",
        ])
        .unwrap();
        let Commands::Token {
            publish, subscribe, ttl, ..
        } = cli.command
        else {
            panic!("expected token");
        };
        assert_eq!(publish, vec!["a.>", "b"]);
        assert_eq!(subscribe, vec![">"]);
        assert_eq!(ttl, 3600);
    }
}
