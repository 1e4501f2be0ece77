//! Command-line and environment configuration.

use std::{fmt, net::SocketAddr};

use clap::Parser;

/// Indexer process arguments. Every flag doubles as an environment
/// variable so container deployments need no argv plumbing.
#[derive(Debug, Clone, Parser)]
#[command(name = "indexer", about = "Ethereum chain indexer and query service")]
pub struct IndexerArgs {
    /// Upstream Ethereum JSON-RPC endpoint
    #[arg(long, env = "RPC_ENDPOINT")]
    pub rpc_endpoint: String,

    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DB", default_value = "chainindex")]
    pub postgres_db: String,

    #[arg(long, env = "POSTGRES_USER", default_value = "postgres")]
    pub postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "", hide_env_values = true)]
    pub postgres_password: Secret,

    /// Cache server address as host:port
    #[arg(long, env = "REDIS_ADDR", default_value = "127.0.0.1:6379")]
    pub redis_addr: String,

    /// Bind address for the gRPC surface
    #[arg(long = "grpc-addr", env = "INDEXER_ADDR", default_value = "0.0.0.0:5001")]
    pub grpc_addr: SocketAddr,

    /// Bind address for the REST surface
    #[arg(long = "http-addr", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    #[arg(long, default_value_t = 10)]
    pub db_max_connections: u32,
}

impl IndexerArgs {
    pub fn postgres_dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password.expose(),
            self.postgres_host,
            self.postgres_port,
            self.postgres_db,
        )
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}", self.redis_addr)
    }
}

/// String wrapper that keeps credentials out of debug output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}
