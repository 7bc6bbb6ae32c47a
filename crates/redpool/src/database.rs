//! Database handle and configuration
//!
//! The handle is a configured factory over one connection pool; it vends
//! connections, pipelines and subscriptions and closes the pool.

use std::time::Duration;

use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::pipeline::Pipeline;
use crate::pool::Pool;
use crate::subscription::Subscription;

/// Transport the client dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
}

/// Client configuration; every tunable of the core.
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` for TCP, socket path for Unix.
    pub address: String,
    pub network: Network,
    /// Deadline for the initial dial.
    pub connect_timeout: Duration,
    /// Server-side database slot selected after connecting.
    pub index: u32,
    /// Credential for `auth`; empty disables authentication.
    pub password: String,
    /// Connection cap of the pool.
    pub pool_size: usize,
    /// Emit one log line per executed command.
    pub logging: bool,
    /// Time each command and emit the elapsed duration.
    pub monitoring: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            network: Network::Tcp,
            connect_timeout: Duration::from_secs(5),
            index: 0,
            password: String::new(),
            pool_size: 10,
            logging: false,
            monitoring: false,
        }
    }
}

impl Config {
    /// Configuration for the default local Unix stream socket.
    pub fn unix() -> Self {
        Self {
            address: "/tmp/redis.sock".to_string(),
            network: Network::Unix,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "address",
                reason: "must not be empty".to_string(),
            });
        }
        if self.pool_size == 0 {
            return Err(Error::InvalidConfiguration {
                field: "pool_size",
                reason: "must be positive".to_string(),
            });
        }
        #[cfg(not(unix))]
        if self.network == Network::Unix {
            return Err(Error::InvalidConfiguration {
                field: "network",
                reason: "unix sockets are not available on this platform".to_string(),
            });
        }
        Ok(())
    }
}

/// Access to one server database through a bounded connection pool.
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Validates the configuration and opens the handle. Connections are
    /// established lazily on the first pull.
    pub fn open(config: Config) -> Result<Database> {
        config.validate()?;
        Ok(Database {
            pool: Pool::new(config),
        })
    }

    /// One pooled connection; return it with [`Connection::ret`].
    pub async fn connection(&self) -> Result<Connection> {
        self.pool.pull(false).await
    }

    /// A pipeline over a pooled connection; the connection returns on
    /// [`Pipeline::collect`].
    pub async fn pipeline(&self) -> Result<Pipeline> {
        Ok(Pipeline::new(self.pool.pull(false).await?))
    }

    /// A subscription over a force-pulled connection; close it with
    /// [`Subscription::close`].
    pub async fn subscription(&self) -> Result<Subscription> {
        Ok(Subscription::new(self.pool.pull(true).await?))
    }

    /// Closes the pool; in-flight work fails with `ConnectionClosed`.
    pub fn close(&self) {
        self.pool.close();
    }
}
