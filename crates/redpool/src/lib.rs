//! Pooled client core for a RESP data store
//!
//! The core is the connection substrate: it serializes commands into the
//! wire protocol, folds server replies into result trees, multiplexes
//! single-command, pipelined and publish/subscribe conversations over one
//! socket abstraction, and manages a bounded connection pool.
//!
//! ```no_run
//! use redpool::{Command, Config, Database};
//!
//! # async fn run() -> redpool::Result<()> {
//! let db = Database::open(Config::default())?;
//! let conn = db.connection().await?;
//! let result = conn.execute(Command::new("get").arg("key")).await?;
//! println!("{}", result.string_at(0)?);
//! conn.ret();
//! db.close();
//! # Ok(())
//! # }
//! ```

mod connection;
mod database;
mod errors;
mod logging;
mod pipeline;
mod pool;
mod result;
mod states;
mod subscription;
mod value;

pub use connection::Connection;
pub use database::{Config, Database, Network};
pub use errors::{Error, Result};
pub use pipeline::Pipeline;
pub use result::ResultSet;
pub use subscription::Subscription;
pub use value::{Hash, KeyValue, PublishedKind, PublishedValue, ScoredValue, Value};

pub use resp::{Command, CommandArg};
