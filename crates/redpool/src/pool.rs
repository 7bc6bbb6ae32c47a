//! Connection pool
//!
//! Bounded set of connections partitioned into available and in-use. The
//! in-use side keeps a close signal per connection so `close` reaches
//! connections that are currently out, including force-pulled ones.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::Connection;
use crate::database::Config;
use crate::errors::{Error, Result};

/// Shared pool bookkeeping; connections carry a weak reference back here
/// so returning them does not keep the pool alive.
pub(crate) struct PoolShared {
    capacity: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    available: Vec<Connection>,
    in_use: HashMap<u64, mpsc::Sender<()>>,
    /// Connections being established; counted against the capacity.
    pending: usize,
    closed: bool,
}

pub(crate) struct Pool {
    config: Config,
    shared: Arc<PoolShared>,
}

impl Pool {
    pub fn new(config: Config) -> Pool {
        let capacity = config.pool_size;
        Pool {
            config,
            shared: Arc::new(PoolShared {
                capacity,
                state: Mutex::new(PoolState {
                    available: Vec::new(),
                    in_use: HashMap::new(),
                    pending: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Pulls a connection: an available one if any, a fresh one while below
    /// capacity. `forced` bypasses the capacity check; subscriptions pull
    /// forced so they cannot be starved by ordinary commands.
    pub async fn pull(&self, forced: bool) -> Result<Connection> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(Error::ConnectionClosed);
            }
            if let Some(conn) = state.available.pop() {
                state.in_use.insert(conn.id(), conn.close_signal());
                return Ok(conn);
            }
            if !forced && state.in_use.len() + state.pending >= self.shared.capacity {
                return Err(Error::PoolLimitReached(self.shared.capacity));
            }
            state.pending += 1;
        }

        let connected = Connection::connect(&self.config, Arc::downgrade(&self.shared)).await;

        let mut state = self.shared.state.lock();
        state.pending -= 1;
        match connected {
            Ok(conn) => {
                if state.closed {
                    drop(state);
                    conn.destroy();
                    return Err(Error::ConnectionClosed);
                }
                state.in_use.insert(conn.id(), conn.close_signal());
                Ok(conn)
            }
            Err(err) => Err(err),
        }
    }

    /// Closes every available and every in-use connection; in-flight work
    /// on the latter fails with `ConnectionClosed`.
    pub fn close(&self) {
        let (available, in_use) = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.available),
                std::mem::take(&mut state.in_use),
            )
        };
        debug!(
            available = available.len(),
            in_use = in_use.len(),
            "closing connection pool"
        );
        for conn in available {
            conn.destroy();
        }
        for close in in_use.into_values() {
            let _ = close.try_send(());
        }
    }
}

impl PoolShared {
    /// Returns a connection to the available side, or destroys it when the
    /// pool is full, closed, or the connection is broken.
    pub fn push(shared: &Arc<PoolShared>, conn: Connection) {
        let mut state = shared.state.lock();
        state.in_use.remove(&conn.id());
        if state.closed || !conn.is_healthy() || state.available.len() >= shared.capacity {
            drop(state);
            conn.destroy();
            return;
        }
        state.available.push(conn);
    }

    /// Removes a connection from the in-use side and closes it.
    pub fn discard(shared: &Arc<PoolShared>, conn: Connection) {
        shared.state.lock().in_use.remove(&conn.id());
        conn.destroy();
    }
}
