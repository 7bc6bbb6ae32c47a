//! Batched command dispatch
//!
//! A pipeline queues commands on one connection without waiting for their
//! replies; `collect` then drains one result per queued command, in order.
//! Strictly an idle-mode optimization: subscribe commands are rejected.

use resp::Command;
use tokio::sync::oneshot;

use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::result::ResultSet;
use crate::states::is_subscribe_name;

pub struct Pipeline {
    conn: Option<Connection>,
    pending: Vec<oneshot::Receiver<Result<ResultSet>>>,
}

impl Pipeline {
    pub(crate) fn new(conn: Connection) -> Pipeline {
        Pipeline {
            conn: Some(conn),
            pending: Vec::new(),
        }
    }

    /// Queues one command without awaiting its reply.
    pub async fn cmd(&mut self, command: Command) -> Result<()> {
        if is_subscribe_name(command.name()) {
            return Err(Error::UseSubscription(command.name().to_string()));
        }
        let conn = self.conn.as_ref().ok_or(Error::ConnectionClosed)?;
        let rx = conn.dispatch(command, None).await?;
        self.pending.push(rx);
        Ok(())
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Collects one result per queued command, in dispatch order. A failed
    /// command occupies its slot; later slots are still drained. The
    /// connection goes back to the pool afterwards.
    pub async fn collect(mut self) -> Vec<Result<ResultSet>> {
        let mut results = Vec::with_capacity(self.pending.len());
        for rx in self.pending.drain(..) {
            results.push(match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionClosed),
            });
        }
        if let Some(conn) = self.conn.take() {
            conn.ret();
        }
        results
    }
}
