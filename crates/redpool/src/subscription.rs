//! Publish/subscribe conversation
//!
//! A subscription owns a force-pulled connection in subscribed mode. The
//! backend pushes publishings into the delivery queue; `pop` consumes them.
//! Closing destroys the connection; force-pulled connections never return
//! to the pool.

use resp::Command;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::states::contains_pattern;
use crate::value::PublishedValue;

/// Publishings buffered between the backend and the consumer; the backend
/// blocks once this fills up (backpressure).
const PUBLISHING_QUEUE_SIZE: usize = 64;

pub struct Subscription {
    conn: Option<Connection>,
    publishings: mpsc::Receiver<PublishedValue>,
    sender: mpsc::Sender<PublishedValue>,
}

impl Subscription {
    pub(crate) fn new(conn: Connection) -> Subscription {
        let (sender, publishings) = mpsc::channel(PUBLISHING_QUEUE_SIZE);
        Subscription {
            conn: Some(conn),
            publishings,
            sender,
        }
    }

    /// Adds channels to the subscription and waits for the first control
    /// ack. When any channel contains glob metacharacters the command is
    /// promoted to `psubscribe`. Acks for additional channels of the same
    /// call are delivered through the queue as control values.
    pub async fn subscribe(&mut self, channels: &[&str]) -> Result<()> {
        self.sub_unsub("subscribe", channels).await
    }

    /// Removes channels from the subscription; pattern channels promote
    /// the command to `punsubscribe`.
    pub async fn unsubscribe(&mut self, channels: &[&str]) -> Result<()> {
        self.sub_unsub("unsubscribe", channels).await
    }

    async fn sub_unsub(&mut self, name: &str, channels: &[&str]) -> Result<()> {
        let pattern = channels.iter().any(|channel| contains_pattern(channel));
        let command_name = if pattern {
            format!("p{}", name)
        } else {
            name.to_string()
        };
        let mut command = Command::new(&command_name);
        for channel in channels {
            command = command.arg(*channel);
        }
        let conn = self.conn.as_ref().ok_or(Error::ConnectionClosed)?;
        let rx = conn.dispatch(command, Some(self.sender.clone())).await?;
        match rx.await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Waits for the next published value; `None` once the subscription
    /// has been closed or its connection died.
    pub async fn pop(&mut self) -> Option<PublishedValue> {
        let conn = self.conn.as_ref()?;
        // The subscription keeps a sender clone for control commands, so
        // queue closure alone cannot signal the end; watch the backend too.
        // Queued values win over a dead backend until they are drained.
        tokio::select! {
            biased;
            value = self.publishings.recv() => value,
            _ = conn.closed() => self.publishings.try_recv().ok(),
        }
    }

    /// Ends the subscription and destroys its connection.
    pub async fn close(mut self) {
        if let Some(conn) = self.conn.take() {
            // Best effort; the connection goes away right after.
            if let Ok(ack) = conn
                .dispatch(Command::new("punsubscribe"), Some(self.sender.clone()))
                .await
            {
                drop(ack);
            }
            // Drain control acks still sitting in the queue so the backend
            // is not left blocked on delivery.
            while self.publishings.try_recv().is_ok() {}
            conn.kill();
        }
    }
}
