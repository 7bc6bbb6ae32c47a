//! Connection backend
//!
//! One connection owns a socket split into a receiver task (frames in) and
//! a backend task (the state machine), plus the caller-facing handle. The
//! backend multiplexes its request inbox with the receiver's frame channel;
//! the inbox is only polled in states that accept requests, which keeps a
//! single reply tree in flight at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Instant;

use resp::{Command, Reply, ReplyReader, RespError};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::debug;

use crate::database::{Config, Network};
use crate::errors::{Error, Result};
use crate::logging::{log_command, log_timing};
use crate::pool::PoolShared;
use crate::result::ResultSet;
use crate::states::{is_subscribe_name, ConnState, RequestEnv, Wire};
use crate::value::PublishedValue;

pub(crate) trait Socket: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Socket for T {}
pub(crate) type BoxedSocket = Box<dyn Socket>;

/// Frames buffered between receiver and backend.
const REPLY_CHANNEL_SIZE: usize = 25;
/// Requests buffered in the inbox; pipelines queue against this.
const REQUEST_CHANNEL_SIZE: usize = 32;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One pooled connection to the server.
///
/// Obtained from [`crate::Database::connection`]; give it back with
/// [`Connection::ret`] when done. A connection whose backend died is
/// destroyed on return instead of being pooled again.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    requests: mpsc::Sender<RequestEnv>,
    close: mpsc::Sender<()>,
    pool: Weak<PoolShared>,
    logging: bool,
    monitoring: bool,
}

impl Connection {
    /// Dials, spawns the receiver and backend tasks and runs the
    /// authentication and selection handshake.
    pub(crate) async fn connect(config: &Config, pool: Weak<PoolShared>) -> Result<Connection> {
        let socket = dial(config).await?;
        let (read_half, write_half) = tokio::io::split(socket);

        let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_SIZE);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(receiver_loop(read_half, reply_tx, stop_rx));
        tokio::spawn(
            Backend {
                requests: request_rx,
                replies: reply_rx,
                close: close_rx,
                wire: Wire::new(write_half),
                state: ConnState::Idle,
                _receiver_stop: stop_tx,
            }
            .run(),
        );

        let conn = Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            requests: request_tx,
            close: close_tx,
            pool,
            logging: config.logging,
            monitoring: config.monitoring,
        };
        conn.handshake(config).await?;
        Ok(conn)
    }

    async fn handshake(&self, config: &Config) -> Result<()> {
        if !config.password.is_empty() {
            let auth = Command::new("auth").arg(config.password.as_str());
            if let Err(err) = self.execute(auth).await {
                self.destroy();
                return Err(Error::Authenticate(Box::new(err)));
            }
        }
        let select = Command::new("select").arg(config.index);
        if let Err(err) = self.execute(select).await {
            self.destroy();
            return Err(Error::SelectDatabase(Box::new(err)));
        }
        Ok(())
    }

    /// Executes one command and waits for its complete result tree.
    ///
    /// Subscribe-family commands are rejected; use a
    /// [`crate::Subscription`] for those.
    pub async fn execute(&self, command: Command) -> Result<ResultSet> {
        if is_subscribe_name(command.name()) {
            return Err(Error::UseSubscription(command.name().to_string()));
        }
        let repr = command.to_string();
        let name = command.name().to_string();
        let started = self.monitoring.then(Instant::now);

        let result = match self.dispatch(command, None).await {
            Ok(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionClosed),
            },
            Err(err) => Err(err),
        };

        log_command(&repr, &result, self.logging);
        if let Some(started) = started {
            log_timing(&name, started.elapsed());
        }
        result
    }

    /// Sends a request envelope without waiting for its reply.
    pub(crate) async fn dispatch(
        &self,
        command: Command,
        publishings: Option<mpsc::Sender<PublishedValue>>,
    ) -> Result<oneshot::Receiver<Result<ResultSet>>> {
        let (tx, rx) = oneshot::channel();
        let env = RequestEnv {
            command,
            response: tx,
            publishings,
        };
        self.requests
            .send(env)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(rx)
    }

    /// Returns the connection to its pool; broken connections are
    /// destroyed instead.
    pub fn ret(self) {
        if let Some(pool) = self.pool.upgrade() {
            PoolShared::push(&pool, self);
        } else {
            self.destroy();
        }
    }

    /// Removes the connection from its pool and closes it.
    pub(crate) fn kill(self) {
        if let Some(pool) = self.pool.upgrade() {
            PoolShared::discard(&pool, self);
        } else {
            self.destroy();
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn close_signal(&self) -> mpsc::Sender<()> {
        self.close.clone()
    }

    /// The backend is still alive and taking requests.
    pub(crate) fn is_healthy(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Completes once the backend has stopped taking requests.
    pub(crate) async fn closed(&self) {
        self.requests.closed().await
    }

    pub(crate) fn destroy(&self) {
        let _ = self.close.try_send(());
    }
}

async fn dial(config: &Config) -> Result<BoxedSocket> {
    let connect = async {
        match config.network {
            Network::Tcp => TcpStream::connect(&config.address)
                .await
                .map(|stream| Box::new(stream) as BoxedSocket),
            #[cfg(unix)]
            Network::Unix => UnixStream::connect(&config.address)
                .await
                .map(|stream| Box::new(stream) as BoxedSocket),
            #[cfg(not(unix))]
            Network::Unix => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    };
    match timeout(config.connect_timeout, connect).await {
        Ok(Ok(socket)) => Ok(socket),
        Ok(Err(err)) => Err(Error::ConnectionEstablishing(err)),
        Err(_) => Err(Error::ConnectionEstablishing(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ))),
    }
}

/// Reads frames off the socket until the backend goes away or the stream
/// fails; a framing failure is forwarded once and ends the task, since the
/// stream cannot be resynchronized afterwards.
async fn receiver_loop(
    read: ReadHalf<BoxedSocket>,
    replies: mpsc::Sender<std::result::Result<Reply, RespError>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut reader = ReplyReader::new(read);
    loop {
        let reply = tokio::select! {
            _ = &mut stop => return,
            reply = reader.read_reply() => reply,
        };
        let failed = reply.is_err();
        if replies.send(reply).await.is_err() {
            return;
        }
        if failed {
            return;
        }
    }
}

struct Backend {
    requests: mpsc::Receiver<RequestEnv>,
    replies: mpsc::Receiver<std::result::Result<Reply, RespError>>,
    close: mpsc::Receiver<()>,
    wire: Wire<WriteHalf<BoxedSocket>>,
    state: ConnState,
    // Dropping this wakes the receiver task so it can exit.
    _receiver_stop: oneshot::Sender<()>,
}

impl Backend {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                request = self.requests.recv(), if self.state.accepts_requests() => {
                    match request {
                        Some(request) => {
                            let state = std::mem::replace(&mut self.state, ConnState::Idle);
                            state.on_request(&mut self.wire, request).await
                        }
                        // Every handle is gone.
                        None => break,
                    }
                }
                reply = self.replies.recv() => {
                    match reply {
                        Some(reply) => {
                            let state = std::mem::replace(&mut self.state, ConnState::Idle);
                            state.on_reply(reply).await
                        }
                        None => break,
                    }
                }
                _ = self.close.recv() => break,
            };
            match step {
                Ok(next) => self.state = next,
                Err(err) => {
                    debug!(error = %err, "connection backend stopping");
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Wakes every pending caller with the close error.
    fn shutdown(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnState::Idle);
        state.abort(|| Error::ConnectionClosed);
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.response.send(Err(Error::ConnectionClosed));
        }
    }
}
