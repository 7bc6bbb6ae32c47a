//! Connection state machine
//!
//! A connection is always in exactly one conversation state; the state
//! decides how an outbound request and an inbound frame are handled. Each
//! handler consumes the state and returns the next one; a returned error is
//! fatal and ends the connection backend.

use bytes::BytesMut;
use resp::{encode_command, Command, Reply, RespError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::errors::{Error, Result};
use crate::result::{ResultAssembler, ResultSet};
use crate::value::{PublishedValue, Value};

/// Request envelope travelling from a caller into the backend.
pub(crate) struct RequestEnv {
    pub command: Command,
    pub response: oneshot::Sender<Result<ResultSet>>,
    /// Delivery queue for publishings; present on subscribe-family requests.
    pub publishings: Option<mpsc::Sender<PublishedValue>>,
}

/// Socket write side plus its reusable encode buffer.
pub(crate) struct Wire<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> Wire<W> {
    pub fn new(writer: W) -> Wire<W> {
        Wire {
            writer,
            buf: BytesMut::with_capacity(256),
        }
    }

    async fn send(&mut self, command: &Command) -> std::io::Result<()> {
        self.buf.clear();
        encode_command(command, &mut self.buf);
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await
    }
}

type ResponseSender = oneshot::Sender<Result<ResultSet>>;
type Publishings = mpsc::Sender<PublishedValue>;

pub(crate) enum ConnState {
    /// No conversation; the next request selects the mode.
    Idle,
    /// One command written, its reply tree assembling.
    AwaitingResult {
        command: String,
        response: ResponseSender,
        asm: ResultAssembler,
    },
    /// A subscribe-family command written, its ack tree assembling.
    EnteringSubscription {
        command: String,
        response: ResponseSender,
        publishings: Publishings,
        asm: ResultAssembler,
    },
    /// Long-lived subscription; inbound trees are publishings.
    Subscribed {
        publishings: Publishings,
        asm: ResultAssembler,
    },
}

impl ConnState {
    /// The backend only polls its request inbox in states that may write a
    /// new command; this serializes requests against in-flight replies.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ConnState::Idle | ConnState::Subscribed { .. })
    }

    /// Handles one outbound request and returns the next state.
    pub async fn on_request<W: AsyncWrite + Unpin>(
        self,
        wire: &mut Wire<W>,
        request: RequestEnv,
    ) -> Result<ConnState> {
        let RequestEnv {
            command,
            response,
            publishings: queue,
        } = request;
        match self {
            ConnState::Idle => {
                if is_subscribe_name(command.name()) {
                    let Some(queue) = queue else {
                        // Subscribe commands only travel through subscriptions.
                        let _ = response.send(Err(Error::UseSubscription(
                            command.name().to_string(),
                        )));
                        return Ok(ConnState::Idle);
                    };
                    let response = write_command(wire, &command, response).await?;
                    Ok(ConnState::EnteringSubscription {
                        command: command.name().to_string(),
                        response,
                        publishings: queue,
                        asm: ResultAssembler::new(),
                    })
                } else {
                    let response = write_command(wire, &command, response).await?;
                    Ok(ConnState::AwaitingResult {
                        command: command.name().to_string(),
                        response,
                        asm: ResultAssembler::new(),
                    })
                }
            }
            ConnState::Subscribed { publishings, asm } => {
                if !is_subscribe_name(command.name()) {
                    let _ = response.send(Err(Error::UnexpectedRequest(
                        command.name().to_string(),
                    )));
                    return Ok(ConnState::Subscribed { publishings, asm });
                }
                let response = write_command(wire, &command, response).await?;
                Ok(ConnState::EnteringSubscription {
                    command: command.name().to_string(),
                    response,
                    publishings: queue.unwrap_or(publishings),
                    asm: ResultAssembler::new(),
                })
            }
            // The inbox is gated while a reply is in flight; a request here
            // is a caller error, not a connection failure.
            state => {
                let _ = response.send(Err(Error::UnexpectedRequest(
                    command.name().to_string(),
                )));
                Ok(state)
            }
        }
    }

    /// Handles one inbound frame (or the receiver's failure) and returns
    /// the next state.
    pub async fn on_reply(
        self,
        reply: std::result::Result<Reply, RespError>,
    ) -> Result<ConnState> {
        match self {
            ConnState::Idle => Err(Error::InvalidResponse(format!(
                "unexpected reply while idle: {:?}",
                reply
            ))),
            ConnState::AwaitingResult {
                command,
                response,
                mut asm,
            } => match reply {
                Err(err) => {
                    let _ = response.send(Err(Error::ConnectionBroken(err.to_string())));
                    Err(Error::ConnectionBroken(err.to_string()))
                }
                Ok(Reply::Timeout) => {
                    let _ = response.send(Err(Error::Timeout(command)));
                    Ok(ConnState::Idle)
                }
                Ok(Reply::Error(message)) => {
                    let _ = response.send(Err(Error::ServerResponse(
                        String::from_utf8_lossy(&message).into_owned(),
                    )));
                    Ok(ConnState::Idle)
                }
                Ok(reply) => match feed(&mut asm, reply) {
                    Some(result) => {
                        let _ = response.send(Ok(result));
                        Ok(ConnState::Idle)
                    }
                    None => Ok(ConnState::AwaitingResult {
                        command,
                        response,
                        asm,
                    }),
                },
            },
            ConnState::EnteringSubscription {
                command,
                response,
                publishings,
                mut asm,
            } => match reply {
                Err(err) => {
                    let _ = response.send(Err(Error::ConnectionBroken(err.to_string())));
                    Err(Error::ConnectionBroken(err.to_string()))
                }
                Ok(Reply::Timeout) => {
                    let _ = response.send(Err(Error::Timeout(command)));
                    Ok(ConnState::Idle)
                }
                Ok(Reply::Error(message)) => {
                    let _ = response.send(Err(Error::ServerResponse(
                        String::from_utf8_lossy(&message).into_owned(),
                    )));
                    Ok(ConnState::Idle)
                }
                Ok(reply) => match feed(&mut asm, reply) {
                    Some(result) => {
                        let _ = response.send(Ok(result));
                        Ok(ConnState::Subscribed {
                            publishings,
                            asm: ResultAssembler::new(),
                        })
                    }
                    None => Ok(ConnState::EnteringSubscription {
                        command,
                        response,
                        publishings,
                        asm,
                    }),
                },
            },
            ConnState::Subscribed {
                publishings,
                mut asm,
            } => match reply {
                Err(err) => {
                    error!(error = %err, "error receiving publishing");
                    Err(Error::ConnectionBroken(err.to_string()))
                }
                Ok(Reply::Error(message)) => {
                    // Unsolicited: no control command is in flight. Abandon
                    // the partial tree and keep the subscription alive.
                    warn!(
                        message = %String::from_utf8_lossy(&message),
                        "server error while subscribed"
                    );
                    Ok(ConnState::Subscribed {
                        publishings,
                        asm: ResultAssembler::new(),
                    })
                }
                Ok(Reply::Timeout) => {
                    warn!("ignoring timeout marker while subscribed");
                    Ok(ConnState::Subscribed { publishings, asm })
                }
                Ok(reply) => {
                    if let Some(result) = feed(&mut asm, reply) {
                        match PublishedValue::from_result(&result) {
                            Ok(value) => {
                                if publishings.send(value).await.is_err() {
                                    // Subscriber is gone; the connection has
                                    // no further use.
                                    return Err(Error::ConnectionClosed);
                                }
                            }
                            Err(err) => error!(error = %err, "invalid publishing payload"),
                        }
                    }
                    Ok(ConnState::Subscribed { publishings, asm })
                }
            },
        }
    }

    /// Wakes the pending caller, if any, when the backend stops.
    pub fn abort(self, err: impl Fn() -> Error) {
        match self {
            ConnState::AwaitingResult { response, .. }
            | ConnState::EnteringSubscription { response, .. } => {
                let _ = response.send(Err(err()));
            }
            ConnState::Idle | ConnState::Subscribed { .. } => {}
        }
    }
}

async fn write_command<W: AsyncWrite + Unpin>(
    wire: &mut Wire<W>,
    command: &Command,
    response: ResponseSender,
) -> Result<ResponseSender> {
    match wire.send(command).await {
        Ok(()) => Ok(response),
        Err(err) => {
            let broken = Error::ConnectionBroken(err.to_string());
            let _ = response.send(Err(Error::ConnectionBroken(err.to_string())));
            Err(broken)
        }
    }
}

fn feed(asm: &mut ResultAssembler, reply: Reply) -> Option<ResultSet> {
    match reply {
        Reply::Status(data) | Reply::Integer(data) | Reply::Bulk(data) => {
            asm.push_value(Value::new(data))
        }
        Reply::NullBulk => asm.push_value(Value::nil()),
        Reply::Array { len } => asm.push_array(len),
        // Handled by the states before feeding.
        Reply::Error(_) | Reply::Timeout => None,
    }
}

/// All four (un-)subscribe variants route identically.
pub(crate) fn is_subscribe_name(name: &str) -> bool {
    name.contains("subscribe")
}

/// True when a channel name holds glob metacharacters and the command must
/// be promoted to its pattern variant.
pub(crate) fn contains_pattern(channel: &str) -> bool {
    channel.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_writes_and_awaits() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut wire = Wire::new(client);
        let (tx, _rx) = oneshot::channel();
        let request = RequestEnv {
            command: Command::new("ping"),
            response: tx,
            publishings: None,
        };
        let next = ConnState::Idle.on_request(&mut wire, request).await.unwrap();
        assert!(matches!(next, ConnState::AwaitingResult { .. }));

        use tokio::io::AsyncReadExt;
        let mut written = vec![0u8; 64];
        let n = server.read(&mut written).await.unwrap();
        assert_eq!(&written[..n], b"*1\r\n$4\r\nping\r\n");
    }

    #[tokio::test]
    async fn test_subscribe_without_queue_is_rejected() {
        let (client, _server) = tokio::io::duplex(64);
        let mut wire = Wire::new(client);
        let (tx, rx) = oneshot::channel();
        let request = RequestEnv {
            command: Command::new("subscribe").arg("c"),
            response: tx,
            publishings: None,
        };
        let next = ConnState::Idle.on_request(&mut wire, request).await.unwrap();
        assert!(matches!(next, ConnState::Idle));
        assert!(rx.await.unwrap().unwrap_err().is_use_subscription());
    }

    #[tokio::test]
    async fn test_subscribed_rejects_plain_commands() {
        let (client, _server) = tokio::io::duplex(64);
        let mut wire = Wire::new(client);
        let (queue, _queue_rx) = mpsc::channel(1);
        let state = ConnState::Subscribed {
            publishings: queue,
            asm: ResultAssembler::new(),
        };
        let (tx, rx) = oneshot::channel();
        let request = RequestEnv {
            command: Command::new("get").arg("k"),
            response: tx,
            publishings: None,
        };
        let next = state.on_request(&mut wire, request).await.unwrap();
        assert!(matches!(next, ConnState::Subscribed { .. }));
        assert!(rx.await.unwrap().unwrap_err().is_unexpected_request());
    }

    #[tokio::test]
    async fn test_server_error_reply_keeps_connection() {
        let (tx, rx) = oneshot::channel();
        let state = ConnState::AwaitingResult {
            command: "get".to_string(),
            response: tx,
            asm: ResultAssembler::new(),
        };
        let next = state
            .on_reply(Ok(Reply::Error(bytes::Bytes::from("ERR wrong"))))
            .await
            .unwrap();
        assert!(matches!(next, ConnState::Idle));
        assert!(rx.await.unwrap().unwrap_err().is_server_response());
    }

    #[tokio::test]
    async fn test_timeout_marker_keeps_connection() {
        let (tx, rx) = oneshot::channel();
        let state = ConnState::AwaitingResult {
            command: "brpop".to_string(),
            response: tx,
            asm: ResultAssembler::new(),
        };
        let next = state.on_reply(Ok(Reply::Timeout)).await.unwrap();
        assert!(matches!(next, ConnState::Idle));
        assert!(rx.await.unwrap().unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_publishing_flows_into_queue() {
        let (queue, mut queue_rx) = mpsc::channel(4);
        let mut state = ConnState::Subscribed {
            publishings: queue,
            asm: ResultAssembler::new(),
        };
        for reply in [
            Reply::Array { len: 3 },
            Reply::Bulk(bytes::Bytes::from("message")),
            Reply::Bulk(bytes::Bytes::from("c1")),
            Reply::Bulk(bytes::Bytes::from("foo")),
        ] {
            state = state.on_reply(Ok(reply)).await.unwrap();
        }
        let published = queue_rx.recv().await.unwrap();
        assert_eq!(published.channel, "c1");
        assert_eq!(published.pattern, "*");
        assert_eq!(published.value.to_text(), "foo");
    }

    #[tokio::test]
    async fn test_closed_queue_ends_connection() {
        let (queue, queue_rx) = mpsc::channel(1);
        drop(queue_rx);
        let mut state = ConnState::Subscribed {
            publishings: queue,
            asm: ResultAssembler::new(),
        };
        for reply in [
            Reply::Array { len: 3 },
            Reply::Bulk(bytes::Bytes::from("message")),
            Reply::Bulk(bytes::Bytes::from("c1")),
        ] {
            state = state.on_reply(Ok(reply)).await.unwrap();
        }
        let outcome = state
            .on_reply(Ok(Reply::Bulk(bytes::Bytes::from("foo"))))
            .await;
        assert!(outcome.is_err());
    }

    #[test]
    fn test_subscribe_name_detection() {
        assert!(is_subscribe_name("subscribe"));
        assert!(is_subscribe_name("psubscribe"));
        assert!(is_subscribe_name("unsubscribe"));
        assert!(is_subscribe_name("punsubscribe"));
        assert!(!is_subscribe_name("get"));
    }

    #[test]
    fn test_pattern_detection() {
        assert!(contains_pattern("p:*"));
        assert!(contains_pattern("c?x"));
        assert!(contains_pattern("c[ab]"));
        assert!(!contains_pattern("plain"));
    }
}
