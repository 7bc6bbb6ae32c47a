//! In-process RESP server emulator backing the integration tests.
//!
//! Speaks just enough of the protocol for the client scenarios: strings,
//! hashes, blocking-pop timeouts and publish/subscribe with simple
//! prefix-glob patterns.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

pub struct MockServer {
    addr: String,
}

struct Shared {
    password: Option<String>,
    store: Mutex<Store>,
}

#[derive(Default)]
struct Store {
    strings: HashMap<String, Vec<u8>>,
    hashes: HashMap<String, Vec<(String, Vec<u8>)>>,
    subscribers: HashMap<u64, Subscriber>,
}

struct Subscriber {
    channels: HashSet<String>,
    patterns: HashSet<String>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockServer {
    pub async fn start() -> MockServer {
        Self::with_password(None).await
    }

    pub async fn with_password(password: Option<&str>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shared = Arc::new(Shared {
            password: password.map(str::to_string),
            store: Mutex::new(Store::default()),
        });
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_client(stream, shared.clone()));
            }
        });
        MockServer { addr }
    }

    pub fn address(&self) -> &str {
        &self.addr
    }
}

async fn handle_client(stream: TcpStream, shared: Arc<Shared>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let (read, mut write) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if write.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read);
    let mut authenticated = shared.password.is_none();
    while let Some(args) = read_command(&mut reader).await {
        if args.is_empty() {
            break;
        }
        let name = String::from_utf8_lossy(&args[0]).to_lowercase();
        if !authenticated && name != "auth" {
            let _ = outbound.send(error_reply("NOAUTH Authentication required."));
            continue;
        }
        let reply = match name.as_str() {
            "auth" => {
                if shared.password.as_deref() == Some(text(&args[1]).as_str()) {
                    authenticated = true;
                    simple("OK")
                } else {
                    error_reply("ERR invalid password")
                }
            }
            "select" => simple("OK"),
            "ping" => simple("PONG"),
            "echo" => bulk(&args[1]),
            "set" => {
                let mut store = shared.store.lock();
                store.strings.insert(text(&args[1]), args[2].clone());
                simple("OK")
            }
            "get" => {
                let store = shared.store.lock();
                match store.strings.get(&text(&args[1])) {
                    Some(value) => bulk(value),
                    None => nil_bulk(),
                }
            }
            "del" => {
                let mut store = shared.store.lock();
                let mut removed = 0;
                for key in &args[1..] {
                    if store.strings.remove(&text(key)).is_some() {
                        removed += 1;
                    }
                    if store.hashes.remove(&text(key)).is_some() {
                        removed += 1;
                    }
                }
                integer(removed)
            }
            "hset" => {
                let mut store = shared.store.lock();
                let fields = store.hashes.entry(text(&args[1])).or_default();
                let field = text(&args[2]);
                match fields.iter_mut().find(|(name, _)| *name == field) {
                    Some(entry) => {
                        entry.1 = args[3].clone();
                        integer(0)
                    }
                    None => {
                        fields.push((field, args[3].clone()));
                        integer(1)
                    }
                }
            }
            "hgetall" => {
                let store = shared.store.lock();
                let mut frame = Vec::new();
                match store.hashes.get(&text(&args[1])) {
                    Some(fields) => {
                        frame.extend(array_header(fields.len() * 2));
                        for (field, value) in fields {
                            frame.extend(bulk(field.as_bytes()));
                            frame.extend(bulk(value));
                        }
                    }
                    None => frame.extend(array_header(0)),
                }
                frame
            }
            "flushdb" => {
                let mut store = shared.store.lock();
                store.strings.clear();
                store.hashes.clear();
                simple("OK")
            }
            "brpop" => {
                // Nothing ever arrives; report the blocking timeout marker.
                tokio::time::sleep(Duration::from_millis(100)).await;
                b"*-1\r\n".to_vec()
            }
            "publish" => {
                let channel = text(&args[1]);
                let payload = &args[2];
                let store = shared.store.lock();
                let mut receivers = 0;
                for subscriber in store.subscribers.values() {
                    if subscriber.channels.contains(&channel) {
                        let mut frame = array_header(3);
                        frame.extend(bulk(b"message"));
                        frame.extend(bulk(channel.as_bytes()));
                        frame.extend(bulk(payload));
                        if subscriber.outbound.send(frame).is_ok() {
                            receivers += 1;
                        }
                    }
                    for pattern in &subscriber.patterns {
                        if glob_match(pattern, &channel) {
                            let mut frame = array_header(4);
                            frame.extend(bulk(b"pmessage"));
                            frame.extend(bulk(pattern.as_bytes()));
                            frame.extend(bulk(channel.as_bytes()));
                            frame.extend(bulk(payload));
                            if subscriber.outbound.send(frame).is_ok() {
                                receivers += 1;
                            }
                        }
                    }
                }
                integer(receivers)
            }
            "subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe" => {
                subscription_command(&shared, client_id, &outbound, &name, &args[1..])
            }
            other => error_reply(&format!("ERR unknown command '{}'", other)),
        };
        let _ = outbound.send(reply);
    }

    shared.store.lock().subscribers.remove(&client_id);
    drop(outbound);
    let _ = writer.await;
}

/// Registers the subscription change and returns the ack frames; one ack
/// per named channel, as the real server does.
fn subscription_command(
    shared: &Arc<Shared>,
    client_id: u64,
    outbound: &mpsc::UnboundedSender<Vec<u8>>,
    name: &str,
    channels: &[Vec<u8>],
) -> Vec<u8> {
    let mut store = shared.store.lock();
    let subscriber = store.subscribers.entry(client_id).or_insert_with(|| Subscriber {
        channels: HashSet::new(),
        patterns: HashSet::new(),
        outbound: outbound.clone(),
    });
    let mut acks = Vec::new();
    let mut ack = |subscriber: &Subscriber, channel: Option<&str>| {
        let mut frame = array_header(3);
        frame.extend(bulk(name.as_bytes()));
        match channel {
            Some(channel) => frame.extend(bulk(channel.as_bytes())),
            None => frame.extend(nil_bulk()),
        }
        frame.extend(integer(
            (subscriber.channels.len() + subscriber.patterns.len()) as i64,
        ));
        acks.extend(frame);
    };
    if channels.is_empty() {
        ack(subscriber, None);
        return acks;
    }
    for channel in channels {
        let channel = text(channel);
        match name {
            "subscribe" => {
                subscriber.channels.insert(channel.clone());
            }
            "psubscribe" => {
                subscriber.patterns.insert(channel.clone());
            }
            "unsubscribe" => {
                subscriber.channels.remove(&channel);
            }
            "punsubscribe" => {
                subscriber.patterns.remove(&channel);
            }
            _ => {}
        }
        ack(subscriber, Some(&channel));
    }
    acks
}

/// Prefix globs are all the tests need.
fn glob_match(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<Vec<Vec<u8>>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim().strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let mut header = String::new();
        reader.read_line(&mut header).await.ok()?;
        let len: usize = header.trim().strip_prefix('$')?.parse().ok()?;
        let mut payload = vec![0u8; len + 2];
        reader.read_exact(&mut payload).await.ok()?;
        payload.truncate(len);
        args.push(payload);
    }
    Some(args)
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn simple(text: &str) -> Vec<u8> {
    format!("+{}\r\n", text).into_bytes()
}

fn error_reply(text: &str) -> Vec<u8> {
    format!("-{}\r\n", text).into_bytes()
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut frame = format!("${}\r\n", data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");
    frame
}

fn nil_bulk() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn array_header(len: usize) -> Vec<u8> {
    format!("*{}\r\n", len).into_bytes()
}
