//! Frame round-trip tests
//!
//! A command built from any argument family must survive encoding followed
//! by a server-side read of the request frame: one array header, then one
//! bulk blob per element, the first being the lowercased name.

use std::collections::HashMap;

use bytes::Bytes;
use resp::{encode_to_vec, Command, Reply, ReplyReader};

/// Reference server-side decode of one request frame.
async fn read_command(frame: &[u8]) -> (String, Vec<Bytes>) {
    let mut reader = ReplyReader::new(frame);
    let header = reader.read_reply().await.unwrap();
    let Reply::Array { len } = header else {
        panic!("expected array header, got {:?}", header);
    };
    assert!(len > 0, "request frame without elements");
    let mut blobs = Vec::with_capacity(len);
    for _ in 0..len {
        let blob = reader.read_reply().await.unwrap();
        let Reply::Bulk(data) = blob else {
            panic!("expected bulk blob, got {:?}", blob);
        };
        blobs.push(data);
    }
    let name = String::from_utf8(blobs.remove(0).to_vec()).unwrap();
    (name, blobs)
}

async fn assert_roundtrip(cmd: Command) {
    let frame = encode_to_vec(&cmd);
    let (name, blobs) = read_command(&frame).await;
    assert_eq!(name, cmd.name());
    assert_eq!(blobs, cmd.args());
}

#[tokio::test]
async fn test_text_arguments() {
    assert_roundtrip(Command::new("ECHO").arg("Hello, World!")).await;
    assert_roundtrip(Command::new("set").arg("key").arg("")).await;
    assert_roundtrip(Command::new("mget").arg(vec!["a", "b", "c"])).await;
}

#[tokio::test]
async fn test_byte_arguments() {
    // Binary payloads, embedded CRLF included, pass through verbatim.
    let raw: &[u8] = &[0, 159, 146, 150, b'\r', b'\n', 7];
    assert_roundtrip(Command::new("set").arg("blob").arg(raw)).await;
    assert_roundtrip(Command::new("append").arg("blob").arg(Bytes::from_static(b"\x00\xff"))).await;
}

#[tokio::test]
async fn test_integer_arguments() {
    assert_roundtrip(Command::new("incrby").arg("counter").arg(-42_i64)).await;
    assert_roundtrip(Command::new("setrange").arg("k").arg(0_i32).arg("x")).await;
    assert_roundtrip(Command::new("getrange").arg("k").arg(u64::MAX)).await;
    assert_roundtrip(Command::new("expire").arg("k").arg(i64::MIN)).await;
}

#[tokio::test]
async fn test_float_arguments() {
    assert_roundtrip(Command::new("incrbyfloat").arg("k").arg(1.5_f64)).await;
    assert_roundtrip(Command::new("zincrby").arg("z").arg(-0.125_f64).arg("m")).await;
    assert_roundtrip(Command::new("zadd").arg("z").arg(0.25_f32).arg("m")).await;
}

#[tokio::test]
async fn test_hash_arguments() {
    let mut fields = HashMap::new();
    fields.insert("a".to_string(), "foo".to_string());
    fields.insert("b".to_string(), "4711".to_string());

    let cmd = Command::new("hmset").arg("h").arg(fields.clone());
    let frame = encode_to_vec(&cmd);
    let (name, blobs) = read_command(&frame).await;
    assert_eq!(name, "hmset");
    assert_eq!(blobs, cmd.args());

    // The blobs after the key reconstruct the map exactly, whatever the
    // iteration order was.
    assert_eq!(blobs.len(), 1 + fields.len() * 2);
    let mut recovered = HashMap::new();
    for pair in blobs[1..].chunks(2) {
        recovered.insert(
            String::from_utf8(pair[0].to_vec()).unwrap(),
            String::from_utf8(pair[1].to_vec()).unwrap(),
        );
    }
    assert_eq!(recovered, fields);
}

#[tokio::test]
async fn test_mixed_arguments() {
    let mut fields = HashMap::new();
    fields.insert("score".to_string(), "1.5".to_string());
    let cmd = Command::new("STORE")
        .arg("key")
        .arg(4711_u32)
        .arg(-1_i64)
        .arg(2.5_f64)
        .arg(true)
        .arg(vec!["x".to_string(), "y".to_string()])
        .arg(fields);
    assert_roundtrip(cmd).await;
}
