//! RESP request encoder

use bytes::{BufMut, BytesMut};

use crate::Command;

/// Encodes one command as a request frame:
/// `*<n>\r\n$<len>\r\n<blob>\r\n...` with the lowercased name first.
pub fn encode_command(cmd: &Command, buf: &mut BytesMut) {
    write_header(buf, b'*', cmd.blob_count());
    write_blob(buf, cmd.name().as_bytes());
    for arg in cmd.args() {
        write_blob(buf, arg);
    }
}

/// Encodes into a fresh byte vector (for testing)
pub fn encode_to_vec(cmd: &Command) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_command(cmd, &mut buf);
    buf.to_vec()
}

fn write_header(buf: &mut BytesMut, marker: u8, value: usize) {
    buf.put_u8(marker);
    buf.put_slice(value.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

fn write_blob(buf: &mut BytesMut, data: &[u8]) {
    write_header(buf, b'$', data.len());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}
