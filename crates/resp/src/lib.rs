//! RESP (REdis Serialization Protocol) support library
//!
//! Implements frame-level reply decoding and request encoding for a RESP
//! client. Replies surface one frame at a time; array replies yield a
//! header frame and the caller folds the following frames into the nested
//! structure itself.

mod command;
mod encoder;
mod reply;

pub use command::{Command, CommandArg};
pub use encoder::{encode_command, encode_to_vec};
pub use reply::{Reply, ReplyReader, DEFAULT_MAX_BULK_SIZE};

use std::io;

/// RESP framing error
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("frame too large: {0} bytes (max: {1} bytes)")]
    FrameTooLarge(usize, usize),
    #[error("invalid RESP type: {0}")]
    InvalidType(u8),
}
