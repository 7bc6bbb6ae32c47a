//! Polymorphic command construction
//!
//! A command is the lowercased name plus a flat list of argument blobs.
//! Each argument contributes one or more blobs; key-value containers expand
//! to alternating key and value blobs in place, so the declared element
//! count of the request frame always matches the emitted blob count.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

/// One request: command name plus argument blobs.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Creates a command; the name is sent lowercased.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            args: Vec::new(),
        }
    }

    /// Appends an argument, expanding containers to their blobs.
    pub fn arg(mut self, arg: impl CommandArg) -> Self {
        arg.append_to(&mut self.args);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of length-prefixed blobs on the wire, name included.
    pub fn blob_count(&self) -> usize {
        1 + self.args.len()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// Serialization seam for command arguments: anything that can emit itself
/// as one or more argument blobs.
pub trait CommandArg {
    fn append_to(&self, out: &mut Vec<Bytes>);
}

impl<T: CommandArg + ?Sized> CommandArg for &T {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        (**self).append_to(out);
    }
}

impl CommandArg for str {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(Bytes::copy_from_slice(self.as_bytes()));
    }
}

impl CommandArg for String {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(Bytes::copy_from_slice(self.as_bytes()));
    }
}

impl CommandArg for [u8] {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(Bytes::copy_from_slice(self));
    }
}

impl CommandArg for Vec<u8> {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(Bytes::copy_from_slice(self));
    }
}

impl CommandArg for Bytes {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(self.clone());
    }
}

impl CommandArg for bool {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(Bytes::from(self.to_string()));
    }
}

// Numbers are emitted as their decimal text; floats use the shortest
// round-tripping form the standard formatter produces.
macro_rules! number_arg {
    ($($ty:ty),*) => {
        $(impl CommandArg for $ty {
            fn append_to(&self, out: &mut Vec<Bytes>) {
                out.push(Bytes::from(self.to_string()));
            }
        })*
    };
}

number_arg!(i16, i32, i64, isize, u16, u32, u64, usize, f32, f64);

// Text sequences flatten to one blob per element.
impl CommandArg for [&str] {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        for item in self {
            item.append_to(out);
        }
    }
}

impl CommandArg for Vec<&str> {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        for item in self {
            item.append_to(out);
        }
    }
}

impl CommandArg for [String] {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        for item in self {
            item.append_to(out);
        }
    }
}

impl CommandArg for Vec<String> {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        for item in self {
            item.append_to(out);
        }
    }
}

impl<K: CommandArg, V: CommandArg, S> CommandArg for HashMap<K, V, S> {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        for (key, value) in self {
            key.append_to(out);
            value.append_to(out);
        }
    }
}
