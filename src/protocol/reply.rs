//! `Reply` is the value type command handlers produce. It is deliberately
//! smaller than the full `RespFrame` wire grammar (mirroring the teacher's
//! `RespValue` / `RespFrame` split): handlers only need to *produce* values,
//! not parse the wire format.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<Reply>),
    Queued,
}

impl Reply {
    pub fn bulk(s: impl Into<Bytes>) -> Self {
        Reply::BulkString(s.into())
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Ok => out.put_slice(b"+OK\r\n"),
            Reply::Queued => out.put_slice(b"+QUEUED\r\n"),
            Reply::SimpleString(s) => {
                out.put_u8(b'+');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Error(e) => {
                out.put_u8(b'-');
                out.put_slice(e.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Integer(i) => {
                out.put_u8(b':');
                let mut ibuf = itoa::Buffer::new();
                out.put_slice(ibuf.format(*i).as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::BulkString(b) => {
                out.put_u8(b'$');
                let mut ibuf = itoa::Buffer::new();
                out.put_slice(ibuf.format(b.len()).as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(b);
                out.put_slice(b"\r\n");
            }
            Reply::Null => out.put_slice(b"$-1\r\n"),
            Reply::NullArray => out.put_slice(b"*-1\r\n"),
            Reply::Array(items) => {
                out.put_u8(b'*');
                let mut ibuf = itoa::Buffer::new();
                out.put_slice(ibuf.format(items.len()).as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }
}

impl From<SpinelErrorRef<'_>> for Reply {
    fn from(e: SpinelErrorRef<'_>) -> Self {
        Reply::Error(e.0.to_string())
    }
}

/// Thin wrapper to avoid a circular `impl From<&SpinelError> for Reply` in
/// `error.rs`; kept here since `Reply` already owns the encoding concerns.
pub struct SpinelErrorRef<'a>(pub &'a crate::error::SpinelError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_bulk_string() {
        let mut buf = BytesMut::new();
        Reply::bulk(Bytes::from_static(b"bar")).encode(&mut buf);
        assert_eq!(&buf[..], b"$3\r\nbar\r\n");
    }

    #[test]
    fn encodes_null_and_null_array() {
        let mut buf = BytesMut::new();
        Reply::Null.encode(&mut buf);
        assert_eq!(&buf[..], b"$-1\r\n");
        buf.clear();
        Reply::NullArray.encode(&mut buf);
        assert_eq!(&buf[..], b"*-1\r\n");
    }

    #[test]
    fn encodes_nested_array() {
        let mut buf = BytesMut::new();
        Reply::Array(vec![Reply::Integer(1), Reply::bulk(Bytes::from_static(b"x"))])
            .encode(&mut buf);
        assert_eq!(&buf[..], b"*2\r\n:1\r\n$1\r\nx\r\n");
    }
}
