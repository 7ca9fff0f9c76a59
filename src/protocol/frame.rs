//! Request framing: inline (`COMMAND arg arg\r\n`) and multi-bulk
//! (`*N\r\n$L\r\n...\r\n`) per spec.md §6.
//!
//! Parsing is synchronous and non-blocking: `try_parse_request` consumes
//! bytes already sitting in the client's input buffer and either returns a
//! fully-framed argument vector, or reports that more bytes are needed. It
//! never itself performs I/O — that is the reactor's job.

use bytes::{Buf, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Protocol-level limits, preventing a malicious peer from ballooning
/// allocations via a declared-but-absent element/byte count.
const MAX_FRAME_ELEMENTS: usize = 1024 * 1024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_INLINE_SIZE: usize = 64 * 1024;

/// A single parsed wire value. Only the subset of RESP needed to frame a
/// request and to encode a reply is modeled here; data-type-specific
/// encodings live with their command implementations.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Protocol error: invalid multibulk length")]
    InvalidMultibulkLength,
    #[error("Protocol error: invalid bulk length")]
    InvalidBulkLength,
    #[error("Protocol error: too many elements in request")]
    TooManyElements,
    #[error("Protocol error: bulk string too large")]
    BulkTooLarge,
    #[error("Protocol error: unbalanced quotes in request")]
    UnbalancedQuotes,
    #[error("Protocol error: inline request too long")]
    InlineTooLong,
}

/// Outcome of one framing attempt over `buf`.
pub enum ParseOutcome {
    /// A full command was framed; `buf` has had its bytes consumed.
    Complete(Vec<Bytes>),
    /// Not enough bytes buffered yet; the caller should read more from the
    /// socket and retry. `buf` is left untouched.
    Incomplete,
}

/// Attempt to parse one full command out of the front of `buf`.
///
/// On `Complete`, the consumed bytes are advanced out of `buf`. On
/// `Incomplete`, `buf` is unchanged so the caller can append more bytes and
/// retry. Returns `Err` on malformed input; the caller replies with the
/// error and, per spec.md §7, closes the connection only if framing itself
/// is unrecoverable.
pub fn try_parse_request(buf: &mut BytesMut) -> Result<ParseOutcome, FrameError> {
    if buf.is_empty() {
        return Ok(ParseOutcome::Incomplete);
    }
    if buf[0] == b'*' {
        parse_multibulk(buf)
    } else {
        parse_inline(buf)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn parse_inline(buf: &mut BytesMut) -> Result<ParseOutcome, FrameError> {
    let Some(pos) = find_crlf(buf) else {
        if buf.len() > MAX_INLINE_SIZE {
            return Err(FrameError::InlineTooLong);
        }
        return Ok(ParseOutcome::Incomplete);
    };
    let line = &buf[..pos];
    let args = split_inline_args(line)?;
    buf.advance(pos + 2);
    Ok(ParseOutcome::Complete(args))
}

/// Splits an inline line on whitespace, honoring single/double quoting the
/// way a human-typed inline command would.
fn split_inline_args(line: &[u8]) -> Result<Vec<Bytes>, FrameError> {
    let mut args = Vec::new();
    let mut i = 0;
    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            break;
        }
        let mut current = Vec::new();
        if line[i] == b'"' || line[i] == b'\'' {
            let quote = line[i];
            i += 1;
            let mut closed = false;
            while i < line.len() {
                if line[i] == quote {
                    i += 1;
                    closed = true;
                    break;
                }
                current.push(line[i]);
                i += 1;
            }
            if !closed {
                return Err(FrameError::UnbalancedQuotes);
            }
        } else {
            while i < line.len() && !line[i].is_ascii_whitespace() {
                current.push(line[i]);
                i += 1;
            }
        }
        args.push(Bytes::from(current));
    }
    Ok(args)
}

fn parse_multibulk(buf: &mut BytesMut) -> Result<ParseOutcome, FrameError> {
    let Some(header_end) = find_crlf(buf) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let count_str = std::str::from_utf8(&buf[1..header_end])
        .map_err(|_| FrameError::InvalidMultibulkLength)?;
    let count: i64 = count_str
        .parse()
        .map_err(|_| FrameError::InvalidMultibulkLength)?;
    if count > MAX_FRAME_ELEMENTS as i64 {
        return Err(FrameError::TooManyElements);
    }
    if count <= 0 {
        buf.advance(header_end + 2);
        return Ok(ParseOutcome::Complete(Vec::new()));
    }

    let mut cursor = header_end + 2;
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor >= buf.len() || buf[cursor] != b'$' {
            if cursor >= buf.len() {
                return Ok(ParseOutcome::Incomplete);
            }
            return Err(FrameError::InvalidBulkLength);
        }
        let Some(rel) = find_crlf(&buf[cursor..]) else {
            return Ok(ParseOutcome::Incomplete);
        };
        let len_end = cursor + rel;
        let len_str = std::str::from_utf8(&buf[cursor + 1..len_end])
            .map_err(|_| FrameError::InvalidBulkLength)?;
        let len: i64 = len_str.parse().map_err(|_| FrameError::InvalidBulkLength)?;
        if len < 0 || len as usize > MAX_BULK_STRING_SIZE {
            return Err(FrameError::BulkTooLarge);
        }
        let data_start = len_end + 2;
        let data_end = data_start + len as usize;
        if buf.len() < data_end + 2 {
            return Ok(ParseOutcome::Incomplete);
        }
        args.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        cursor = data_end + 2;
    }
    buf.advance(cursor);
    Ok(ParseOutcome::Complete(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_command() {
        let mut buf = BytesMut::from(&b"PING\r\n"[..]);
        match try_parse_request(&mut buf).unwrap() {
            ParseOutcome::Complete(args) => assert_eq!(args, vec![Bytes::from_static(b"PING")]),
            _ => panic!("expected complete"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_quoted_inline_args() {
        let mut buf = BytesMut::from(&b"SET foo \"bar baz\"\r\n"[..]);
        match try_parse_request(&mut buf).unwrap() {
            ParseOutcome::Complete(args) => {
                assert_eq!(
                    args,
                    vec![
                        Bytes::from_static(b"SET"),
                        Bytes::from_static(b"foo"),
                        Bytes::from_static(b"bar baz"),
                    ]
                );
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn parses_multibulk_command() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n"[..]);
        match try_parse_request(&mut buf).unwrap() {
            ParseOutcome::Complete(args) => {
                assert_eq!(
                    args,
                    vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]
                );
            }
            _ => panic!("expected complete"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn reports_incomplete_multibulk() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfo"[..]);
        let before = buf.clone();
        match try_parse_request(&mut buf).unwrap() {
            ParseOutcome::Incomplete => {}
            _ => panic!("expected incomplete"),
        }
        assert_eq!(buf, before);
    }

    #[test]
    fn rejects_oversized_bulk() {
        let mut buf = BytesMut::from(&b"*1\r\n$999999999999\r\n"[..]);
        assert!(matches!(
            try_parse_request(&mut buf),
            Err(FrameError::BulkTooLarge)
        ));
    }
}
