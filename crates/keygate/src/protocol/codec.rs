//! RESP framing for `tokio_util::codec::Framed`.
//!
//! Requests are decoded as a list of binary-safe arguments. Two request forms
//! are accepted:
//! - multibulk arrays: `*<n>\r\n` followed by `n` bulk strings `$<len>\r\n<data>\r\n`
//! - inline commands: a single line of whitespace-separated words
//!
//! Replies are encoded from [`Reply`].

use crate::protocol::reply::Reply;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::ops::Range;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum number of arguments in one multibulk request.
pub const MAX_ARGUMENTS: i64 = 1024 * 1024;

/// Maximum size of a single bulk argument (512 MiB).
pub const MAX_BULK_LENGTH: i64 = 512 * 1024 * 1024;

/// Maximum length of an inline command or a header line (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Largest buffer growth made ahead of data actually arriving (64 KiB).
const MAX_RESERVE_AHEAD: usize = 64 * 1024;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request; the connection cannot be resynchronised.
    #[error("{0}")]
    Protocol(String),
}

impl CodecError {
    fn protocol(msg: impl Into<String>) -> Self {
        CodecError::Protocol(msg.into())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl RespCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RespCodec {
    type Item = Vec<Bytes>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.first() {
            None => Ok(None),
            Some(b'*') => decode_multibulk(src),
            Some(_) => decode_inline(src),
        }
    }
}

/// Parse the integer on the line starting at `start`.
///
/// Returns the value and the offset just past the line's CRLF, or `None` if
/// the line is not complete yet. A line that is not an integer fails with
/// `invalid`.
fn read_integer_line(
    buf: &[u8],
    start: usize,
    invalid: &'static str,
) -> Result<Option<(i64, usize)>, CodecError> {
    let Some(rest) = buf.get(start..) else {
        return Ok(None);
    };

    let Some(end) = rest.windows(CRLF.len()).position(|w| w == CRLF) else {
        if rest.len() > MAX_LINE_LENGTH {
            return Err(CodecError::protocol("too big count line"));
        }
        return Ok(None);
    };

    let value = rest
        .get(..end)
        .and_then(|digits| std::str::from_utf8(digits).ok())
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| CodecError::protocol(invalid))?;

    Ok(Some((value, start + end + CRLF.len())))
}

fn decode_multibulk(src: &mut BytesMut) -> Result<Option<Vec<Bytes>>, CodecError> {
    let Some((count, mut pos)) = read_integer_line(src, 1, "invalid multibulk length")? else {
        return Ok(None);
    };

    if count > MAX_ARGUMENTS {
        return Err(CodecError::protocol("invalid multibulk length"));
    }
    if count <= 0 {
        src.advance(pos);
        return Ok(Some(Vec::new()));
    }

    let mut ranges: Vec<Range<usize>> = Vec::new();
    for _ in 0..count {
        match src.get(pos) {
            None => return Ok(None),
            Some(b'$') => {}
            Some(other) => {
                return Err(CodecError::protocol(format!(
                    "expected '$', got '{}'",
                    char::from(*other)
                )))
            }
        }

        let Some((len, data_start)) = read_integer_line(src, pos + 1, "invalid bulk length")? else {
            return Ok(None);
        };
        if !(0..=MAX_BULK_LENGTH).contains(&len) {
            return Err(CodecError::protocol("invalid bulk length"));
        }

        let len = usize::try_from(len).map_err(|_| CodecError::protocol("invalid bulk length"))?;
        let data_end = data_start + len;
        let frame_end = data_end + CRLF.len();
        if src.len() < frame_end {
            // Grow in bounded steps; a length header alone is not trusted
            src.reserve((frame_end - src.len()).min(MAX_RESERVE_AHEAD));
            return Ok(None);
        }
        if src.get(data_end..frame_end) != Some(CRLF) {
            return Err(CodecError::protocol("bulk string not terminated by CRLF"));
        }

        ranges.push(data_start..data_end);
        pos = frame_end;
    }

    let frame = src.split_to(pos).freeze();
    Ok(Some(ranges.into_iter().map(|r| frame.slice(r)).collect()))
}

fn decode_inline(src: &mut BytesMut) -> Result<Option<Vec<Bytes>>, CodecError> {
    let Some(newline) = src.iter().position(|b| *b == b'\n') else {
        if src.len() > MAX_LINE_LENGTH {
            return Err(CodecError::protocol("too big inline request"));
        }
        return Ok(None);
    };

    let line = src.split_to(newline + 1).freeze();
    let content = line.slice(..newline);
    let content = match content.last() {
        Some(b'\r') => content.slice(..content.len() - 1),
        _ => content,
    };

    let mut args = Vec::new();
    let mut start = None;
    for (i, byte) in content.iter().enumerate() {
        match (byte.is_ascii_whitespace(), start) {
            (true, Some(s)) => {
                args.push(content.slice(s..i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        args.push(content.slice(s..));
    }

    Ok(Some(args))
}

impl Encoder<Reply> for RespCodec {
    type Error = CodecError;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match reply {
            Reply::Simple(text) => write_line(dst, b'+', &text),
            Reply::Error(text) => write_line(dst, b'-', &text),
            Reply::Bulk(data) => {
                dst.reserve(data.len() + 16);
                dst.put_u8(b'$');
                dst.put_slice(data.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(&data);
                dst.put_slice(CRLF);
            }
            Reply::Null => dst.put_slice(b"$-1\r\n"),
        }
        Ok(())
    }
}

/// Simple and error lines cannot contain CR or LF; replace them with spaces.
fn write_line(dst: &mut BytesMut, prefix: u8, text: &str) {
    dst.reserve(text.len() + 3);
    dst.put_u8(prefix);
    for byte in text.bytes() {
        dst.put_u8(if byte == b'\r' || byte == b'\n' { b' ' } else { byte });
    }
    dst.put_slice(CRLF);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Vec<Bytes>> {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    fn args(list: &[&str]) -> Vec<Bytes> {
        list.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect()
    }

    fn encode(reply: Reply) -> Vec<u8> {
        let mut buf = BytesMut::new();
        RespCodec::new().encode(reply, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_decode_multibulk() {
        let frames = decode_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nvalue\r\n");
        assert_eq!(frames, vec![args(&["SET", "k", "value"])]);
    }

    #[test]
    fn test_decode_pipelined_requests() {
        let frames = decode_all(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
        assert_eq!(frames, vec![args(&["PING"]), args(&["GET", "k"])]);
    }

    #[test]
    fn test_decode_partial_frame_waits() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$5\r\nab"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        // Nothing consumed while incomplete
        assert!(buf.starts_with(b"*2\r\n"));

        buf.extend_from_slice(b"cde\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(args(&["GET", "abcde"])));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_binary_safe_bulk() {
        let frames = decode_all(b"*2\r\n$3\r\nGET\r\n$4\r\na\r\nb\r\n");
        assert_eq!(frames, vec![args(&["GET", "a\r\nb"])]);
    }

    #[test]
    fn test_decode_empty_array() {
        let frames = decode_all(b"*0\r\n");
        assert_eq!(frames, vec![Vec::<Bytes>::new()]);
    }

    #[test]
    fn test_decode_inline() {
        let frames = decode_all(b"PING\r\nset  k   v\n");
        assert_eq!(frames, vec![args(&["PING"]), args(&["set", "k", "v"])]);
    }

    #[test]
    fn test_decode_blank_inline_line() {
        let frames = decode_all(b"\r\n");
        assert_eq!(frames, vec![Vec::<Bytes>::new()]);
    }

    #[test]
    fn test_decode_rejects_bad_bulk_prefix() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*1\r\n+PING\r\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.to_string(), "expected '$', got '+'");
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        let mut codec = RespCodec::new();

        let mut buf = BytesMut::from(&b"*x\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap_err().to_string(),
            "invalid multibulk length"
        );

        let mut buf = BytesMut::from(&b"*1\r\n$abc\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap_err().to_string(),
            "invalid bulk length"
        );

        let mut buf = BytesMut::from(&b"*1\r\n$-5\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap_err().to_string(),
            "invalid bulk length"
        );

        let mut buf = BytesMut::from(&b"*99999999\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap_err().to_string(),
            "invalid multibulk length"
        );
    }

    #[test]
    fn test_decode_large_bulk_header_reserves_bounded_space() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nSET\r\n$536870912\r\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.capacity() < 1024 * 1024);
    }

    #[test]
    fn test_decode_rejects_missing_terminator() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPINGxx"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_inline() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_encode_replies() {
        assert_eq!(encode(Reply::ok()), b"+OK\r\n");
        assert_eq!(encode(Reply::pong()), b"+PONG\r\n");
        assert_eq!(
            encode(Reply::Error("ERR unknown command 'X'".to_string())),
            b"-ERR unknown command 'X'\r\n"
        );
        assert_eq!(encode(Reply::Bulk(Bytes::from_static(b"hi"))), b"$2\r\nhi\r\n");
        assert_eq!(encode(Reply::Bulk(Bytes::new())), b"$0\r\n\r\n");
        assert_eq!(encode(Reply::Null), b"$-1\r\n");
    }

    #[test]
    fn test_encode_strips_line_breaks_from_errors() {
        assert_eq!(
            encode(Reply::Error("ERR bad\r\nthing".to_string())),
            b"-ERR bad  thing\r\n"
        );
    }
}
