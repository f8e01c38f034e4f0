//! RESP v2 frame codec.
//!
//! Decodes a streaming byte buffer into [`RespValue`]s and encodes them back.
//! Nested arrays are parsed with an explicit work stack rather than recursion
//! so that decoding depth is bounded by heap, not call-stack, frames.
//!
//! See: <https://redis.io/docs/latest/develop/reference/protocol-spec/>
use atoi::atoi;
use bytes::{Bytes, BytesMut};

/// A RESP value.
///
/// The null bulk string and the null array are distinct inhabitants of
/// [`RespValue::BulkString`] and [`RespValue::Array`] respectively, carried
/// as `None`, rather than separate enum variants: this system targets RESP2
/// only, so there is no third "no type" case to make room for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".into())
    }

    pub fn null_bulk() -> Self {
        RespValue::BulkString(None)
    }

    pub fn bulk(bytes: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(bytes.into()))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }
}

/// Result of attempting to decode one value from the front of a buffer.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A full value was decoded; `consumed` is how many leading bytes it took.
    Complete { consumed: usize, value: RespValue },
    /// Not enough bytes yet; the caller must keep buffering.
    Incomplete,
    /// The bytes seen so far cannot be a valid RESP value.
    ProtocolError(String),
}

/// One array under construction on the work stack.
struct PendingArray {
    remaining: usize,
    values: Vec<RespValue>,
}

/// Attempt to decode exactly one [`RespValue`] from the start of `data`.
///
/// Never panics on truncated input; truncation always yields
/// [`ParseOutcome::Incomplete`].
pub fn try_parse(data: &[u8]) -> ParseOutcome {
    let mut pos = 0usize;
    let mut stack: Vec<PendingArray> = Vec::new();

    loop {
        match parse_one(data, pos) {
            Ok(Some((consumed, value))) => {
                pos += consumed;
                match bubble(&mut stack, value) {
                    Some(top) => return ParseOutcome::Complete { consumed: pos, value: top },
                    None => continue,
                }
            }
            Ok(None) => {
                // Header says an array of N follow-up values; push a frame
                // and keep decoding elements into it.
                if let Some((consumed, count)) = peek_array_header(data, pos) {
                    pos += consumed;
                    if count < 0 {
                        match bubble(&mut stack, RespValue::Array(None)) {
                            Some(top) => return ParseOutcome::Complete { consumed: pos, value: top },
                            None => continue,
                        }
                    }
                    if count == 0 {
                        match bubble(&mut stack, RespValue::Array(Some(Vec::new()))) {
                            Some(top) => return ParseOutcome::Complete { consumed: pos, value: top },
                            None => continue,
                        }
                    }
                    stack.push(PendingArray { remaining: count as usize, values: Vec::with_capacity(count as usize) });
                    continue;
                }
                return ParseOutcome::Incomplete;
            }
            Err(ParseStep::Incomplete) => return ParseOutcome::Incomplete,
            Err(ParseStep::Error(msg)) => return ParseOutcome::ProtocolError(msg),
        }
    }
}

/// Push a freshly-decoded value either into the array on top of the stack,
/// or, if the stack is empty, return it as the final top-level value.
///
/// Arrays that complete as a result of this push are themselves bubbled up
/// recursively (iteratively, via the `loop`) to their parent.
fn bubble(stack: &mut Vec<PendingArray>, mut value: RespValue) -> Option<RespValue> {
    loop {
        match stack.last_mut() {
            None => return Some(value),
            Some(top) => {
                top.values.push(value);
                if top.values.len() < top.remaining {
                    return None;
                }
                let done = stack.pop().expect("stack non-empty");
                value = RespValue::Array(Some(done.values));
            }
        }
    }
}

enum ParseStep {
    Incomplete,
    Error(String),
}

/// Try to decode a non-array scalar value (simple string, error, integer,
/// bulk string) starting at `pos`. Returns `Ok(None)` when the value at
/// `pos` is actually an array header, deferring to [`peek_array_header`].
fn parse_one(data: &[u8], pos: usize) -> Result<Option<(usize, RespValue)>, ParseStep> {
    let Some(&tag) = data.get(pos) else {
        return Err(ParseStep::Incomplete);
    };
    match tag {
        b'+' => {
            let (line, consumed) = read_line(data, pos + 1)?;
            let text = String::from_utf8_lossy(line).into_owned();
            Ok(Some((consumed, RespValue::SimpleString(text))))
        }
        b'-' => {
            let (line, consumed) = read_line(data, pos + 1)?;
            let text = String::from_utf8_lossy(line).into_owned();
            Ok(Some((consumed, RespValue::Error(text))))
        }
        b':' => {
            let (line, consumed) = read_line(data, pos + 1)?;
            let n: i64 = atoi(line).ok_or_else(|| ParseStep::Error("invalid integer".into()))?;
            Ok(Some((consumed, RespValue::Integer(n))))
        }
        b'$' => {
            let (line, after_len) = read_line(data, pos + 1)?;
            let len: i64 = atoi(line).ok_or_else(|| ParseStep::Error("invalid bulk length".into()))?;
            if len < -1 {
                return Err(ParseStep::Error(format!("invalid bulk length {len}")));
            }
            if len == -1 {
                return Ok(Some((after_len, RespValue::BulkString(None))));
            }
            let len = len as usize;
            let body_start = after_len;
            let body_end = body_start + len;
            if data.len() < body_end + 2 {
                return Err(ParseStep::Incomplete);
            }
            if &data[body_end..body_end + 2] != b"\r\n" {
                return Err(ParseStep::Error("bulk string missing trailing CRLF".into()));
            }
            let bytes = Bytes::copy_from_slice(&data[body_start..body_end]);
            Ok(Some((body_end + 2, RespValue::BulkString(Some(bytes)))))
        }
        b'*' => Ok(None),
        other => Err(ParseStep::Error(format!("invalid frame byte '{}'", other as char))),
    }
}

/// Decode just the `*<count>\r\n` header at `pos`, if present.
fn peek_array_header(data: &[u8], pos: usize) -> Option<(usize, i64)> {
    if data.get(pos) != Some(&b'*') {
        return None;
    }
    let (line, consumed) = read_line(data, pos + 1).ok()?;
    let count: i64 = atoi(line)?;
    if count < -1 {
        return None;
    }
    Some((consumed, count))
}

/// Read bytes from `start` up to (excluding) the next CRLF, returning the
/// line and the offset of the byte just past the CRLF.
fn read_line(data: &[u8], start: usize) -> Result<(&[u8], usize), ParseStep> {
    let mut i = start;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            return Ok((&data[start..i], i + 2));
        }
        i += 1;
    }
    Err(ParseStep::Incomplete)
}

/// Encode a [`RespValue`] into its canonical wire form.
pub fn serialize(value: &RespValue) -> Bytes {
    let mut buf = BytesMut::new();
    write_value(&mut buf, value);
    buf.freeze()
}

fn write_value(buf: &mut BytesMut, value: &RespValue) {
    match value {
        RespValue::SimpleString(s) => {
            buf.extend_from_slice(b"+");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            buf.extend_from_slice(b"-");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            buf.extend_from_slice(b":");
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
        RespValue::BulkString(Some(bytes)) => {
            buf.extend_from_slice(b"$");
            buf.extend_from_slice(bytes.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        RespValue::Array(Some(items)) => {
            buf.extend_from_slice(b"*");
            buf.extend_from_slice(items.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            for item in items {
                write_value(buf, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(input: &[u8]) -> (usize, RespValue) {
        match try_parse(input) {
            ParseOutcome::Complete { consumed, value } => (consumed, value),
            ParseOutcome::Incomplete => panic!("expected Complete, got Incomplete"),
            ParseOutcome::ProtocolError(e) => panic!("expected Complete, got ProtocolError({e})"),
        }
    }

    #[test]
    fn simple_string() {
        let (consumed, v) = complete(b"+OK\r\n");
        assert_eq!(consumed, 5);
        assert_eq!(v, RespValue::SimpleString("OK".into()));
    }

    #[test]
    fn error_value() {
        let (_, v) = complete(b"-ERR bad\r\n");
        assert_eq!(v, RespValue::Error("ERR bad".into()));
    }

    #[test]
    fn integer_signed() {
        let (_, v) = complete(b":-42\r\n");
        assert_eq!(v, RespValue::Integer(-42));
        let (_, v) = complete(b":+7\r\n");
        assert_eq!(v, RespValue::Integer(7));
    }

    #[test]
    fn bulk_string() {
        let (consumed, v) = complete(b"$6\r\nfoobar\r\n");
        assert_eq!(consumed, 12);
        assert_eq!(v, RespValue::BulkString(Some(Bytes::from("foobar"))));
    }

    #[test]
    fn bulk_string_empty() {
        let (_, v) = complete(b"$0\r\n\r\n");
        assert_eq!(v, RespValue::BulkString(Some(Bytes::from(""))));
    }

    #[test]
    fn null_bulk_string() {
        let (_, v) = complete(b"$-1\r\n");
        assert_eq!(v, RespValue::BulkString(None));
    }

    #[test]
    fn null_array() {
        let (_, v) = complete(b"*-1\r\n");
        assert_eq!(v, RespValue::Array(None));
    }

    #[test]
    fn empty_array() {
        let (_, v) = complete(b"*0\r\n");
        assert_eq!(v, RespValue::Array(Some(vec![])));
    }

    #[test]
    fn flat_array() {
        let (_, v) = complete(b"*2\r\n+OK\r\n$6\r\nfoobar\r\n");
        assert_eq!(
            v,
            RespValue::Array(Some(vec![
                RespValue::SimpleString("OK".into()),
                RespValue::BulkString(Some(Bytes::from("foobar"))),
            ]))
        );
    }

    #[test]
    fn nested_array() {
        let (_, v) = complete(b"*2\r\n*2\r\n+OK\r\n$6\r\nfoobar\r\n$3\r\nbaz\r\n");
        assert_eq!(
            v,
            RespValue::Array(Some(vec![
                RespValue::Array(Some(vec![
                    RespValue::SimpleString("OK".into()),
                    RespValue::BulkString(Some(Bytes::from("foobar"))),
                ])),
                RespValue::BulkString(Some(Bytes::from("baz"))),
            ]))
        );
    }

    #[test]
    fn incomplete_prefix() {
        assert!(matches!(try_parse(b""), ParseOutcome::Incomplete));
        assert!(matches!(try_parse(b"$6\r\nfoo"), ParseOutcome::Incomplete));
        assert!(matches!(try_parse(b"*2\r\n+OK\r\n"), ParseOutcome::Incomplete));
    }

    #[test]
    fn garbage_first_byte_is_protocol_error() {
        assert!(matches!(try_parse(b"xyz\r\n"), ParseOutcome::ProtocolError(_)));
    }

    #[test]
    fn bad_bulk_len_is_protocol_error() {
        assert!(matches!(try_parse(b"$-2\r\n"), ParseOutcome::ProtocolError(_)));
    }

    #[test]
    fn missing_trailing_crlf_is_protocol_error() {
        assert!(matches!(try_parse(b"$3\r\nabcXX"), ParseOutcome::ProtocolError(_)));
    }

    #[test]
    fn round_trip() {
        let values = vec![
            RespValue::SimpleString("PONG".into()),
            RespValue::Error("ERR nope".into()),
            RespValue::Integer(i64::MIN),
            RespValue::Integer(i64::MAX),
            RespValue::BulkString(Some(Bytes::from("hello"))),
            RespValue::BulkString(None),
            RespValue::Array(None),
            RespValue::Array(Some(vec![])),
            RespValue::Array(Some(vec![RespValue::Integer(1), RespValue::bulk("a")])),
        ];
        for v in values {
            let bytes = serialize(&v);
            let (consumed, parsed) = complete(&bytes);
            assert_eq!(consumed, bytes.len());
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn split_invariance() {
        let v = RespValue::Array(Some(vec![
            RespValue::bulk("SET"),
            RespValue::bulk("k"),
            RespValue::bulk("v"),
        ]));
        let bytes = serialize(&v);
        for split in 1..bytes.len() {
            let (first, second) = bytes.split_at(split);
            match try_parse(first) {
                ParseOutcome::Incomplete => {}
                ParseOutcome::Complete { .. } => panic!("should not complete on partial input at split {split}"),
                ParseOutcome::ProtocolError(e) => panic!("unexpected protocol error at split {split}: {e}"),
            }
            let mut joined = Vec::from(first);
            joined.extend_from_slice(second);
            let (consumed, parsed) = complete(&joined);
            assert_eq!(consumed, bytes.len());
            assert_eq!(parsed, v);
        }
    }
}
