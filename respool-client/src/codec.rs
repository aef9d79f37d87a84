//! # RESP2 Encoding and Decoding
//!
//! Purpose: Frame commands as RESP arrays and decode replies chunk by chunk
//! from a [`Transport`].
//!
//! ## Design Principles
//! 1. **Single Pass**: A reply is fully consumed, including the CRLF after a
//!    bulk payload, before the next one is read, so request and reply framing
//!    never drift apart.
//! 2. **Buffer Reuse**: Callers provide the output buffer for encoding.
//! 3. **Binary-Safe**: Bulk payloads may contain CRLF; they are reassembled
//!    from as many line chunks as their declared length needs.
//! 4. **Lossy Arrays**: An error element of a multi-bulk reply becomes
//!    [`Value::Failed`] instead of failing the whole array.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tracing::trace;

use crate::error::{ClientError, ClientResult, ProtocolError};
use crate::response::{Response, Value};
use crate::transport::Transport;

/// Largest bulk payload accepted, matching the server's `proto-max-bulk-len`.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

// Caps up-front allocation for arrays with a huge declared count.
const ARRAY_PREALLOC_LIMIT: usize = 1024;

// Same for bulk strings; the buffer grows as chunks actually arrive.
const BULK_PREALLOC_LIMIT: usize = 64 * 1024;

/// Encodes one command as a RESP2 array into `out`.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Encodes and sends one command.
pub async fn send_command<T, A>(transport: &mut T, args: &[A]) -> ClientResult<()>
where
    T: Transport + ?Sized,
    A: AsRef<[u8]>,
{
    let mut frame = Vec::new();
    encode_command(args, &mut frame);
    transport.send(&frame).await
}

/// Reads one reply.
///
/// A timeout on the first line yields a [`Response`] with `Timeout` status
/// and the transport's diagnostic; a timeout later in the frame is
/// [`ProtocolError::Truncated`].
pub async fn recv<T>(transport: &mut T, timeout: Duration) -> ClientResult<Response>
where
    T: Transport + ?Sized,
{
    let Some(chunk) = transport.receive(timeout).await? else {
        let message = transport
            .last_error()
            .map(|(_, message)| message)
            .unwrap_or_else(|| "receive timed out".to_string());
        return Ok(Response::timeout(message));
    };
    decode(transport, chunk, timeout).await
}

fn decode<'a, T>(transport: &'a mut T, chunk: Bytes, timeout: Duration) -> BoxFuture<'a, ClientResult<Response>>
where
    T: Transport + ?Sized,
{
    Box::pin(async move {
        let line = strip_crlf(&chunk)?;
        let (&marker, rest) = line.split_first().ok_or(ProtocolError::EmptyLine)?;
        trace!(marker = %char::from(marker), len = line.len(), "reply line");
        match marker {
            b'+' => Ok(Response::ok(Value::Bytes(chunk.slice(1..line.len())))),
            b'-' => Ok(Response::error(&String::from_utf8_lossy(rest))),
            b':' => Ok(Response::ok(Value::Integer(parse_i64(rest)?))),
            b'$' => {
                let len = parse_i64(rest)?;
                read_bulk(transport, len, timeout).await.map(Response::ok)
            }
            b'*' => {
                let count = parse_i64(rest)?;
                read_array(transport, count, timeout).await.map(Response::ok)
            }
            other => Err(ProtocolError::UnknownMarker(other).into()),
        }
    })
}

async fn read_bulk<T>(transport: &mut T, len: i64, timeout: Duration) -> ClientResult<Value>
where
    T: Transport + ?Sized,
{
    if len < 0 {
        return Ok(Value::Nil);
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::TooLarge(len).into());
    }
    if len == 0 {
        let terminator = next_chunk(transport, timeout).await?;
        if &terminator[..] != b"\r\n" {
            return Err(ProtocolError::BulkLength {
                declared: 0,
                actual: terminator.len().saturating_sub(2),
            }
            .into());
        }
        return Ok(Value::Bytes(Bytes::new()));
    }

    let len = len as usize;
    let mut buf = BytesMut::with_capacity((len + 2).min(BULK_PREALLOC_LIMIT));
    while buf.len() < len + 2 {
        let chunk = next_chunk(transport, timeout).await?;
        buf.extend_from_slice(&chunk);
    }
    if buf.len() != len + 2 || &buf[len..] != b"\r\n" {
        return Err(ProtocolError::BulkLength {
            declared: len,
            actual: buf.len() - 2,
        }
        .into());
    }
    buf.truncate(len);
    Ok(Value::Bytes(buf.freeze()))
}

async fn read_array<T>(transport: &mut T, count: i64, timeout: Duration) -> ClientResult<Value>
where
    T: Transport + ?Sized,
{
    if count < 0 {
        return Ok(Value::Nil);
    }
    let count = usize::try_from(count).map_err(|_| ProtocolError::TooLarge(count))?;
    let mut items = Vec::with_capacity(count.min(ARRAY_PREALLOC_LIMIT));
    for _ in 0..count {
        let chunk = next_chunk(transport, timeout).await?;
        let reply = decode(&mut *transport, chunk, timeout).await?;
        items.push(if reply.is_ok() { reply.data } else { Value::Failed });
    }
    Ok(Value::Array(items))
}

async fn next_chunk<T>(transport: &mut T, timeout: Duration) -> ClientResult<Bytes>
where
    T: Transport + ?Sized,
{
    transport
        .receive(timeout)
        .await?
        .ok_or(ClientError::Protocol(ProtocolError::Truncated))
}

fn strip_crlf(chunk: &[u8]) -> ClientResult<&[u8]> {
    chunk
        .strip_suffix(b"\r\n")
        .ok_or(ClientError::Protocol(ProtocolError::UnterminatedLine))
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let invalid = || ProtocolError::InvalidInteger(String::from_utf8_lossy(data).into_owned());
    let (negative, digits) = match data.split_first() {
        Some((b'-', digits)) => (true, digits),
        Some(_) => (false, data),
        None => return Err(invalid().into()),
    };
    if digits.is_empty() {
        return Err(invalid().into());
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid().into());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(b - b'0')))
            .ok_or_else(invalid)?;
    }
    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go through a stack buffer, least significant first.
    let mut buf = [0u8; 20];
    let mut len = 0;
    loop {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
        if value == 0 {
            break;
        }
    }
    out.extend(buf[..len].iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Status;
    use crate::transport::scripted::ScriptedTransport;

    const WAIT: Duration = Duration::from_secs(1);

    async fn decode_wire(wire: &[u8]) -> Response {
        let mut transport = ScriptedTransport::replying(wire);
        recv(&mut transport, WAIT).await.unwrap()
    }

    #[test]
    fn encodes_set_command() {
        let mut buf = Vec::new();
        encode_command(&["SET", "k", "v"], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn encodes_empty_and_long_arguments() {
        let mut buf = Vec::new();
        let long = vec![b'x'; 12];
        encode_command(&[&b""[..], &long[..]], &mut buf);
        assert!(buf.starts_with(b"*2\r\n$0\r\n\r\n$12\r\n"));
    }

    #[tokio::test]
    async fn decodes_simple_string() {
        let response = decode_wire(b"+OK\r\n").await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.data, Value::from("OK"));
    }

    #[tokio::test]
    async fn decodes_error_reply() {
        let response = decode_wire(b"-ERR wrong type\r\n").await;
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.error_type.as_deref(), Some("ERR"));
        assert_eq!(response.message, "ERR wrong type");
    }

    #[tokio::test]
    async fn decodes_integer() {
        assert_eq!(decode_wire(b":-42\r\n").await.data, Value::Integer(-42));
    }

    #[tokio::test]
    async fn decodes_null_bulk() {
        let response = decode_wire(b"$-1\r\n").await;
        assert!(response.is_ok());
        assert_eq!(response.data, Value::Nil);
    }

    #[tokio::test]
    async fn decodes_empty_bulk() {
        let mut transport = ScriptedTransport::replying(b"$0\r\n\r\n:1\r\n");
        let response = recv(&mut transport, WAIT).await.unwrap();
        assert_eq!(response.data, Value::from(""));
        // The terminator was consumed; the next reply starts cleanly.
        assert_eq!(recv(&mut transport, WAIT).await.unwrap().data, Value::Integer(1));
    }

    #[tokio::test]
    async fn reassembles_bulk_containing_crlf() {
        let response = decode_wire(b"$7\r\nab\r\ncde\r\n").await;
        assert_eq!(response.data, Value::from("ab\r\ncde"));
    }

    #[tokio::test]
    async fn reassembles_bulk_beyond_preallocation() {
        let mut payload = Vec::new();
        while payload.len() <= BULK_PREALLOC_LIMIT * 2 {
            payload.extend_from_slice(b"0123456789abcdef\r\n");
        }
        let mut wire = format!("${}\r\n", payload.len()).into_bytes();
        wire.extend_from_slice(&payload);
        wire.extend_from_slice(b"\r\n:7\r\n");

        let mut transport = ScriptedTransport::replying(&wire);
        let response = recv(&mut transport, WAIT).await.unwrap();
        assert_eq!(response.data, Value::Bytes(Bytes::from(payload)));
        assert_eq!(recv(&mut transport, WAIT).await.unwrap().data, Value::Integer(7));
    }

    #[tokio::test]
    async fn huge_declared_bulk_fails_on_short_payload() {
        let wire = format!("${MAX_BULK_LEN}\r\nshort\r\n");
        let mut transport = ScriptedTransport::replying(wire.as_bytes()).then_timeout();
        let err = recv(&mut transport, WAIT).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::Truncated)));
    }

    #[tokio::test]
    async fn rejects_bulk_longer_than_declared() {
        let mut transport = ScriptedTransport::replying(b"$2\r\nabc\r\n");
        let err = recv(&mut transport, WAIT).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::BulkLength { declared: 2, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn decodes_array() {
        let response = decode_wire(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n").await;
        assert!(response.is_ok());
        assert_eq!(response.data, Value::Array(vec![Value::from("a"), Value::from("b")]));
    }

    #[tokio::test]
    async fn failed_array_element_becomes_placeholder() {
        let response = decode_wire(b"*2\r\n-ERR x\r\n:5\r\n").await;
        assert_eq!(response.data, Value::Array(vec![Value::Failed, Value::Integer(5)]));
    }

    #[tokio::test]
    async fn decodes_nested_and_special_arrays() {
        assert_eq!(decode_wire(b"*0\r\n").await.data, Value::Array(Vec::new()));
        assert_eq!(decode_wire(b"*-1\r\n").await.data, Value::Nil);
        let nested = decode_wire(b"*2\r\n*1\r\n:1\r\n$-1\r\n").await;
        assert_eq!(
            nested.data,
            Value::Array(vec![Value::Array(vec![Value::Integer(1)]), Value::Nil])
        );
    }

    #[tokio::test]
    async fn first_line_timeout_is_a_timeout_response() {
        let mut transport = ScriptedTransport::replying(b"").then_timeout();
        let response = recv(&mut transport, WAIT).await.unwrap();
        assert_eq!(response.status, Status::Timeout);
        assert_eq!(response.message, "scripted timeout");
    }

    #[tokio::test]
    async fn timeout_inside_bulk_is_truncation() {
        let mut transport = ScriptedTransport::replying(b"$5\r\n").then_timeout();
        let err = recv(&mut transport, WAIT).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::Truncated)));
    }

    #[tokio::test]
    async fn timeout_inside_array_aborts_it() {
        let mut transport = ScriptedTransport::replying(b"*2\r\n:1\r\n").then_timeout();
        transport.push(b"-ERR late\r\n");
        let err = recv(&mut transport, WAIT).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::Truncated)));
    }

    #[tokio::test]
    async fn rejects_unknown_marker_and_bad_lengths() {
        let mut transport = ScriptedTransport::replying(b"?what\r\n");
        assert!(matches!(
            recv(&mut transport, WAIT).await,
            Err(ClientError::Protocol(ProtocolError::UnknownMarker(b'?')))
        ));
        let mut transport = ScriptedTransport::replying(b"$abc\r\n");
        assert!(matches!(
            recv(&mut transport, WAIT).await,
            Err(ClientError::Protocol(ProtocolError::InvalidInteger(_)))
        ));
        let mut transport = ScriptedTransport::replying(b"+OK\n");
        assert!(matches!(
            recv(&mut transport, WAIT).await,
            Err(ClientError::Protocol(ProtocolError::UnterminatedLine))
        ));
    }

    #[tokio::test]
    async fn send_command_writes_one_frame() {
        let mut transport = ScriptedTransport::replying(b"");
        let sent = transport.sent_log();
        send_command(&mut transport, &["PING"]).await.unwrap();
        assert_eq!(sent.lock().unwrap().as_slice(), b"*1\r\n$4\r\nPING\r\n");
    }
}
