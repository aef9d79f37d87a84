use std::time::Duration;

use respool_client::{ClientConfig, ClientError, RedisClient, RedisConnection, Reply, Serialization, Set, Value};
use respool_pool::{PoolConfig, PoolRegistry};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;

type Handler = fn(usize, Vec<Vec<u8>>) -> Vec<u8>;

/// Accepts one connection, answers `expected_commands` commands, then hangs up.
async fn spawn_server(expected_commands: usize, handler: Handler) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).await.expect("read command");
            let reply = handler(idx, args);
            write.write_all(&reply).await.expect("write reply");
        }
    });

    port
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Vec<Vec<u8>>> {
    let line = read_line(reader).await?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let line = read_line(reader).await?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data).await?;
        if !data.ends_with(b"\r\n") {
            return Err(invalid("missing crlf"));
        }
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(buf)
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_string())
}

fn simple(msg: &str) -> Vec<u8> {
    format!("+{msg}\r\n").into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn config_for(port: u16) -> ClientConfig {
    ClientConfig::default()
        .with_addr("127.0.0.1", port)
        .with_receive_timeout(Duration::from_secs(1))
        .with_pool(
            PoolConfig::default()
                .with_min_objects(0)
                .with_max_objects(1)
                .with_get_timeout(Duration::from_secs(1))
                .with_idle_check_interval(Duration::ZERO),
        )
}

fn client_for(port: u16) -> RedisClient {
    RedisClient::new(config_for(port)).expect("client")
}

#[tokio::test]
async fn client_set_get_roundtrip() {
    let port = spawn_server(2, |idx, args| {
        if idx == 0 {
            assert_eq!(args, [&b"SET"[..], b"key", b"value"]);
            simple("OK")
        } else {
            assert_eq!(args, [&b"GET"[..], b"key"]);
            bulk(b"value")
        }
    })
    .await;

    let client = client_for(port);
    client.set("key", "value").await.expect("set");
    let value: Option<String> = client.get("key").await.expect("get");
    assert_eq!(value.as_deref(), Some("value"));
    // Both calls reused the same connection.
    assert_eq!(client.stats().created, 1);
    assert_eq!(client.stats().in_use, 0);
}

#[tokio::test]
async fn client_expiry_delete_and_ping() {
    let port = spawn_server(3, |idx, args| match idx {
        0 => {
            assert_eq!(args, [&b"SET"[..], b"key", b"7", b"EX", b"5"]);
            simple("OK")
        }
        1 => {
            assert_eq!(args, [&b"DEL"[..], b"key", b"other"]);
            integer(1)
        }
        _ => {
            assert_eq!(args, [&b"PING"[..]]);
            simple("PONG")
        }
    })
    .await;

    let client = client_for(port);
    client.set_ex("key", 7, Duration::from_secs(5)).await.expect("set_ex");
    assert_eq!(client.del(["key", "other"]).await.expect("del"), 1);
    assert_eq!(client.ping().await.expect("ping"), "PONG");
}

#[tokio::test]
async fn connection_authenticates_and_selects_db() {
    let port = spawn_server(3, |idx, args| match idx {
        0 => {
            assert_eq!(args, [&b"AUTH"[..], b"secret"]);
            simple("OK")
        }
        1 => {
            assert_eq!(args, [&b"SELECT"[..], b"3"]);
            simple("OK")
        }
        _ => {
            assert_eq!(args[0], b"GET");
            bulk_nil()
        }
    })
    .await;

    let client = RedisClient::new(config_for(port).with_password("secret").with_db(3)).expect("client");
    let value: Option<String> = client.get("missing").await.expect("get");
    assert_eq!(value, None);
}

fn bulk_nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

#[tokio::test]
async fn server_error_keeps_connection_pooled() {
    let port = spawn_server(2, |idx, _| {
        if idx == 0 {
            error("WRONGTYPE Operation against a key holding the wrong kind of value")
        } else {
            simple("PONG")
        }
    })
    .await;

    let client = client_for(port);
    match client.get::<String>("key").await {
        Err(ClientError::Server { kind, message }) => {
            assert_eq!(kind.as_deref(), Some("WRONGTYPE"));
            assert!(message.starts_with("WRONGTYPE Operation"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.stats().created, 1);
    assert_eq!(client.ping().await.expect("ping"), "PONG");
}

#[tokio::test]
async fn srandmember_tolerates_failed_members() {
    let port = spawn_server(1, |_, args| {
        assert_eq!(args, [&b"SRANDMEMBER"[..], b"set", b"3"]);
        b"*3\r\n$1\r\na\r\n-ERR x\r\n$1\r\nb\r\n".to_vec()
    })
    .await;

    let client = client_for(port);
    let members: Vec<Option<String>> = client.srandmember("set", Some(3)).await.expect("srandmember");
    assert_eq!(members, vec![Some("a".to_string()), None, Some("b".to_string())]);
}

#[tokio::test]
async fn json_payloads_are_serialized() {
    let port = spawn_server(2, |idx, args| {
        if idx == 0 {
            assert_eq!(args[2], br#"{"n":1}"#);
            simple("OK")
        } else {
            bulk(br#"{"n":2}"#)
        }
    })
    .await;

    let client = RedisClient::new(config_for(port).with_serialization(Serialization::Json)).expect("client");
    client.set("doc", serde_json::json!({ "n": 1 })).await.expect("set");
    let doc: Option<serde_json::Value> = client.get("doc").await.expect("get");
    assert_eq!(doc, Some(serde_json::json!({ "n": 2 })));
}

#[tokio::test]
async fn registry_transaction_through_invoker() {
    let port = spawn_server(3, |idx, args| match idx {
        0 => {
            assert_eq!(args, [&b"MULTI"[..]]);
            simple("OK")
        }
        1 => {
            assert_eq!(args, [&b"SET"[..], b"k", b"v"]);
            simple("QUEUED")
        }
        _ => {
            assert_eq!(args, [&b"EXEC"[..]]);
            b"*1\r\n+OK\r\n".to_vec()
        }
    })
    .await;

    let registry = PoolRegistry::new();
    RedisClient::register(&registry, "cache", config_for(port)).expect("register");

    let results = registry
        .invoke::<RedisConnection, Vec<Value>, ClientError, _>("cache", None, |conn| {
            Box::pin(async move {
                conn.multi().await?;
                let reply = conn.execute(&Set::new("k", String::from("v"))).await?;
                assert_eq!(reply, Reply::Queued);
                conn.exec().await
            })
        })
        .await
        .expect("transaction");
    assert_eq!(results, vec![Value::from("OK")]);

    let client = RedisClient::from_registry(&registry, "cache").expect("client");
    assert_eq!(client.stats().in_use, 0);
    assert_eq!(client.stats().created, 1);
}

#[tokio::test]
async fn dropped_connection_is_evicted() {
    let port = spawn_server(1, |_, _| simple("PONG")).await;

    let client = client_for(port);
    assert_eq!(client.ping().await.expect("ping"), "PONG");
    // Give the server task time to hang up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.ping().await.expect_err("peer closed");
    assert!(err.is_fatal_to_connection(), "unexpected error: {err:?}");
    assert_eq!(client.stats().created, 0);
}

#[tokio::test]
async fn unreachable_server_is_a_pool_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let client = client_for(port);
    let err = client.ping().await.expect_err("nothing listening");
    assert!(matches!(err, ClientError::Pool(_)), "unexpected error: {err:?}");
    assert_eq!(client.stats().created, 0);
}
