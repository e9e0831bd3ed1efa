//! End-to-end tests against a scripted interpreter over loopback TCP.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use ride_client::protocol::{encode_frame, RecvBuffer};
use ride_client::{Connection, RideError, Session};

/// What a recording session observed, in order.
#[derive(Debug)]
enum SessionEvent {
    Open,
    Error(String),
    Close { before_handshake: bool },
    Recv { command: String, args: Value },
}

struct RecordingSession {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Session for RecordingSession {
    fn recv(&mut self, command: &str, args: Value) {
        let _ = self.tx.send(SessionEvent::Recv {
            command: command.to_owned(),
            args,
        });
    }
    fn handle_connection_open(&mut self) {
        let _ = self.tx.send(SessionEvent::Open);
    }
    fn handle_connection_error(&mut self, err: &RideError) {
        let _ = self.tx.send(SessionEvent::Error(err.to_string()));
    }
    fn handle_connection_close(&mut self, closed_before_handshake: bool) {
        let _ = self.tx.send(SessionEvent::Close {
            before_handshake: closed_before_handshake,
        });
    }
}

fn recording() -> (RecordingSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RecordingSession { tx }, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("session channel closed")
}

/// Read one framed payload from the interpreter side.
async fn read_payload(stream: &mut TcpStream, buf: &mut RecvBuffer) -> String {
    loop {
        if let Ok(Some(payload)) = buf.next_payload() {
            return payload;
        }
        let mut chunk = [0u8; 4096];
        let n = timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out reading from client")
            .expect("read failed");
        assert!(n > 0, "client closed the stream unexpectedly");
        buf.extend(&chunk[..n]);
    }
}

/// Read a command payload and return its `(command, args)` pair.
async fn read_command(stream: &mut TcpStream, buf: &mut RecvBuffer) -> (String, Value) {
    let payload = read_payload(stream, buf).await;
    serde_json::from_str(&payload).expect("client sent an unparseable command")
}

/// Drive the interpreter side of a full handshake.
async fn complete_handshake(stream: &mut TcpStream, buf: &mut RecvBuffer) {
    assert_eq!(read_payload(stream, buf).await, "SupportedProtocols=2");
    stream
        .write_all(&encode_frame("SupportedProtocols=2"))
        .await
        .unwrap();

    assert_eq!(read_payload(stream, buf).await, "UsingProtocol=2");
    let (command, args) = read_command(stream, buf).await;
    assert_eq!(command, "Identify");
    assert_eq!(args, json!({"apiVersion": 1, "identity": 1}));
    let (command, args) = read_command(stream, buf).await;
    assert_eq!(command, "Connect");
    assert_eq!(args, json!({"remoteId": 2}));
    let (command, _) = read_command(stream, buf).await;
    assert_eq!(command, "GetWindowLayout");

    stream
        .write_all(&encode_frame("UsingProtocol=2"))
        .await
        .unwrap();
}

#[tokio::test]
async fn handshake_completes_and_commands_flow_both_ways() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let interpreter = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = RecvBuffer::new();
        complete_handshake(&mut stream, &mut buf).await;

        // A couple of application commands toward the session, in order.
        stream
            .write_all(&encode_frame(r#"["SetPromptType",{"type":1}]"#))
            .await
            .unwrap();
        stream
            .write_all(&encode_frame(r#"["AppendSessionOutput",{"result":"      "}]"#))
            .await
            .unwrap();

        // And one from the session toward the interpreter.
        let (command, args) = read_command(&mut stream, &mut buf).await;
        (command, args, stream)
    });

    let (session, mut events) = recording();
    let mut connection = Connection::new(1, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Open));
    match next_event(&mut events).await {
        SessionEvent::Recv { command, args } => {
            assert_eq!(command, "SetPromptType");
            assert_eq!(args, json!({"type": 1}));
        }
        other => panic!("expected a command, got {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::Recv { command, .. } => assert_eq!(command, "AppendSessionOutput"),
        other => panic!("expected a command, got {other:?}"),
    }
    assert!(connection.is_connected());

    connection
        .send("Execute", &json!({"text": "1+1\n", "trace": 0}))
        .await;

    let (command, args, _stream) = interpreter.await.unwrap();
    assert_eq!(command, "Execute");
    assert_eq!(args, json!({"text": "1+1\n", "trace": 0}));

    connection.disconnect().await;
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn unsupported_version_drops_connection_without_opening() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let interpreter = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = RecvBuffer::new();

        assert_eq!(read_payload(&mut stream, &mut buf).await, "SupportedProtocols=2");
        stream
            .write_all(&encode_frame("SupportedProtocols=2"))
            .await
            .unwrap();
        // Drain the selection and the three identity commands.
        for _ in 0..4 {
            read_payload(&mut stream, &mut buf).await;
        }

        stream
            .write_all(&encode_frame("UsingProtocol=3"))
            .await
            .unwrap();

        // The client tears the connection down: expect EOF.
        let mut chunk = [0u8; 64];
        let n = timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for the client to hang up")
            .unwrap();
        assert_eq!(n, 0);
    });

    let (session, mut events) = recording();
    let mut connection = Connection::new(2, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    interpreter.await.unwrap();

    // The session is never told the connection opened, and the failure
    // path does not invoke the close handler either.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn legacy_dialect_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let interpreter = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = RecvBuffer::new();
        read_payload(&mut stream, &mut buf).await;

        stream
            .write_all(&encode_frame("<legacy interpreter hello>"))
            .await
            .unwrap();

        let mut chunk = [0u8; 64];
        let n = timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for the client to hang up")
            .unwrap();
        assert_eq!(n, 0);
    });

    let (session, mut events) = recording();
    let mut connection = Connection::new(3, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    interpreter.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn listen_mode_negotiates_when_interpreter_dials_in() {
    let (session, mut events) = recording();
    let mut connection = Connection::new(4, session);

    let (accepted_tx, accepted_rx) = oneshot::channel();
    let addr = connection
        .listen(
            0,
            "",
            Some(Box::new(move |peer| {
                let _ = accepted_tx.send(peer);
            })),
        )
        .await
        .unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = RecvBuffer::new();

    // The interpreter opens the exchange; the listening side never sends
    // the first offer.
    stream
        .write_all(&encode_frame("SupportedProtocols=2"))
        .await
        .unwrap();

    assert_eq!(read_payload(&mut stream, &mut buf).await, "UsingProtocol=2");
    for expected in ["Identify", "Connect", "GetWindowLayout"] {
        let (command, _) = read_command(&mut stream, &mut buf).await;
        assert_eq!(command, expected);
    }

    stream
        .write_all(&encode_frame("UsingProtocol=2"))
        .await
        .unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Open));
    let peer = timeout(Duration::from_secs(5), accepted_rx)
        .await
        .expect("timed out waiting for the accept callback")
        .unwrap();
    assert_eq!(peer, stream.local_addr().unwrap());
    assert!(connection.is_connected());

    connection.disconnect().await;
}

#[tokio::test]
async fn close_before_handshake_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let (session, mut events) = recording();
    let mut connection = Connection::new(5, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    match next_event(&mut events).await {
        SessionEvent::Close { before_handshake } => assert!(before_handshake),
        other => panic!("expected a close, got {other:?}"),
    }
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn malformed_frame_in_stream_does_not_lose_later_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let interpreter = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = RecvBuffer::new();
        complete_handshake(&mut stream, &mut buf).await;

        // A 5-byte malformed frame followed by a valid command, written in
        // a single chunk. The bad frame is skipped, the command survives.
        let mut chunk = vec![0u8, 0, 0, 5, 0xAA];
        chunk.extend_from_slice(&encode_frame(r#"["HadError",{"error":0}]"#));
        stream.write_all(&chunk).await.unwrap();
        stream
    });

    let (session, mut events) = recording();
    let mut connection = Connection::new(6, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Open));
    match next_event(&mut events).await {
        SessionEvent::Recv { command, args } => {
            assert_eq!(command, "HadError");
            assert_eq!(args, json!({"error": 0}));
        }
        other => panic!("expected a command, got {other:?}"),
    }

    drop(interpreter.await.unwrap());
    connection.disconnect().await;
}

#[tokio::test]
async fn malformed_command_payload_is_dropped_but_connection_survives() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let interpreter = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = RecvBuffer::new();
        complete_handshake(&mut stream, &mut buf).await;

        stream
            .write_all(&encode_frame(r#"["NotJson",{"#))
            .await
            .unwrap();
        stream
            .write_all(&encode_frame(r#"["StillAlive",{}]"#))
            .await
            .unwrap();
        stream
    });

    let (session, mut events) = recording();
    let mut connection = Connection::new(7, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Open));
    match next_event(&mut events).await {
        SessionEvent::Recv { command, .. } => assert_eq!(command, "StillAlive"),
        other => panic!("expected a command, got {other:?}"),
    }
    assert!(connection.is_connected());

    drop(interpreter.await.unwrap());
    connection.disconnect().await;
}

#[tokio::test]
async fn disconnect_twice_after_connect_is_safe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let (session, _events) = recording();
    let mut connection = Connection::new(8, session);
    connection.connect("127.0.0.1", addr.port()).await.unwrap();

    connection.disconnect().await;
    connection.disconnect().await;
    assert!(!connection.is_connected());

    // Sending after disconnect is a diagnosed no-op.
    connection.send("Execute", &json!({"text": ""})).await;
}
