//! TN5250 transport against an in-process host on a loopback socket

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use as400_bridge::catalog::{ScreenCatalog, ScreenDefinition, TextMatch};
use as400_bridge::config::{Credentials, RetryPolicy, SessionConfig};
use as400_bridge::error::ProtocolError;
use as400_bridge::lib5250::{parse_header, ScreenRecordBuilder, MAX_RECORD_LEN, OPCODE_PUT_GET};
use as400_bridge::telnet_negotiation::{frame_record, Inbound, RecordFramer};
use as400_bridge::{
    BridgeError, Charset, ConnectionManager, ErrorKind, SessionTransport, TcpSessionTransport,
    TransportState,
};

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const DO: u8 = 253;
const SEND: u8 = 1;

/// What an IBM i telnet server opens with
fn host_negotiation() -> Vec<u8> {
    vec![
        IAC, DO, 0, IAC, WILL, 0,
        IAC, DO, 19, IAC, WILL, 19,
        IAC, WILL, 3,
        IAC, DO, 24, IAC, SB, 24, SEND, IAC, SE,
        IAC, DO, 39, IAC, SB, 39, SEND, IAC, SE,
    ]
}

fn sign_on(message: &str) -> Vec<u8> {
    ScreenRecordBuilder::new(Charset::Ebcdic037)
        .clear_unit()
        .write_to_display()
        .text_at(1, 36, "Sign On")
        .text_at(6, 17, "User  . . . . . . . . . . . . .")
        .sba(6, 52)
        .input_field(10)
        .text_at(7, 17, "Password  . . . . . . . . . . .")
        .sba(7, 52)
        .hidden_field(10)
        .text_at(24, 2, message)
        .insert_cursor(6, 53)
        .build()
        .unwrap()
}

fn screen_titled(title: &str) -> Vec<u8> {
    ScreenRecordBuilder::new(Charset::Ebcdic037)
        .clear_unit()
        .write_to_display()
        .text_at(1, 30, title)
        .build()
        .unwrap()
}

fn catalog() -> Arc<ScreenCatalog> {
    Arc::new(
        ScreenCatalog::new()
            .with(
                ScreenDefinition::new("Login")
                    .signature(TextMatch::on_row(1, "Sign On"))
                    .label("user", 6, 53)
                    .label("password", 7, 53),
            )
            .with(ScreenDefinition::new("MainMenu").signature(TextMatch::on_row(1, "Main Menu"))),
    )
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Run the host side of negotiation and return everything the client sent
async fn negotiate(socket: &mut TcpStream) -> Vec<u8> {
    socket.write_all(&host_negotiation()).await.unwrap();
    let mut seen = Vec::new();
    let mut buffer = [0u8; 1024];
    while !(contains(&seen, b"DEVNAME") && seen.ends_with(&[IAC, SE])) {
        let n = socket.read(&mut buffer).await.unwrap();
        assert!(n > 0, "client closed during negotiation");
        seen.extend_from_slice(&buffer[..n]);
    }
    seen
}

async fn next_record(socket: &mut TcpStream, framer: &mut RecordFramer) -> Vec<u8> {
    let mut buffer = [0u8; 1024];
    loop {
        let n = socket.read(&mut buffer).await.unwrap();
        assert!(n > 0, "client closed before sending a record");
        for unit in framer.push(&buffer[..n]).unwrap() {
            if let Inbound::Record(record) = unit {
                return record;
            }
        }
    }
}

async fn listen() -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SessionConfig::new("127.0.0.1", port)
        .with_timeout(Duration::from_secs(2))
        .with_device_name("CLAIMS01")
        .with_credentials(Credentials::new("CLAIMS", "secret"));
    (listener, config)
}

#[tokio::test]
async fn test_sign_on_request_and_response() {
    let (listener, config) = listen().await;
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let negotiation = negotiate(&mut socket).await;
        socket.write_all(&frame_record(&sign_on(""))).await.unwrap();

        let mut framer = RecordFramer::new();
        let request = next_record(&mut socket, &mut framer).await;
        socket
            .write_all(&frame_record(&screen_titled("Main Menu")))
            .await
            .unwrap();
        (negotiation, request)
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    transport.connect().await.unwrap();
    assert_eq!(transport.state(), TransportState::Connected);

    let login = transport.receive().await.unwrap();
    assert_eq!(login.screen_id(), Some("Login"));
    assert_eq!(login.cursor(), (6, 53));
    assert!(login.get_field("password").unwrap().hidden);

    transport.send(&[0xF1]).await.unwrap();
    let menu = transport.receive().await.unwrap();
    assert_eq!(menu.screen_id(), Some("MainMenu"));

    let (negotiation, request) = host.await.unwrap();
    assert!(contains(&negotiation, b"IBM-3179-2"));
    assert!(contains(&negotiation, b"CLAIMS01"));
    assert!(contains(&negotiation, b"USER"));

    let (header, payload) = parse_header(&request).unwrap();
    assert_eq!(header.opcode, OPCODE_PUT_GET);
    assert_eq!(payload, &[0xF1]);

    transport.disconnect().await;
    transport.disconnect().await;
    assert_eq!(transport.state(), TransportState::Disconnected);
}

#[tokio::test]
async fn test_rejected_sign_on_is_authentication_error() {
    let (listener, config) = listen().await;
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        let rejected = sign_on("CPF1120 - User CLAIMS does not exist.");
        socket.write_all(&frame_record(&rejected)).await.unwrap();
        // hold the socket open until the client hangs up
        let mut buffer = [0u8; 64];
        while socket.read(&mut buffer).await.map_or(false, |n| n > 0) {}
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, BridgeError::Authentication { ref reason } if reason.contains("CPF1120")));
    assert_eq!(transport.state(), TransportState::Disconnected);
    host.await.unwrap();
}

#[tokio::test]
async fn test_stale_screens_are_discarded() {
    let (listener, config) = listen().await;
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        socket.write_all(&frame_record(&sign_on(""))).await.unwrap();
        socket
            .write_all(&frame_record(&screen_titled("Message waiting")))
            .await
            .unwrap();

        let mut framer = RecordFramer::new();
        next_record(&mut socket, &mut framer).await;
        socket
            .write_all(&frame_record(&screen_titled("Main Menu")))
            .await
            .unwrap();
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    transport.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    transport.send(&[0xF1]).await.unwrap();
    let screen = transport.receive().await.unwrap();
    assert_eq!(screen.screen_id(), Some("MainMenu"));
    host.await.unwrap();
}

#[tokio::test]
async fn test_host_hangup_is_connection_lost() {
    let (listener, config) = listen().await;
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        socket.write_all(&frame_record(&sign_on(""))).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    transport.connect().await.unwrap();
    transport.receive().await.unwrap();
    host.await.unwrap();

    let err = transport.receive().await.unwrap_err();
    assert!(matches!(err, BridgeError::ConnectionLost { .. }));
    assert_eq!(transport.state(), TransportState::Disconnected);
    assert!(matches!(transport.send(&[0xF1]).await, Err(BridgeError::NotConnected)));
}

#[tokio::test]
async fn test_silent_host_times_out_receive() {
    let (listener, config) = listen().await;
    let config = config.with_timeout(Duration::from_millis(300));
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        socket.write_all(&frame_record(&sign_on(""))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    transport.connect().await.unwrap();
    transport.receive().await.unwrap();
    let err = transport.receive().await.unwrap_err();
    assert!(matches!(err, BridgeError::ReceiveTimeout { .. }));
    assert!(transport.is_connected());

    transport.disconnect().await;
    host.await.unwrap();
}

/// Keep the host side open until the client hangs up
async fn drain(socket: &mut TcpStream) {
    let mut buffer = [0u8; 1024];
    while socket.read(&mut buffer).await.map_or(false, |n| n > 0) {}
}

#[tokio::test]
async fn test_missing_first_screen_reports_handshake_reason() {
    let (listener, config) = listen().await;
    let config = config.with_timeout(Duration::from_millis(500));
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        drain(&mut socket).await;
    });

    let shared = catalog();
    let mut manager = ConnectionManager::new(move |config: &SessionConfig| {
        TcpSessionTransport::new(config.clone(), shared.clone())
    });
    let err = manager
        .connect_with_retry(config, RetryPolicy::new(1))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ConnectionTimeout { attempts: 1, .. }));

    let attempt = &manager.last_attempts()[0];
    assert_eq!(attempt.failure, Some(ErrorKind::ConnectionFailed));
    let reason = attempt.reason.as_deref().unwrap_or_default();
    assert!(reason.contains("no screen from 127.0.0.1"), "{reason}");
    host.await.unwrap();
}

#[tokio::test]
async fn test_oversized_request_is_rejected_before_writing() {
    let (listener, config) = listen().await;
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        socket.write_all(&frame_record(&sign_on(""))).await.unwrap();

        let mut framer = RecordFramer::new();
        let request = next_record(&mut socket, &mut framer).await;
        socket
            .write_all(&frame_record(&screen_titled("Main Menu")))
            .await
            .unwrap();
        request
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    transport.connect().await.unwrap();
    transport.receive().await.unwrap();

    let err = transport.send(&vec![0x40; 70_000]).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Protocol(ProtocolError::RecordTooLong { length: 70_010, max: MAX_RECORD_LEN })
    ));
    assert!(transport.is_connected());

    // Nothing from the rejected request reached the host
    transport.send(&[0xF1]).await.unwrap();
    assert_eq!(transport.receive().await.unwrap().screen_id(), Some("MainMenu"));

    let request = host.await.unwrap();
    let (_, payload) = parse_header(&request).unwrap();
    assert_eq!(payload, &[0xF1]);
    transport.disconnect().await;
}

#[tokio::test]
async fn test_unterminated_host_record_drops_session() {
    let (listener, config) = listen().await;
    let host = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        negotiate(&mut socket).await;
        socket.write_all(&frame_record(&sign_on(""))).await.unwrap();
        // never followed by IAC EOR; the client may hang up mid-write
        let _ = socket.write_all(&vec![0x40; 70_000]).await;
        drain(&mut socket).await;
    });

    let mut transport = TcpSessionTransport::new(config, catalog());
    transport.connect().await.unwrap();
    transport.receive().await.unwrap();

    let err = transport.receive().await.unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(ProtocolError::RecordTooLong { .. })));
    assert_eq!(transport.state(), TransportState::Disconnected);
    host.await.unwrap();
}
