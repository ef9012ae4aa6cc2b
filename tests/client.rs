use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use js8_recorder::{
    config::{AppConfig, ClientConfig, DatabaseConfig},
    errors::RecorderError,
    grid::Locator,
    js8::{Js8Client, RX_GET_CALL_ACTIVITY, STATION_GET_STATUS},
    models::{Callsign, ClientEvent, DisconnectReason, MessageFilter},
    session::Session,
};

const DIRECTED: &str = r#"{"type":"RX.DIRECTED","params":{"FROM":"K1ABC","TO":"W2XYZ","TEXT":"HELLO","SNR":-12,"GRID":"FN31"}}"#;
const WAIT: Duration = Duration::from_secs(5);

fn client_config(port: u16, callsign: &str) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        callsign: callsign.to_string(),
        connect_timeout: Duration::from_secs(2),
        status_interval: Duration::from_secs(3600),
        channel_capacity: 16,
    }
}

fn app_config(port: u16, callsign: &str, db_path: PathBuf) -> AppConfig {
    AppConfig {
        client: client_config(port, callsign),
        database: DatabaseConfig {
            path: db_path,
            busy_timeout: Duration::from_secs(1),
        },
    }
}

/// Fake JS8Call: accepts one connection and returns its read and write halves
async fn accept(listener: &TcpListener) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let (socket, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client did not connect")
        .unwrap();
    let (reader, writer) = socket.into_split();
    (BufReader::new(reader), writer)
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("no command received")
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    value["type"].as_str().unwrap().to_string()
}

async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("no event received")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = Js8Client::connect(&client_config(port, "W2XYZ")).await;
    assert!(matches!(result, Err(RecorderError::ConnectionError { .. })));
}

#[tokio::test]
async fn test_connect_requires_callsign() {
    let result = Js8Client::connect(&client_config(2442, "")).await;
    assert!(matches!(result, Err(RecorderError::InvalidCallsign(_))));
}

#[tokio::test]
async fn test_requests_and_keepalive() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = ClientConfig {
        status_interval: Duration::from_millis(100),
        ..client_config(port, "W2XYZ")
    };
    let mut client = Js8Client::connect(&config).await.unwrap();
    let (mut reader, _writer) = accept(&listener).await;

    let (tx, _rx) = mpsc::channel(16);
    client.start(tx).unwrap();
    assert!(client.is_running());

    assert_eq!(read_command(&mut reader).await, RX_GET_CALL_ACTIVITY);
    assert_eq!(read_command(&mut reader).await, STATION_GET_STATUS);
    assert_eq!(read_command(&mut reader).await, STATION_GET_STATUS);

    client.stop().await.unwrap();
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_start_twice_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = Js8Client::connect(&client_config(port, "W2XYZ")).await.unwrap();
    let _server = accept(&listener).await;

    let (tx, _rx) = mpsc::channel(16);
    client.start(tx.clone()).unwrap();
    assert!(matches!(
        client.start(tx),
        Err(RecorderError::ClientAlreadyStarted)
    ));
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_lines_do_not_end_loop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = Js8Client::connect(&client_config(port, "W2XYZ")).await.unwrap();
    let (_reader, mut writer) = accept(&listener).await;

    let (tx, mut rx) = mpsc::channel(16);
    client.start(tx).unwrap();

    writer.write_all(b"this is not json\n").await.unwrap();
    writer.write_all(b"\n{\"params\":{}}\n").await.unwrap();
    writer.write_all(b"{\"type\":\"RX.DIRECTED\",\xff\xfe}\n").await.unwrap();
    writer.write_all(DIRECTED.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();

    let ClientEvent::Message(message) = next_event(&mut rx).await else {
        panic!("expected directed message first");
    };
    assert_eq!(message.sender.as_str(), "K1ABC");
    assert_eq!(message.text, "HELLO");
    assert_eq!(message.snr, Some(-12));
    assert!(matches!(next_event(&mut rx).await, ClientEvent::Mapping(_)));

    client.stop().await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::Disconnected(DisconnectReason::Stopped)
    );
}

#[tokio::test]
async fn test_remote_close_reports_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = Js8Client::connect(&client_config(port, "W2XYZ")).await.unwrap();
    let (mut reader, writer) = accept(&listener).await;

    let (tx, mut rx) = mpsc::channel(16);
    client.start(tx).unwrap();

    // Let the opening requests arrive before hanging up
    assert_eq!(read_command(&mut reader).await, RX_GET_CALL_ACTIVITY);
    assert_eq!(read_command(&mut reader).await, STATION_GET_STATUS);
    drop(writer);
    drop(reader);

    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::Disconnected(DisconnectReason::ClosedByRemote)
    );
    client.stop().await.unwrap();
}

/// Feeds `lines` from a fake server to a running session and collects the
/// events it forwards until the server's hang-up is reported.
async fn feed_lines(
    session: &mut Session,
    listener: &TcpListener,
    lines: &[&str],
) -> Vec<ClientEvent> {
    let server = async {
        let (reader, mut writer) = accept(listener).await;
        for line in lines {
            writer.write_all(line.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        }
        writer.shutdown().await.unwrap();
        // Keep the read half open until the client sees EOF
        reader
    };
    let (events, _server) = tokio::join!(session.start(), server);
    let mut events = events.unwrap();

    let mut received = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        if let ClientEvent::Disconnected(reason) = &event {
            assert_eq!(*reason, DisconnectReason::ClosedByRemote);
            break;
        }
        received.push(event);
    }
    session.stop().await.unwrap();
    received
}

/// Runs a session against a fake server that sends `lines`, then returns the
/// session once every line has been processed.
async fn record_lines(callsign: &str, lines: &[&str], db_path: PathBuf) -> Session {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut session = Session::open(app_config(port, callsign, db_path)).await.unwrap();
    feed_lines(&mut session, &listener, lines).await;
    session
}

/// Second connection to the session's database file
async fn side_pool(db_path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new().filename(db_path);
    SqlitePool::connect_with(options).await.unwrap()
}

#[tokio::test]
async fn test_session_records_directed_message() {
    let dir = tempfile::tempdir().unwrap();
    let session = record_lines("W2XYZ", &[DIRECTED], dir.path().join("log.db")).await;
    let store = session.store();

    let messages = store.query_messages(&MessageFilter::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender.as_str(), "K1ABC");
    assert_eq!(messages[0].recipient.as_str(), "W2XYZ");
    assert_eq!(messages[0].text, "HELLO");
    assert_eq!(messages[0].snr, Some(-12));

    let k1abc = Callsign::try_from("K1ABC").unwrap();
    assert_eq!(
        store.query_grid(&k1abc).await.unwrap(),
        Some(Locator::try_from("FN31").unwrap())
    );
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_session_learns_grid_for_other_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let session = record_lines("N3DEF", &[DIRECTED], dir.path().join("log.db")).await;
    let store = session.store();

    assert_eq!(store.count_messages().await.unwrap(), 0);
    let mappings = store.list_mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].callsign.as_str(), "K1ABC");
    assert_eq!(mappings[0].grid.as_str(), "FN31");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_session_latest_grid_wins() {
    let dir = tempfile::tempdir().unwrap();
    let lines = [
        r#"{"type":"RX.ACTIVITY","params":{"FROM":"K1ABC","GRID":"FN31","SNR":-3}}"#,
        r#"{"type":"RX.ACTIVITY","params":{"FROM":"K1ABC","GRID":"FN32","SNR":-4}}"#,
    ];
    let session = record_lines("W2XYZ", &lines, dir.path().join("log.db")).await;

    let k1abc = Callsign::try_from("K1ABC").unwrap();
    assert_eq!(
        session.store().query_grid(&k1abc).await.unwrap(),
        Some(Locator::try_from("FN32").unwrap())
    );
    assert_eq!(session.store().list_mappings().await.unwrap().len(), 1);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_session_ignores_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let lines = ["{\"type\":", "null", "{}"];
    let session = record_lines("W2XYZ", &lines, dir.path().join("log.db")).await;

    assert_eq!(session.store().count_messages().await.unwrap(), 0);
    assert!(session.store().list_mappings().await.unwrap().is_empty());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_session_start_fails_without_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::open(app_config(port, "W2XYZ", dir.path().join("log.db")))
        .await
        .unwrap();
    assert!(matches!(
        session.start().await,
        Err(RecorderError::ConnectionError { .. })
    ));
    assert!(!session.is_running());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_store_failure_drops_only_that_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("log.db");

    let mut session = Session::open(app_config(port, "W2XYZ", db_path.clone()))
        .await
        .unwrap();
    let pool = side_pool(&db_path).await;
    sqlx::query("DROP TABLE messages").execute(&pool).await.unwrap();
    pool.close().await;

    let lines = [
        DIRECTED,
        r#"{"type":"RX.ACTIVITY","params":{"FROM":"VE3AAA","GRID":"EN93","SNR":1}}"#,
    ];
    let events = feed_lines(&mut session, &listener, &lines).await;

    // The message insert failed, both grids went through
    assert!(events.iter().all(|e| matches!(e, ClientEvent::Mapping(_))));
    assert_eq!(events.len(), 2);
    let mappings = session.store().list_mappings().await.unwrap();
    let calls: Vec<&str> = mappings.iter().map(|m| m.callsign.as_str()).collect();
    assert_eq!(calls, vec!["K1ABC", "VE3AAA"]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_lookup_grid_survives_store_failure() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("log.db");
    let session = record_lines("W2XYZ", &[DIRECTED], db_path.clone()).await;
    let k1abc = Callsign::try_from("K1ABC").unwrap();
    assert_eq!(
        session.lookup_grid(&k1abc).await,
        Some(Locator::try_from("FN31").unwrap())
    );

    let pool = side_pool(&db_path).await;
    sqlx::query("DROP TABLE grids").execute(&pool).await.unwrap();
    pool.close().await;

    assert_eq!(session.lookup_grid(&k1abc).await, None);
    assert!(session.store().query_grid(&k1abc).await.is_err());
    session.close().await.unwrap();
}
