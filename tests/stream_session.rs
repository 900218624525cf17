mod support;

use std::time::Duration;

use sam_client::{
    ControlChannel, DestinationSpec, ErrorKind, ResultCode, SamError, Session, SessionOptions,
    StreamSession, Style,
};
use support::{destination, private_blob, public_b64, MockRouter, RouterBehavior, PEER_SEED};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

async fn transient(router: &MockRouter, id: &str) -> StreamSession {
    StreamSession::create(
        router.config(),
        id,
        DestinationSpec::Transient,
        SessionOptions::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn create_reports_router_destination() {
    let router = MockRouter::start().await;
    let options = SessionOptions::parse(["inbound.length=1", "outbound.length=1"]).unwrap();
    let session = StreamSession::create(router.config(), "s1", DestinationSpec::Transient, options)
        .await
        .unwrap();

    assert_eq!(session.id(), "s1");
    assert_eq!(session.style(), Style::Stream);
    assert_eq!(session.destination().to_base64(), public_b64(1));
    assert_eq!(session.destination().private_keys(), Some(private_blob(1).as_str()));
    assert!(router.commands().contains(
        &"SESSION CREATE STYLE=STREAM ID=s1 DESTINATION=TRANSIENT inbound.length=1 outbound.length=1"
            .to_string()
    ));
}

#[tokio::test]
async fn duplicate_id_on_one_channel_is_rejected() {
    let router = MockRouter::start().await;
    let channel = ControlChannel::connect(router.config()).await.unwrap();

    let first = StreamSession::with_channel(
        channel.clone(),
        "dup",
        DestinationSpec::Transient,
        SessionOptions::new(),
    )
    .await
    .unwrap();
    let err = StreamSession::with_channel(
        channel.clone(),
        "dup",
        DestinationSpec::Transient,
        SessionOptions::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.result_code(), Some(ResultCode::DuplicatedId));
    assert_eq!(router.commands_starting_with("SESSION CREATE").len(), 1);

    assert!(!first.is_closed());
    let mut conn = first.dial(&public_b64(50)).await.unwrap();
    conn.write_all(b"still here").await.unwrap();
}

#[tokio::test]
async fn dial_opens_an_echoing_stream() {
    let router = MockRouter::start().await;
    let session = transient(&router, "dialer").await;
    let target = public_b64(42);

    let mut conn = session.dial(&target).await.unwrap();
    assert_eq!(conn.peer_destination(), Some(&destination(42)));
    assert_eq!(conn.session_id(), "dialer");

    conn.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    let connect = format!("STREAM CONNECT ID=dialer DESTINATION={target} SILENT=false");
    assert!(router.commands().contains(&connect));
    // Each auxiliary socket repeats the handshake.
    assert_eq!(router.commands_starting_with("HELLO").len(), 2);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn failed_dial_leaves_session_usable() {
    let router = MockRouter::start().await;
    let session = transient(&router, "s").await;

    let err = session.dial("UNREACHABLE").await.unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::CantReachPeer));
    assert_eq!(err.kind(), ErrorKind::Stream);
    assert!(err.to_string().contains("peer is gone"));

    assert!(session.dial(&public_b64(3)).await.is_ok());
}

#[tokio::test]
async fn expired_deadline_sends_nothing() {
    let router = MockRouter::start().await;
    let session = transient(&router, "late").await;

    let err = session
        .dial_deadline(&public_b64(3), Some(Instant::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, SamError::Timeout(_)));
    assert!(router.commands_starting_with("STREAM CONNECT").is_empty());
}

#[tokio::test]
async fn dial_timeout_abandons_slow_handshake() {
    let router = MockRouter::start().await;
    let session = transient(&router, "slow").await;

    let started = Instant::now();
    let err = session
        .dial_timeout("SLOW", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, SamError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));

    // The control channel is untouched by stream failures.
    assert!(session.dial(&public_b64(4)).await.is_ok());
}

#[tokio::test]
async fn accept_reports_peer_and_echoes() {
    let router = MockRouter::start().await;
    let session = transient(&router, "server").await;
    let listener = session.listen().unwrap();

    let mut conn = listener.accept().await.unwrap();
    assert_eq!(conn.peer_destination(), Some(&destination(PEER_SEED)));
    assert_eq!(conn.remote_address(), public_b64(PEER_SEED));
    assert_eq!((conn.from_port(), conn.to_port()), (1234, 80));

    conn.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
    assert!(router
        .commands()
        .contains(&"STREAM ACCEPT ID=server SILENT=false".to_string()));
}

#[tokio::test]
async fn accepts_are_issued_one_at_a_time() {
    let router = MockRouter::with_behavior(RouterBehavior {
        accept_delay: Duration::from_millis(150),
        ..Default::default()
    })
    .await;
    let session = transient(&router, "busy").await;

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let listener = session.listen().unwrap();
            tokio::spawn(async move { listener.accept().await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(router.commands_starting_with("STREAM ACCEPT").len(), 3);
    assert_eq!(router.max_concurrent_accepts(), 1);
}

#[tokio::test]
async fn accept_timeout_expires() {
    let router = MockRouter::with_behavior(RouterBehavior {
        accept_delay: Duration::from_secs(10),
        ..Default::default()
    })
    .await;
    let session = transient(&router, "quiet").await;

    let err = session
        .listen()
        .unwrap()
        .accept_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, SamError::Timeout("STREAM ACCEPT")));
}

#[tokio::test]
async fn close_interrupts_pending_accept() {
    let router = MockRouter::with_behavior(RouterBehavior {
        accept_delay: Duration::from_secs(10),
        ..Default::default()
    })
    .await;
    let session = transient(&router, "closing").await;

    let pending = {
        let listener = session.listen().unwrap();
        tokio::spawn(async move { listener.accept().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.close().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("accept must return after close")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SamError::SessionClosed(_)));
}

#[tokio::test]
async fn closed_session_refuses_work() {
    let router = MockRouter::start().await;
    let session = transient(&router, "gone").await;

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(session.is_closed());

    let err = session.dial(&public_b64(5)).await.unwrap_err();
    assert!(matches!(err, SamError::SessionClosed(ref id) if id == "gone"));
    assert!(session.listen().is_err());
}

#[tokio::test]
async fn existing_keys_are_sent_verbatim() {
    let router = MockRouter::start().await;
    let keys = private_blob(77);
    let session = StreamSession::create(
        router.config(),
        "keyed",
        DestinationSpec::Keys(keys.clone()),
        SessionOptions::new(),
    )
    .await
    .unwrap();

    let create = router.commands_starting_with("SESSION CREATE");
    assert_eq!(
        create,
        vec![format!("SESSION CREATE STYLE=STREAM ID=keyed DESTINATION={keys}")]
    );
    assert_eq!(session.options().len(), 0);
}
