//! Drives `SidecarConnector` against tiny `sh` scripts standing in for the
//! protocol bridge.
#![cfg(unix)]

use linkd_core::connections::{CloseReason, SessionClient, SessionConnector, SessionEvent};
use linkd_core::connections::errors::ClientError;
use linkd_core::{Credentials, SidecarConfig, SidecarConnector};
use log::LevelFilter;
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};

fn script(body: &str) -> SidecarConnector {
    //   Logs will appear only when you run with `-- --nocapture`
    //   or when the test fails.
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();

    SidecarConnector::new(SidecarConfig {
        program: "sh".into(),
        args: vec!["-c".into(), body.into()],
        ..SidecarConfig::default()
    })
}

async fn next(events: &mut Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a sidecar event")
        .expect("event stream ended")
}

#[tokio::test]
async fn qr_then_open_become_events() {
    let connector = script(
        r#"read connect; echo '{"type":"qr","payload":"2@abc"}'; echo 'garbage'; echo '{"type":"open"}'; cat >/dev/null"#,
    );
    let mut session = connector
        .connect(Credentials::empty())
        .await
        .expect("spawn sh");

    assert_eq!(next(&mut session.events).await, SessionEvent::Challenge("2@abc".into()));
    assert_eq!(next(&mut session.events).await, SessionEvent::Opened);
}

#[tokio::test]
async fn send_is_correlated_with_its_reply() {
    let connector = script(
        r#"read connect; echo '{"type":"open"}'; read request; echo '{"type":"reply","id":1,"ok":true,"data":{"key":"m1"}}'; cat >/dev/null"#,
    );
    let mut session = connector
        .connect(Credentials::empty())
        .await
        .expect("spawn sh");
    assert_eq!(next(&mut session.events).await, SessionEvent::Opened);

    let receipt = timeout(
        Duration::from_secs(5),
        session.client.send("51999999999@s.whatsapp.net", "hola"),
    )
    .await
    .expect("reply in time")
    .expect("send ok");
    assert_eq!(receipt["key"], "m1");
}

#[tokio::test]
async fn send_before_open_is_rejected() {
    let connector = script("cat >/dev/null");
    let session = connector
        .connect(Credentials::empty())
        .await
        .expect("spawn sh");

    let err = session
        .client
        .send("123@g.us", "x")
        .await
        .expect_err("link never opened");
    assert!(matches!(err, ClientError::NotConnected), "{err}");
}

#[tokio::test]
async fn close_status_maps_to_reason() {
    let connector = script(r#"read connect; echo '{"type":"close","status":401}'; cat >/dev/null"#);
    let mut session = connector
        .connect(Credentials::empty())
        .await
        .expect("spawn sh");

    assert_eq!(
        next(&mut session.events).await,
        SessionEvent::Closed(CloseReason::LoggedOut)
    );
}

#[tokio::test]
async fn process_exit_reports_connection_lost() {
    let connector = script(r#"read connect; echo '{"type":"open"}'"#);
    let mut session = connector
        .connect(Credentials::empty())
        .await
        .expect("spawn sh");

    assert_eq!(next(&mut session.events).await, SessionEvent::Opened);
    assert_eq!(
        next(&mut session.events).await,
        SessionEvent::Closed(CloseReason::ConnectionLost)
    );
}

#[tokio::test]
async fn calls_fail_once_the_process_is_gone() {
    let connector = script(r#"read connect; echo '{"type":"open"}'; read request"#);
    let mut session = connector
        .connect(Credentials::empty())
        .await
        .expect("spawn sh");
    assert_eq!(next(&mut session.events).await, SessionEvent::Opened);

    let in_flight = timeout(Duration::from_secs(5), session.client.send("123@g.us", "x"))
        .await
        .expect("in-flight call must not hang")
        .expect_err("sidecar exited without replying");
    assert!(matches!(in_flight, ClientError::Transport(_)), "{in_flight}");

    assert_eq!(
        next(&mut session.events).await,
        SessionEvent::Closed(CloseReason::ConnectionLost)
    );
    let late = timeout(Duration::from_secs(5), session.client.fetch_groups())
        .await
        .expect("late call must not hang")
        .expect_err("link is gone");
    assert!(matches!(late, ClientError::NotConnected), "{late}");
}
