//! One-shot enumeration of the groups the linked account belongs to.

use std::time::Duration;

use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::connections::client::{CloseReason, ConnectedSession, GroupInfo, SessionConnector, SessionEvent};
use crate::connections::errors::ClientError;
use crate::storage::{CredentialStore, StoreError};

const SEPARATOR: &str = "-----------------------";

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("session invalid, link the device again")]
    SessionInvalid,
    #[error("device is not linked (a QR challenge was issued), link it first")]
    ChallengeIssued,
    #[error("connection closed before opening: {0}")]
    ConnectionClosed(CloseReason),
    #[error("timed out after {0:?} waiting for the session to open")]
    Timeout(Duration),
    #[error("group fetch failed: {0}")]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub groups: Vec<GroupInfo>,
}

impl GroupReport {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Flat text listing, one name/id block per group.
    pub fn render(&self) -> String {
        let mut out = String::from("--- GROUP LIST ---\n");
        if self.is_empty() {
            out.push_str("No groups found.\n");
        }
        for group in &self.groups {
            out.push_str(&format!("Name: {}\nID: {}\n{SEPARATOR}\n", group.subject, group.id));
        }
        out.push_str(&format!("\nTotal groups: {}\n", self.len()));
        out
    }
}

/// Connect once with the stored credentials, list the groups, and return.
///
/// There is no retry: any close before the link opens is an error.
pub async fn enumerate_groups(
    connector: &dyn SessionConnector,
    store: &dyn CredentialStore,
    timeout: Duration,
) -> Result<GroupReport, EnumerateError> {
    info!("Loading session...");
    let credentials = store.load()?;
    if credentials.is_empty() {
        warn!("No stored credentials; the network will most likely ask for a QR link");
    }
    let ConnectedSession { client, mut events } = connector.connect(credentials).await?;

    tokio::time::timeout(timeout, wait_until_open(&mut events, store))
        .await
        .map_err(|_| EnumerateError::Timeout(timeout))??;

    info!("Connected! Fetching groups...");
    let groups = client.fetch_groups().await?;
    Ok(GroupReport {
        groups: groups.into_values().collect(),
    })
}

async fn wait_until_open(
    events: &mut mpsc::Receiver<SessionEvent>,
    store: &dyn CredentialStore,
) -> Result<(), EnumerateError> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Opened => return Ok(()),
            SessionEvent::Challenge(_) => return Err(EnumerateError::ChallengeIssued),
            SessionEvent::Closed(reason) if reason.is_terminal() => {
                return Err(EnumerateError::SessionInvalid)
            }
            SessionEvent::Closed(reason) => return Err(EnumerateError::ConnectionClosed(reason)),
            SessionEvent::CredentialsUpdated(credentials) => store.save(&credentials)?,
        }
    }
    Err(EnumerateError::ConnectionClosed(CloseReason::Other(None)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::Credentials;
    use crate::testing::{FakeConnector, MemoryCredentialStore};

    fn group(id: &str, subject: &str) -> GroupInfo {
        GroupInfo {
            id: id.into(),
            subject: subject.into(),
        }
    }

    #[test]
    fn empty_report() {
        assert!(GroupReport::default().is_empty());
        assert_eq!(
            GroupReport::default().render(),
            "--- GROUP LIST ---\nNo groups found.\n\nTotal groups: 0\n"
        );
    }

    #[test]
    fn report_lists_every_group() {
        let report = GroupReport {
            groups: vec![group("1@g.us", "Ventas"), group("2@g.us", "Caja")],
        };
        assert_eq!(report.len(), 2);
        assert_eq!(
            report.render(),
            "--- GROUP LIST ---\n\
             Name: Ventas\nID: 1@g.us\n-----------------------\n\
             Name: Caja\nID: 2@g.us\n-----------------------\n\
             \nTotal groups: 2\n"
        );
    }

    #[tokio::test]
    async fn lists_groups_once_open() {
        let (connector, mut sessions) = FakeConnector::new();
        connector.set_groups(vec![group("2@g.us", "B"), group("1@g.us", "A")]);
        let store = MemoryCredentialStore::with(Credentials::new(serde_json::json!({"me": "x"})));

        let driver = tokio::spawn(async move {
            let session = sessions.recv().await.expect("one connect");
            session.credentials_updated(serde_json::json!({"me": "y"})).await;
            session.opened().await;
            session
        });

        let report = enumerate_groups(&connector, &store, Duration::from_secs(5))
            .await
            .expect("enumeration should succeed");
        let session = driver.await.expect("driver task");

        assert_eq!(session.credentials, Credentials::new(serde_json::json!({"me": "x"})));
        assert_eq!(store.stored(), Some(Credentials::new(serde_json::json!({"me": "y"}))));
        let ids: Vec<_> = report.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, ["1@g.us", "2@g.us"]);
    }

    #[tokio::test]
    async fn logout_before_open_is_session_invalid() {
        let (connector, mut sessions) = FakeConnector::new();
        let store = Arc::new(MemoryCredentialStore::default());
        tokio::spawn(async move {
            let session = sessions.recv().await.expect("one connect");
            session.closed(CloseReason::LoggedOut).await;
            // keep the sender alive until the receiver sees the close
            session
        });

        let err = enumerate_groups(&connector, store.as_ref(), Duration::from_secs(5))
            .await
            .expect_err("logout must fail");
        assert!(matches!(err, EnumerateError::SessionInvalid), "{err}");
    }

    #[tokio::test]
    async fn challenge_means_not_linked() {
        let (connector, mut sessions) = FakeConnector::new();
        let store = MemoryCredentialStore::default();
        tokio::spawn(async move {
            let session = sessions.recv().await.expect("one connect");
            session.challenge("qr").await;
            session
        });

        let err = enumerate_groups(&connector, &store, Duration::from_secs(5))
            .await
            .expect_err("challenge must fail");
        assert!(matches!(err, EnumerateError::ChallengeIssued), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_times_out() {
        let (connector, _sessions) = FakeConnector::new();
        let store = MemoryCredentialStore::default();

        let err = enumerate_groups(&connector, &store, Duration::from_secs(30))
            .await
            .expect_err("nothing ever opens");
        assert!(matches!(err, EnumerateError::Timeout(_)), "{err}");
    }
}
