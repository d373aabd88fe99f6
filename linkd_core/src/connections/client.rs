use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::ClientError;
use crate::storage::credentials::Credentials;

/// Why the link closed, decoded from the status code the network reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Device was unlinked remotely. The stored credentials are dead.
    LoggedOut,
    ConnectionLost,
    ConnectionClosed,
    ConnectionReplaced,
    RestartRequired,
    Other(Option<u16>),
}

impl CloseReason {
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(401) => CloseReason::LoggedOut,
            Some(408) => CloseReason::ConnectionLost,
            Some(428) => CloseReason::ConnectionClosed,
            Some(440) => CloseReason::ConnectionReplaced,
            Some(515) => CloseReason::RestartRequired,
            other => CloseReason::Other(other),
        }
    }

    /// Only a logout invalidates the credential set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CloseReason::LoggedOut)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::LoggedOut => write!(f, "logged out (401)"),
            CloseReason::ConnectionLost => write!(f, "connection lost (408)"),
            CloseReason::ConnectionClosed => write!(f, "connection closed (428)"),
            CloseReason::ConnectionReplaced => write!(f, "connection replaced (440)"),
            CloseReason::RestartRequired => write!(f, "restart required (515)"),
            CloseReason::Other(Some(code)) => write!(f, "status {code}"),
            CloseReason::Other(None) => write!(f, "unknown"),
        }
    }
}

/// Lifecycle notifications emitted by a session client, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Challenge(String),
    Opened,
    Closed(CloseReason),
    CredentialsUpdated(Credentials),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    #[serde(default)]
    pub subject: String,
}

/// A live session to the messaging network.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Deliver `text` to a normalized address. Returns the network's receipt.
    async fn send(&self, address: &str, text: &str) -> Result<Value, ClientError>;

    /// All groups the linked account participates in, keyed by group id.
    async fn fetch_groups(&self) -> Result<BTreeMap<String, GroupInfo>, ClientError>;
}

/// A freshly instantiated client together with its event stream.
pub struct ConnectedSession {
    pub client: Arc<dyn SessionClient>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Creates session clients. Called once per (re)connect.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, credentials: Credentials) -> Result<ConnectedSession, ClientError>;
}
