//! Deterministic **in‑process stand‑ins** for the session collaborators.
//!
//! *  **From the test’s perspective**
//!    * Every `connect` on a [`FakeConnector`] hands a [`FakeSession`] to the
//!      test through the receiver returned by [`FakeConnector::new`].
//!    * Drive the lifecycle with `session.challenge(..)`, `session.opened()`,
//!      `session.closed(..)`.
//!    * Inspect what was sent through `session.client.sent()`.
//! *  [`MemoryCredentialStore`] records saves and deletes. It can be told to
//!    fail loads or deletes, or to block inside `delete` for a while.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::connections::client::{
    CloseReason, ConnectedSession, GroupInfo, SessionClient, SessionConnector, SessionEvent,
};
use crate::connections::errors::ClientError;
use crate::storage::{CredentialStore, Credentials, StoreError};

#[derive(Default)]
pub struct FakeClient {
    sent: Mutex<Vec<(String, String)>>,
    groups: Mutex<BTreeMap<String, GroupInfo>>,
    fail_sends: AtomicBool,
}

impl FakeClient {
    /// Every `(address, text)` pair handed to `send`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionClient for FakeClient {
    async fn send(&self, address: &str, text: &str) -> Result<Value, ClientError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Remote("recipient rejected".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((address.to_string(), text.to_string()));
        Ok(json!({ "id": format!("msg-{}", sent.len()), "to": address }))
    }

    async fn fetch_groups(&self) -> Result<BTreeMap<String, GroupInfo>, ClientError> {
        Ok(self.groups.lock().unwrap().clone())
    }
}

/// One instantiated fake client plus the handle to push its events.
pub struct FakeSession {
    pub credentials: Credentials,
    pub client: Arc<FakeClient>,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl FakeSession {
    /// Push an event. Returns `false` once the manager abandoned this client.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        self.events_tx.send(event).await.is_ok()
    }

    pub async fn challenge(&self, payload: &str) -> bool {
        self.emit(SessionEvent::Challenge(payload.to_string())).await
    }

    pub async fn opened(&self) -> bool {
        self.emit(SessionEvent::Opened).await
    }

    pub async fn closed(&self, reason: CloseReason) -> bool {
        self.emit(SessionEvent::Closed(reason)).await
    }

    pub async fn credentials_updated(&self, blob: Value) -> bool {
        self.emit(SessionEvent::CredentialsUpdated(Credentials::new(blob)))
            .await
    }
}

pub struct FakeConnector {
    sessions_tx: mpsc::UnboundedSender<FakeSession>,
    connects: AtomicUsize,
    fail_connects: AtomicBool,
    groups: Mutex<BTreeMap<String, GroupInfo>>,
}

impl FakeConnector {
    /// Returns the connector and the stream of sessions it creates.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeSession>) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions_tx,
                connects: AtomicUsize::new(0),
                fail_connects: AtomicBool::new(false),
                groups: Mutex::new(BTreeMap::new()),
            },
            sessions_rx,
        )
    }

    /// Number of `connect` calls so far, failed ones included.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Groups reported by every client created from now on.
    pub fn set_groups(&self, groups: Vec<GroupInfo>) {
        *self.groups.lock().unwrap() = groups.into_iter().map(|g| (g.id.clone(), g)).collect();
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, credentials: Credentials) -> Result<ConnectedSession, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connect refused".into()));
        }

        let (events_tx, events) = mpsc::channel(32);
        let client = Arc::new(FakeClient {
            groups: Mutex::new(self.groups.lock().unwrap().clone()),
            ..FakeClient::default()
        });
        let _ = self.sessions_tx.send(FakeSession {
            credentials,
            client: Arc::clone(&client),
            events_tx,
        });
        Ok(ConnectedSession { client, events })
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    stored: Mutex<Option<Credentials>>,
    deletes: AtomicUsize,
    fail_deletes: AtomicBool,
    fail_loads: AtomicBool,
    delete_delay: Mutex<Option<Duration>>,
}

impl MemoryCredentialStore {
    pub fn with(credentials: Credentials) -> Self {
        Self {
            stored: Mutex::new(Some(credentials)),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Option<Credentials> {
        self.stored.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` block the calling thread, like a slow disk.
    pub fn slow_deletes(&self, delay: Duration) {
        *self.delete_delay.lock().unwrap() = Some(delay);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credentials, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt store").into());
        }
        Ok(self.stored().unwrap_or_default())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.stored.lock().unwrap() = Some(credentials.clone());
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delete_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only store").into());
        }
        *self.stored.lock().unwrap() = None;
        Ok(())
    }
}
