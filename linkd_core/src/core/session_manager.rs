use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, Sleep};

use crate::connections::client::{
    CloseReason, ConnectedSession, SessionClient, SessionConnector, SessionEvent,
};
use crate::connections::errors::ClientError;
use crate::core::address::normalize_recipient;
use crate::core::lifecycle::{
    ConnectionSnapshot, ConnectionState, ManualReconnect, NextAction, Phase, ReconnectPolicy,
};
use crate::storage::{CredentialStore, Credentials, StoreError};

enum Command {
    Connect,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// State machine plus the client it currently drives. Guarded by one lock.
struct Session {
    state: ConnectionState,
    client: Option<Arc<dyn SessionClient>>,
}

struct Shared {
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
}

impl Shared {
    /// Run `f` under the lock and publish the resulting snapshot.
    async fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.session.lock().await;
        let out = f(&mut session);
        self.snapshot_tx.send_replace(session.state.snapshot());
        out
    }
}

/// Owns the single session of this process.
///
/// Lifecycle events are consumed by one background driver task, so they are
/// handled strictly one at a time. Request handlers only go through the
/// methods below. Cloning is cheap (it bumps an `Arc`), and the driver stops
/// once every handle has been dropped.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<Command>,
}

impl SessionManager {
    /// Spawn the driver task and request the startup connect.
    pub async fn start(
        connector: Arc<dyn SessionConnector>,
        store: Arc<dyn CredentialStore>,
        policy: ReconnectPolicy,
    ) -> Self {
        let manager = Self::spawn(connector, store, policy);
        manager.request_connect().await;
        manager
    }

    /// Spawn the driver without connecting. The session stays `DISCONNECTED`
    /// until [`request_connect`](Self::request_connect) is called.
    pub fn spawn(
        connector: Arc<dyn SessionConnector>,
        store: Arc<dyn CredentialStore>,
        policy: ReconnectPolicy,
    ) -> Self {
        let state = ConnectionState::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let shared = Arc::new(Shared {
            session: Mutex::new(Session {
                state,
                client: None,
            }),
            snapshot_tx,
        });
        let (command_tx, command_rx) = mpsc::channel(8);

        let driver = Driver {
            shared: Arc::clone(&shared),
            connector,
            store,
            policy,
            command_rx,
            events: None,
            reconnect_timer: None,
        };
        tokio::spawn(driver.run());

        Self { shared, command_tx }
    }

    pub fn status(&self) -> ConnectionSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Watch every published state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Manual reconnect. Never starts a second attempt while one is in flight.
    pub async fn request_connect(&self) -> ManualReconnect {
        let outcome = self.shared.update(|s| s.state.manual_reconnect()).await;
        info!("Connect requested: {}", outcome.message());
        if outcome == ManualReconnect::Initiated && self.command_tx.send(Command::Connect).await.is_err() {
            error!("Session driver is gone; connect request dropped");
        }
        outcome
    }

    /// Send a text message. Fails immediately unless the session is open.
    pub async fn send(&self, recipient: &str, text: &str) -> Result<Value, SendError> {
        let client = {
            let session = self.shared.session.lock().await;
            match (&session.client, session.state.phase()) {
                (Some(client), Phase::Connected) => Arc::clone(client),
                _ => return Err(SendError::NotConnected),
            }
        };
        let address = normalize_recipient(recipient);
        debug!("Sending message to {}", address);
        Ok(client.send(&address, text).await?)
    }
}

struct Driver {
    shared: Arc<Shared>,
    connector: Arc<dyn SessionConnector>,
    store: Arc<dyn CredentialStore>,
    policy: ReconnectPolicy,
    command_rx: mpsc::Receiver<Command>,
    /// Events of the current client. Dropped when that client is abandoned.
    events: Option<mpsc::Receiver<SessionEvent>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self) {
        info!("Session driver started.");
        loop {
            let action = tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Connect) => NextAction::ReconnectNow,
                    None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Session client event stream ended without a close event");
                        self.handle_event(SessionEvent::Closed(CloseReason::Other(None))).await
                    }
                },
                () = fire(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    NextAction::ReconnectNow
                }
            };
            self.run_action(action).await;
        }
        info!("Session driver stopped.");
    }

    async fn handle_event(&mut self, event: SessionEvent) -> NextAction {
        match event {
            SessionEvent::Challenge(payload) => {
                info!("QR challenge received");
                self.shared.update(|s| s.state.on_challenge(payload)).await;
                NextAction::Stay
            }
            SessionEvent::Opened => {
                info!("Session opened");
                self.shared.update(|s| s.state.on_opened()).await;
                NextAction::Stay
            }
            SessionEvent::Closed(reason) => {
                info!("Session closed: {}", reason);
                self.events = None;
                let policy = &self.policy;
                self.shared
                    .update(|s| {
                        s.client = None;
                        s.state.on_closed(&reason, policy)
                    })
                    .await
            }
            SessionEvent::CredentialsUpdated(credentials) => {
                debug!("Persisting updated credentials");
                if let Err(e) = self.with_store(move |store| store.save(&credentials)).await {
                    error!("Failed to persist credentials: {}", e);
                }
                NextAction::Stay
            }
        }
    }

    /// Carry out `action` and whatever it leads to, without recursing.
    async fn run_action(&mut self, mut action: NextAction) {
        loop {
            action = match action {
                NextAction::Stay => return,
                NextAction::ReconnectAfter(delay) => {
                    self.reconnect_timer = Some(Box::pin(sleep(delay)));
                    return;
                }
                NextAction::ReconnectNow => self.connect().await,
                NextAction::WipeCredentials { restart } => {
                    info!("Logged out. Clearing stored credentials.");
                    if let Err(e) = self.with_store(|store| store.delete()).await {
                        // Restarting on stale credentials would just log out again.
                        error!("Failed to clear credentials, stale session may persist: {}", e);
                        self.shared.update(|s| s.state.abandon_restart()).await;
                        return;
                    }
                    if !restart {
                        info!("Session cleared. Waiting for manual reconnect.");
                        return;
                    }
                    info!("Session cleared. Restarting to generate a new QR.");
                    NextAction::ReconnectNow
                }
            };
        }
    }

    /// Replace the current client with a fresh one.
    async fn connect(&mut self) -> NextAction {
        self.reconnect_timer = None;
        self.events = None;
        self.shared
            .update(|s| {
                s.client = None;
                s.state.begin_connect();
            })
            .await;

        let credentials = match self.with_store(|store| store.load()).await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Could not load credentials, connecting unlinked: {}", e);
                Credentials::empty()
            }
        };

        match self.connector.connect(credentials).await {
            Ok(ConnectedSession { client, events }) => {
                self.events = Some(events);
                self.shared.update(|s| s.client = Some(client)).await;
                NextAction::Stay
            }
            Err(e) => {
                warn!("Connect attempt failed: {}", e);
                let policy = &self.policy;
                self.shared
                    .update(|s| s.state.on_closed(&CloseReason::Other(None), policy))
                    .await
            }
        }
    }

    /// Run a store operation on the blocking pool. Stores do file I/O.
    async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CredentialStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref())).await?
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
