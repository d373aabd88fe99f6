use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::connections::client::{
    CloseReason, ConnectedSession, GroupInfo, SessionClient, SessionConnector, SessionEvent,
};
use crate::connections::errors::ClientError;
use crate::storage::Credentials;

/// How to launch the protocol sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub program: String,
    pub args: Vec<String>,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            program: "node".into(),
            args: vec!["bridge.js".into()],
            connect_timeout: Duration::from_secs(60),
            keep_alive: Duration::from_secs(10),
        }
    }
}

/// Host → sidecar, one JSON object per line.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Connect {
        credentials: &'a Credentials,
        options: ConnectOptions,
    },
    Send {
        id: u64,
        to: &'a str,
        text: &'a str,
    },
    FetchGroups {
        id: u64,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectOptions {
    connect_timeout_ms: u64,
    keep_alive_interval_ms: u64,
}

/// Sidecar → host, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Notification {
    Qr {
        payload: String,
    },
    Open,
    Close {
        #[serde(default)]
        status: Option<u16>,
    },
    Creds {
        blob: Value,
    },
    Reply {
        id: u64,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        error: Option<String>,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ClientError>>>>>;

/// Spawns one sidecar process per connect.
#[derive(Debug, Clone, Default)]
pub struct SidecarConnector {
    config: SidecarConfig,
}

impl SidecarConnector {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for SidecarConnector {
    async fn connect(&self, credentials: Credentials) -> Result<ConnectedSession, ClientError> {
        info!(
            "Spawning session sidecar {} {:?}",
            self.config.program, self.config.args
        );
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Transport("sidecar stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Transport("sidecar stdout unavailable".into()))?;

        let connect = Request::Connect {
            credentials: &credentials,
            options: ConnectOptions {
                connect_timeout_ms: self.config.connect_timeout.as_millis() as u64,
                keep_alive_interval_ms: self.config.keep_alive.as_millis() as u64,
            },
        };
        write_line(&mut stdin, &connect).await?;

        let (events_tx, events) = mpsc::channel(64);
        let pending: Pending = Arc::default();
        let open = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_notifications(
            stdout,
            events_tx,
            Arc::clone(&pending),
            Arc::clone(&open),
        ));

        let client = SidecarClient {
            stdin: Mutex::new(stdin),
            pending,
            open,
            next_id: AtomicU64::new(0),
            _child: Mutex::new(child),
        };
        Ok(ConnectedSession {
            client: Arc::new(client),
            events,
        })
    }
}

/// A live sidecar process. Dropping the last handle kills it.
pub struct SidecarClient {
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    /// Set between an `open` and a `close` line.
    open: Arc<AtomicBool>,
    next_id: AtomicU64,
    _child: Mutex<Child>,
}

impl SidecarClient {
    async fn call<'a>(
        &self,
        build: impl FnOnce(u64) -> Request<'a>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        {
            // The reader clears `open` before draining `pending`, so checking
            // under the lock means no entry can outlive the drain.
            let mut pending = self.pending.lock().await;
            if !self.open.load(Ordering::SeqCst) {
                return Err(ClientError::NotConnected);
            }
            pending.insert(id, tx);
        }

        let written = {
            let mut stdin = self.stdin.lock().await;
            write_line(&mut stdin, &build(id)).await
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| ClientError::Transport("sidecar exited before replying".into()))?
    }
}

#[async_trait]
impl SessionClient for SidecarClient {
    async fn send(&self, address: &str, text: &str) -> Result<Value, ClientError> {
        self.call(|id| Request::Send {
            id,
            to: address,
            text,
        })
        .await
    }

    async fn fetch_groups(&self) -> Result<BTreeMap<String, GroupInfo>, ClientError> {
        let data = self.call(|id| Request::FetchGroups { id }).await?;
        Ok(serde_json::from_value(data)?)
    }
}

async fn write_line(stdin: &mut ChildStdin, request: &Request<'_>) -> Result<(), ClientError> {
    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

/// Reader task: turns stdout lines into events and replies.
///
/// Ends after a `close` line, on EOF, or once the event receiver is gone.
/// Ending without a `close` line reports the link as lost.
async fn read_notifications(
    stdout: ChildStdout,
    events: mpsc::Sender<SessionEvent>,
    pending: Pending,
    open: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut closed = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Sidecar read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let notification: Notification = match serde_json::from_str(&line) {
            Ok(n) => n,
            Err(e) => {
                warn!("Skipping unparseable sidecar line {:?}: {}", line, e);
                continue;
            }
        };

        let event = match notification {
            Notification::Qr { payload } => SessionEvent::Challenge(payload),
            Notification::Open => {
                open.store(true, Ordering::SeqCst);
                SessionEvent::Opened
            }
            Notification::Close { status } => {
                open.store(false, Ordering::SeqCst);
                closed = true;
                SessionEvent::Closed(CloseReason::from_status(status))
            }
            Notification::Creds { blob } => SessionEvent::CredentialsUpdated(Credentials::new(blob)),
            Notification::Reply {
                id,
                ok,
                data,
                error,
            } => {
                match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let result = if ok {
                            Ok(data)
                        } else {
                            Err(ClientError::Remote(
                                error.unwrap_or_else(|| "request failed".into()),
                            ))
                        };
                        let _ = tx.send(result);
                    }
                    None => debug!("Reply for unknown request {}", id),
                }
                continue;
            }
        };

        if events.send(event).await.is_err() {
            debug!("Session abandoned; stopping sidecar reader");
            break;
        }
        if closed {
            break;
        }
    }

    open.store(false, Ordering::SeqCst);
    // Dropping the senders fails every outstanding call.
    pending.lock().await.clear();
    if !closed {
        let _ = events
            .send(SessionEvent::Closed(CloseReason::ConnectionLost))
            .await;
    }
    debug!("Sidecar reader ended.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_lines() {
        let credentials = Credentials::empty();
        let connect = Request::Connect {
            credentials: &credentials,
            options: ConnectOptions {
                connect_timeout_ms: 60_000,
                keep_alive_interval_ms: 10_000,
            },
        };
        assert_eq!(
            serde_json::to_value(&connect).unwrap(),
            serde_json::json!({
                "op": "connect",
                "credentials": null,
                "options": { "connectTimeoutMs": 60000, "keepAliveIntervalMs": 10000 }
            })
        );

        let send = Request::Send {
            id: 3,
            to: "51999999999@s.whatsapp.net",
            text: "hola",
        };
        assert_eq!(
            serde_json::to_string(&send).unwrap(),
            r#"{"op":"send","id":3,"to":"51999999999@s.whatsapp.net","text":"hola"}"#
        );
        assert_eq!(
            serde_json::to_string(&Request::FetchGroups { id: 4 }).unwrap(),
            r#"{"op":"fetch_groups","id":4}"#
        );
    }

    #[test]
    fn notifications_parse() {
        let close: Notification = serde_json::from_str(r#"{"type":"close","status":401}"#).unwrap();
        assert!(matches!(close, Notification::Close { status: Some(401) }));

        let bare_close: Notification = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert!(matches!(bare_close, Notification::Close { status: None }));

        let open: Notification = serde_json::from_str(r#"{"type":"open"}"#).unwrap();
        assert!(matches!(open, Notification::Open));

        let failed: Notification =
            serde_json::from_str(r#"{"type":"reply","id":7,"ok":false,"error":"bad jid"}"#).unwrap();
        match failed {
            Notification::Reply { id, ok, error, .. } => {
                assert_eq!(id, 7);
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("bad jid"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
