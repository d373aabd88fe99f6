pub mod connections;
pub mod core;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// re‑export ergonomic entry points
pub use connections::sidecar::{SidecarConfig, SidecarConnector};
pub use crate::core::lifecycle::{ConnectionSnapshot, ManualReconnect, Phase, ReconnectPolicy};
pub use crate::core::session_manager::{SendError, SessionManager};
pub use storage::{CredentialStore, Credentials, FileCredentialStore};
