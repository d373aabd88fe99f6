pub mod sidecar_client;

pub use sidecar_client::{SidecarClient, SidecarConfig, SidecarConnector};
