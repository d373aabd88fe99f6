use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque authentication blob owned by the session client.
///
/// The manager never looks inside; it only loads, saves and wipes it.
/// `Value::Null` stands for a fresh, unlinked credential set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(Value);

impl Credentials {
    pub fn new(blob: Value) -> Self {
        Self(blob)
    }

    pub fn empty() -> Self {
        Self(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}
