pub mod credentials;
pub mod store;

pub use credentials::Credentials;
pub use store::{CredentialStore, FileCredentialStore, StoreError};
