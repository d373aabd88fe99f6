use std::{fs, io, path::PathBuf};

use directories::ProjectDirs;
use log::debug;
use thiserror::Error;

use super::credentials::Credentials;

const CREDS_FILE: &str = "creds.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store IO error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed credential file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("credential store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Load / save / wipe the persisted credential blob.
pub trait CredentialStore: Send + Sync {
    /// Returns an empty set when nothing is stored yet.
    fn load(&self) -> Result<Credentials, StoreError>;
    fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;
    /// Removes everything persisted for the session. Idempotent.
    fn delete(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// `~/.local/share/linkd/auth` on Linux, `%APPDATA%\linkd\data\auth` on Windows, etc.
    pub fn new() -> io::Result<Self> {
        let proj = ProjectDirs::from("", "", "linkd")
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Unable to locate data dir"))?;
        Ok(Self::at(proj.data_dir().join("auth")))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn file(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credentials, StoreError> {
        match fs::File::open(self.file()) {
            Ok(file) => Ok(serde_json::from_reader(io::BufReader::new(file))?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No credentials in {:?}, starting fresh", self.dir);
                Ok(Credentials::empty())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let file = fs::File::create(self.file())?;
        serde_json::to_writer_pretty(file, credentials)?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
