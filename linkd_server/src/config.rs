use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use linkd_core::{FileCredentialStore, ReconnectPolicy, SidecarConfig};

/// Command-line / environment options of the server.
#[derive(Parser, Debug)]
#[command(name = "linkd-server", version, about = "HTTP control surface for one messaging session")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LINKD_BIND", default_value = "127.0.0.1")]
    pub bind: IpAddr,
    /// Port to listen on
    #[arg(long, env = "LINKD_PORT", default_value_t = 3000)]
    pub port: u16,
    /// Credential directory (defaults to the platform data dir)
    #[arg(long, env = "LINKD_AUTH_DIR")]
    pub auth_dir: Option<PathBuf>,
    /// Protocol sidecar program
    #[arg(long, env = "LINKD_SIDECAR", default_value = "node")]
    pub sidecar: String,
    /// Argument passed to the sidecar (repeatable)
    #[arg(
        long = "sidecar-arg",
        env = "LINKD_SIDECAR_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true,
        default_value = "bridge.js"
    )]
    pub sidecar_args: Vec<String>,
    /// Handshake timeout handed to the sidecar, in seconds
    #[arg(long, default_value_t = 60)]
    pub connect_timeout_secs: u64,
    /// Keep-alive interval handed to the sidecar, in seconds
    #[arg(long, default_value_t = 10)]
    pub keep_alive_secs: u64,
    /// Automatic reconnects before waiting for POST /connect
    #[arg(long, env = "LINKD_MAX_RETRIES", default_value_t = 10)]
    pub max_retries: u32,
    /// Reconnect right away after a remote logout wiped the credentials
    #[arg(long, env = "LINKD_RESTART_ON_LOGOUT", default_value_t = true, action = ArgAction::Set)]
    pub restart_on_logout: bool,
}

impl Args {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.max_retries,
            restart_on_logout: self.restart_on_logout,
            ..ReconnectPolicy::default()
        }
    }

    pub fn sidecar(&self) -> SidecarConfig {
        SidecarConfig {
            program: self.sidecar.clone(),
            args: self.sidecar_args.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }

    pub fn store(&self) -> io::Result<FileCredentialStore> {
        match &self.auth_dir {
            Some(dir) => Ok(FileCredentialStore::at(dir)),
            None => FileCredentialStore::new(),
        }
    }
}
