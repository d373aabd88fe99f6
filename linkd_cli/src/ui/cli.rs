use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use linkd_core::connections::SessionConnector;
use linkd_core::core::groups::{enumerate_groups, EnumerateError};
use linkd_core::{CredentialStore, FileCredentialStore, SidecarConfig, SidecarConnector};
use log::{error, info};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "linkd", version, subcommand_required = true)]
pub struct Args {
    /// Credential directory (defaults to the platform data dir)
    #[arg(long, global = true, env = "LINKD_AUTH_DIR")]
    pub auth_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect once with the stored session and write the group list to a file
    ListGroups {
        /// Report file
        #[arg(long, short, default_value = "groups.txt")]
        output: PathBuf,
        /// Protocol sidecar program
        #[arg(long, env = "LINKD_SIDECAR", default_value = "node")]
        sidecar: String,
        /// Argument passed to the sidecar (repeatable)
        #[arg(
            long = "sidecar-arg",
            env = "LINKD_SIDECAR_ARGS",
            value_delimiter = ' ',
            allow_hyphen_values = true,
            default_value = "bridge.js"
        )]
        sidecar_args: Vec<String>,
        /// Give up if the session has not opened after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Delete the stored session so the next start asks for a new QR link
    Logout,
}

/// Runs the selected command and returns the process exit code.
pub async fn run_cli(args: Args) -> i32 {
    let store = match open_store(args.auth_dir.as_deref()) {
        Ok(store) => store,
        Err(e) => {
            error!("{e:#}");
            return 1;
        }
    };

    match args.command {
        Command::ListGroups {
            output,
            sidecar,
            sidecar_args,
            timeout_secs,
        } => {
            let connector = SidecarConnector::new(SidecarConfig {
                program: sidecar,
                args: sidecar_args,
                ..SidecarConfig::default()
            });
            let timeout = Duration::from_secs(timeout_secs);
            match list_groups(&connector, &store, timeout, &output).await {
                Ok(()) => 0,
                Err(e) => {
                    report_failure(&e);
                    1
                }
            }
        }
        Command::Logout => match store.delete() {
            Ok(()) => {
                info!("Session cleared in {}", store.dir().display());
                0
            }
            Err(e) => {
                error!("Failed to clear session: {e}");
                1
            }
        },
    }
}

fn open_store(auth_dir: Option<&Path>) -> anyhow::Result<FileCredentialStore> {
    match auth_dir {
        Some(dir) => Ok(FileCredentialStore::at(dir)),
        None => FileCredentialStore::new().context("cannot locate the credential directory"),
    }
}

/// Enumerate groups once and write the flat report to `output`.
pub async fn list_groups(
    connector: &dyn SessionConnector,
    store: &dyn CredentialStore,
    timeout: Duration,
    output: &Path,
) -> anyhow::Result<()> {
    let report = enumerate_groups(connector, store, timeout).await?;
    let text = report.render();
    println!("{text}");
    std::fs::write(output, &text)
        .with_context(|| format!("cannot write report to {}", output.display()))?;
    info!("{} groups saved to {}", report.len(), output.display());
    Ok(())
}

fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<EnumerateError>() {
        Some(EnumerateError::SessionInvalid) => {
            error!("Session invalid. Please relink the device (scan a new QR) first.")
        }
        _ => error!("Error fetching groups: {err:#}"),
    }
}
