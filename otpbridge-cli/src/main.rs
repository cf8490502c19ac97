//! OTP Bridge command-line front-end
//!
//! Enrolls credentials from `otpauth://` or deep-link URIs, prints codes,
//! exchanges sync snapshots as files and answers push login requests.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use otpbridge_core::push::ReqwestPoster;
use otpbridge_core::store::SqliteStore;
use otpbridge_core::uri::parse_enrollment;
use otpbridge_core::{
    platform, AckResponse, AppConfig, CredentialCenter, MemoryChannel, PushService,
    SyncReconciler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "otpbridge")]
#[command(about = "One-time-password credentials with companion-device sync", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a credential from an otpauth:// URI or deep link
    Add {
        uri: String,
    },

    /// List credentials
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the current and next code
    Code {
        identifier: String,

        /// Unix timestamp to evaluate at (defaults to now)
        #[arg(long)]
        at: Option<i64>,
    },

    /// Print the canonical otpauth:// URI
    Uri {
        identifier: String,
    },

    /// Change a credential's display name
    Rename {
        identifier: String,
        name: String,
    },

    /// Delete a credential (irreversible)
    Remove {
        identifier: String,
    },

    /// Report records whose secret or metadata half is missing
    Orphans,

    /// Exchange sync snapshots as files
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Answer a push login request
    Ack {
        /// File containing the push payload JSON
        payload: PathBuf,

        #[arg(long, value_enum)]
        response: AckChoice,
    },

    /// Register this device for push notifications
    Register {
        identifier: String,

        #[arg(long)]
        server_id: String,

        #[arg(long)]
        device_token: String,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Write the full local snapshot
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Merge a snapshot received from the peer
    Apply {
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AckChoice {
    Accept,
    Decline,
}

impl From<AckChoice> for AckResponse {
    fn from(choice: AckChoice) -> Self {
        match choice {
            AckChoice::Accept => AckResponse::Accept,
            AckChoice::Decline => AckResponse::Decline,
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(platform::get_default_config_path);
    let mut config = AppConfig::load_or_default(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

fn open_center(database_path: &Path) -> Result<Arc<CredentialCenter>> {
    if let Some(parent) = database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(
        SqliteStore::open(database_path)
            .with_context(|| format!("failed to open {}", database_path.display()))?,
    );
    Ok(Arc::new(CredentialCenter::new(store.clone(), store)))
}

/// Snapshot import/export works without a live peer.
fn offline_reconciler(center: &Arc<CredentialCenter>) -> SyncReconciler {
    let (channel, _) = MemoryChannel::pair();
    SyncReconciler::new(center.clone(), Arc::new(channel))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let center = open_center(&config.database_path)?;

    match cli.command {
        Commands::Add { uri } => {
            let descriptor = parse_enrollment(&uri, &config.deep_link_scheme)?;
            let extended = center.add_credential(&descriptor)?;
            println!("{}  {}", extended.identifier, extended.local_name);
        }
        Commands::List { json } => {
            let credentials = center.list_credentials()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&credentials)?);
            } else {
                for credential in credentials {
                    let endpoints: Vec<String> = credential
                        .endpoints
                        .iter()
                        .map(|(endpoint, service)| format!("{:?}={}", endpoint, service.url))
                        .collect();
                    println!(
                        "{}  {}  {}",
                        credential.identifier,
                        credential.local_name,
                        endpoints.join(" ")
                    );
                }
            }
        }
        Commands::Code { identifier, at } => {
            let now = at.unwrap_or_else(|| chrono::Utc::now().timestamp());
            let code = center.code_at(&identifier, now)?;
            match code.seconds_remaining {
                Some(remaining) => println!(
                    "{}  (next {}, {}s left)",
                    code.current, code.next, remaining
                ),
                None => println!("{}  (next {})", code.current, code.next),
            }
        }
        Commands::Uri { identifier } => {
            println!("{}", center.credential_uri(&identifier)?);
        }
        Commands::Rename { identifier, name } => {
            let extended = center.rename_credential(&identifier, &name)?;
            println!("{}  {}", extended.identifier, extended.local_name);
        }
        Commands::Remove { identifier } => {
            center.remove_credential(&identifier)?;
            info!("Removed {}", identifier);
        }
        Commands::Orphans => {
            for orphan in center.orphaned()? {
                println!("{}  {:?}", orphan.identifier, orphan.kind);
            }
        }
        Commands::Snapshot { action } => {
            let reconciler = offline_reconciler(&center);
            match action {
                SnapshotAction::Export { out } => {
                    let context = reconciler.outgoing_snapshot()?.encode()?;
                    match out {
                        Some(path) => std::fs::write(&path, context)
                            .with_context(|| format!("failed to write {}", path.display()))?,
                        None => println!("{}", String::from_utf8_lossy(&context)),
                    }
                }
                SnapshotAction::Apply { file } => {
                    let context = std::fs::read(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    let report = reconciler.apply_context(&context)?;
                    println!(
                        "added {}, updated {}, unchanged {}, dropped {}, failed {}",
                        report.added,
                        report.updated,
                        report.unchanged,
                        report.dropped,
                        report.failed
                    );
                }
            }
        }
        Commands::Ack { payload, response } => {
            let payload = std::fs::read(&payload)
                .with_context(|| format!("failed to read {}", payload.display()))?;
            let push = PushService::new(Arc::new(ReqwestPoster::new(config.ack_timeout())?));

            let pending = push.receive(&payload, &center.list_credentials()?)?;
            info!(
                "Login request for {} ({})",
                pending.environment_name, pending.notification.alert.message
            );
            push.respond(&pending.ack_url, response.into()).await?;
            println!("Response sent to {}", pending.ack_url);
        }
        Commands::Register {
            identifier,
            server_id,
            device_token,
        } => {
            let credential = center
                .get(&identifier)?
                .with_context(|| format!("no credential with identifier {}", identifier))?;
            let push = PushService::new(Arc::new(ReqwestPoster::new(config.ack_timeout())?));

            push.enroll(&credential);
            push.register(&credential, &server_id, &device_token).await?;
            println!("Registered {}", identifier);
        }
    }

    Ok(())
}
