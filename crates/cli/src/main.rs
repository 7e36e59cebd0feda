use anyhow::Context;
use clap::{Parser, Subcommand};
use orderly_core::{
    BatchSignContext, CoreConfig, CredentialVerifier, InMemoryDirectory, MinimumLengthVerifier,
    NewOrder, OrderFilter, OrderPatch, OrderService, OrderStatus, Priority, SignRequest,
    StaticCredentials, StatusMetadata,
};
use orderly_core::config::ENV_DATA_DIR;
use orderly_core::constants::DEFAULT_DATA_DIR;
use orderly_ids::ShardableUuid;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "orderly")]
#[command(about = "Clinical order lifecycle and signature integrity CLI")]
struct Cli {
    /// Data directory holding the order store and artifacts (overrides ORDERLY_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// YAML file with facilities, patients, signers, compendium and policies
    #[arg(long, global = true, default_value = "directory.yaml")]
    directory: PathBuf,
    /// YAML file with per-signer PIN digests; without it any credential of the minimum
    /// length is accepted
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a draft order
    Create {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        facility: u64,
        /// Requesting signer
        #[arg(long)]
        signer: u64,
        /// Compendium item id (repeatable)
        #[arg(long = "test", required = true)]
        tests: Vec<u64>,
        /// ICD-10 diagnosis code (repeatable)
        #[arg(long = "icd10")]
        icd10_codes: Vec<String>,
        #[arg(long, default_value = "routine")]
        priority: Priority,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Update a draft or signed order
    Update {
        order_id: ShardableUuid,
        #[arg(long)]
        priority: Option<Priority>,
        /// Replacement compendium item ids (repeatable)
        #[arg(long = "test")]
        tests: Vec<u64>,
        /// Replacement ICD-10 codes (repeatable)
        #[arg(long = "icd10")]
        icd10_codes: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        actor: Option<u64>,
    },
    /// Exchange a signer credential for a session token
    Authenticate {
        #[arg(long)]
        signer: u64,
        #[arg(long)]
        credential: String,
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,
    },
    /// Sign a draft order
    Sign {
        order_id: ShardableUuid,
        #[command(flatten)]
        signing: SigningArgs,
    },
    /// Sign several orders with one session
    SignMany {
        #[arg(required = true)]
        order_ids: Vec<ShardableUuid>,
        #[command(flatten)]
        signing: SigningArgs,
    },
    /// Move an order to a new status
    Status {
        order_id: ShardableUuid,
        status: OrderStatus,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        external_reference: Option<String>,
        #[arg(long)]
        actor: Option<u64>,
    },
    /// Cancel an order
    Cancel {
        order_id: ShardableUuid,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: Option<u64>,
    },
    /// Show one order
    Show { order_id: ShardableUuid },
    /// Show the audit events of one order
    Timeline { order_id: ShardableUuid },
    /// Verify the integrity of an order's signature artifact
    Verify { order_id: ShardableUuid },
    /// Check whether tests need an Advance Beneficiary Notice
    Compliance {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        facility: u64,
        #[arg(long = "test", required = true)]
        tests: Vec<u64>,
    },
    /// Attach a signed Advance Beneficiary Notice to a draft order
    SignAbn {
        order_id: ShardableUuid,
        /// File holding the notice image, raw or as a base64 data URL
        #[arg(long)]
        artifact: PathBuf,
        #[arg(long)]
        actor: Option<u64>,
    },
    /// List orders
    List {
        #[arg(long)]
        facility: Option<u64>,
        #[arg(long)]
        patient: Option<u64>,
        #[arg(long)]
        status: Option<OrderStatus>,
    },
}

#[derive(clap::Args)]
struct SigningArgs {
    #[arg(long)]
    signer: u64,
    #[arg(long)]
    token: String,
    /// File holding the signature image, raw or as a base64 data URL
    #[arg(long)]
    signature: PathBuf,
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,
    #[arg(long)]
    user_agent: Option<String>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orderly=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    // An explicit --data-dir wins over ORDERLY_DATA_DIR.
    let flag_dir = cli.data_dir.is_some();
    let config = CoreConfig::from_env_values(
        cli.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        |key| {
            if flag_dir && key == ENV_DATA_DIR {
                return None;
            }
            std::env::var(key).ok()
        },
    )?;

    let directory = InMemoryDirectory::load(&cli.directory)
        .with_context(|| format!("loading reference directory {}", cli.directory.display()))?;
    let verifier = credential_verifier(cli.credentials.as_deref())?;
    tracing::debug!(
        data_dir = %config.data_dir().display(),
        directory = %cli.directory.display(),
        "opening order store"
    );
    let service = OrderService::open(Arc::new(config), Arc::new(directory), verifier)?;

    run(&service, cli.command).map_err(|e| {
        tracing::error!("command failed: {e:#}");
        e
    })
}

fn credential_verifier(path: Option<&Path>) -> anyhow::Result<Arc<dyn CredentialVerifier>> {
    match path {
        Some(path) => {
            let credentials = StaticCredentials::load(path)
                .with_context(|| format!("loading credentials {}", path.display()))?;
            tracing::debug!(signers = credentials.len(), "loaded signer credentials");
            Ok(Arc::new(credentials))
        }
        None => {
            tracing::warn!("no --credentials file given; only the minimum length is checked");
            Ok(Arc::new(MinimumLengthVerifier))
        }
    }
}

fn run(service: &OrderService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Create {
            patient,
            facility,
            signer,
            tests,
            icd10_codes,
            priority,
            notes,
        } => print_json(&service.create_order(NewOrder {
            patient_id: patient,
            facility_id: facility,
            signer_id: signer,
            priority,
            test_ids: tests,
            icd10_codes,
            notes,
        })?),
        Commands::Update {
            order_id,
            priority,
            tests,
            icd10_codes,
            notes,
            actor,
        } => print_json(&service.update_order(
            &order_id,
            OrderPatch {
                priority,
                test_ids: (!tests.is_empty()).then_some(tests),
                icd10_codes: (!icd10_codes.is_empty()).then_some(icd10_codes),
                notes,
                actor_id: actor,
            },
        )?),
        Commands::Authenticate {
            signer,
            credential,
            ip,
        } => print_json(&service.authenticate(signer, &credential, &ip)?),
        Commands::Sign { order_id, signing } => {
            let signature = read_artifact(&signing.signature)?;
            print_json(&service.sign_order(SignRequest {
                order_id,
                signer_id: signing.signer,
                token: signing.token,
                signature,
                ip_address: signing.ip,
                user_agent: signing.user_agent,
            })?)
        }
        Commands::SignMany { order_ids, signing } => {
            let signature = read_artifact(&signing.signature)?;
            print_json(&service.sign_many(
                &order_ids,
                BatchSignContext {
                    signer_id: signing.signer,
                    token: signing.token,
                    signature,
                    ip_address: signing.ip,
                    user_agent: signing.user_agent,
                },
            )?)
        }
        Commands::Status {
            order_id,
            status,
            reason,
            note,
            external_reference,
            actor,
        } => print_json(&service.update_status(
            &order_id,
            status,
            StatusMetadata {
                reason,
                note,
                external_reference,
                actor_id: actor,
            },
        )?),
        Commands::Cancel {
            order_id,
            reason,
            actor,
        } => print_json(&service.cancel_order(&order_id, &reason, actor)?),
        Commands::Show { order_id } => print_json(&service.get_order(&order_id)?),
        Commands::Timeline { order_id } => print_json(&service.get_order_timeline(&order_id)?),
        Commands::Verify { order_id } => print_json(&service.verify_signature(&order_id)?),
        Commands::Compliance {
            patient,
            facility,
            tests,
        } => print_json(&service.check_compliance_requirement(patient, facility, &tests)?),
        Commands::SignAbn {
            order_id,
            artifact,
            actor,
        } => {
            let bytes = read_artifact(&artifact)?;
            print_json(&service.sign_compliance_notice(&order_id, &bytes, actor)?)
        }
        Commands::List {
            facility,
            patient,
            status,
        } => print_json(&service.list_orders(OrderFilter {
            facility_id: facility,
            patient_id: patient,
            status,
        })?),
    }
}

fn read_artifact(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut bytes =
        std::fs::read(path).with_context(|| format!("reading artifact {}", path.display()))?;
    // Data URLs saved from a browser often end with a newline.
    if bytes.starts_with(b"data:") {
        while bytes.last().is_some_and(u8::is_ascii_whitespace) {
            bytes.pop();
        }
    }
    Ok(bytes)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
