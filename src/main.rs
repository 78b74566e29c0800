//! certgate - ACME certificate renewal for internet-facing gateways

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certgate_acme::LetsEncryptAuthority;
use certgate_azure::{ArmClient, AzureApplicationGateway, AzureBlobStore, AzureNsgFirewall};
use certgate_renew::{
    slot_renewal_due, GatewayApi, PollingPolicy, RenewalOrchestrator, RenewalPolicy,
    RenewalRequest,
};

/// Renew a gateway TLS certificate over ACME HTTP-01 and install it
#[derive(Parser, Debug)]
#[command(name = "certgate")]
#[command(about = "Renew gateway TLS certificates over ACME", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one certificate renewal
    Renew {
        /// Path to the renewal request JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// Bearer token for the Azure control plane
        #[arg(long, env = "CERTGATE_ARM_TOKEN", hide_env_values = true)]
        arm_token: String,

        /// Bearer token for blob storage; defaults to the control-plane token
        #[arg(long, env = "CERTGATE_STORAGE_TOKEN", hide_env_values = true)]
        storage_token: Option<String>,

        /// Azure subscription the resources live in
        #[arg(long, env = "CERTGATE_SUBSCRIPTION_ID")]
        subscription: String,

        /// Use the Let's Encrypt staging directory
        #[arg(long)]
        staging: bool,

        /// Renew even if the installed certificate is not close to expiry
        #[arg(long)]
        force: bool,

        /// Renew when the installed certificate expires within this many days
        #[arg(long, default_value = "30")]
        renew_within_days: u32,

        /// Upper bound in seconds for each authority polling loop
        #[arg(long, default_value = "600")]
        poll_timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Renew {
            config,
            arm_token,
            storage_token,
            subscription,
            staging,
            force,
            renew_within_days,
            poll_timeout_secs,
        } => {
            renew(RenewArgs {
                config,
                arm_token,
                storage_token,
                subscription,
                staging,
                force,
                renew_within_days,
                poll_timeout_secs,
            })
            .await
        }
    }
}

struct RenewArgs {
    config: PathBuf,
    arm_token: String,
    storage_token: Option<String>,
    subscription: String,
    staging: bool,
    force: bool,
    renew_within_days: u32,
    poll_timeout_secs: u64,
}

async fn renew(args: RenewArgs) -> Result<()> {
    let json = std::fs::read_to_string(&args.config)
        .context(format!("Failed to read request file: {:?}", args.config))?;
    let request: RenewalRequest = serde_json::from_str(&json)
        .context(format!("Failed to parse request file: {:?}", args.config))?;
    info!(domain = %request.domain, "loaded renewal request");

    let arm = ArmClient::new(args.arm_token.clone(), args.subscription);
    let store = AzureBlobStore::new(args.storage_token.unwrap_or(args.arm_token));
    let firewall = AzureNsgFirewall::new(arm.clone());
    let gateway = AzureApplicationGateway::new(arm);

    if !args.force {
        let config = gateway.fetch_config(&request.gateway).await?;
        match slot_renewal_due(
            &config,
            &request.gateway.certificate_slot,
            args.renew_within_days,
        )? {
            Some(false) => {
                info!(
                    slot = %request.gateway.certificate_slot,
                    "installed certificate is not due for renewal, nothing to do"
                );
                return Ok(());
            }
            Some(true) => info!(
                within_days = args.renew_within_days,
                "installed certificate expires soon, renewing"
            ),
            None => info!("certificate slot exposes no current certificate, renewing"),
        }
    }

    let authority = if args.staging {
        LetsEncryptAuthority::staging()
    } else {
        LetsEncryptAuthority::production()
    };
    let policy = RenewalPolicy {
        polling: PollingPolicy {
            poll_timeout: Duration::from_secs(args.poll_timeout_secs),
            ..PollingPolicy::default()
        },
        ..RenewalPolicy::default()
    };

    let mut orchestrator =
        RenewalOrchestrator::new(authority, store, firewall, gateway).with_policy(policy);
    let report = orchestrator
        .run(&request)
        .await
        .context("certificate renewal failed")?;

    info!(
        domain = %report.domain,
        slot = %report.certificate_slot,
        chain_length = report.chain_length,
        not_after = %report.not_after,
        "renewal finished"
    );
    Ok(())
}
