//! secneg CLI binary.
//!
//! # Commands
//!
//! - `probe` - Negotiate against a server and print the outcome
//! - `serve` - Accept connections and negotiate, thread per connection

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secneg::{
    catalog::MechanismCatalog, Config, ClientNegotiator, DelegationPreference, ServerNegotiator,
    VERSION,
};

#[derive(Parser)]
#[command(name = "secneg")]
#[command(version = VERSION)]
#[command(about = "Security mechanism negotiation", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate against a server and print the outcome
    Probe {
        /// Server address (host:port)
        address: String,

        /// Mechanisms to offer, whitespace-separated (default: config/env)
        #[arg(short, long)]
        mechanisms: Option<String>,

        /// Delegation stance
        #[arg(short, long, value_enum, default_value_t = DelegationArg::None)]
        delegation: DelegationArg,

        /// Authorization identity to claim, as mechanism:name
        #[arg(long)]
        identity: Option<String>,

        /// Per-call socket timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Accept connections and negotiate, thread per connection
    Serve {
        /// Listen address (host:port)
        #[arg(short, long, default_value = "0.0.0.0:5013")]
        address: String,

        /// Mechanisms to accept, whitespace-separated (default: config/env)
        #[arg(short, long)]
        mechanisms: Option<String>,

        /// Delegation stance
        #[arg(short, long, value_enum, default_value_t = DelegationArg::None)]
        delegation: DelegationArg,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DelegationArg {
    None,
    Require,
    Forbid,
}

impl From<DelegationArg> for DelegationPreference {
    fn from(arg: DelegationArg) -> Self {
        match arg {
            DelegationArg::None => DelegationPreference::NoPreference,
            DelegationArg::Require => DelegationPreference::Require,
            DelegationArg::Forbid => DelegationPreference::Forbid,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Probe {
            address,
            mechanisms,
            delegation,
            identity,
            timeout,
        } => cmd_probe(&address, mechanisms, delegation.into(), identity, timeout),
        Commands::Serve {
            address,
            mechanisms,
            delegation,
        } => cmd_serve(&address, mechanisms, delegation.into()),
    }
}

fn cmd_probe(
    address: &str,
    mechanisms: Option<String>,
    delegation: DelegationPreference,
    identity: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let catalog = match mechanisms {
        Some(list) => MechanismCatalog::parse(&list)?,
        None => MechanismCatalog::client_catalog(&config)?,
    };

    let mut negotiator = ClientNegotiator::new(catalog, delegation)
        .with_timeout(Duration::from_secs(timeout.unwrap_or(config.timeout().as_secs())));
    if let Some(spec) = identity {
        let (mechanism, name) = spec
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("identity must be mechanism:name, got {spec:?}"))?;
        negotiator = negotiator.with_identity(mechanism, name);
    }

    let mut conn = TcpStream::connect(address)?;
    let outcome = negotiator.negotiate(&mut conn)?;

    if outcome.is_accepted() {
        let mechanism = outcome.mechanism.as_ref().map_or("?", |m| m.id.as_str());
        println!("accepted: {mechanism} (delegation {:?})", outcome.delegation);
        Ok(())
    } else {
        println!(
            "rejected: {} (server offers {:?})",
            outcome
                .failure_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            outcome.peer_candidates
        );
        std::process::exit(1);
    }
}

fn cmd_serve(
    address: &str,
    mechanisms: Option<String>,
    delegation: DelegationPreference,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let listener = TcpListener::bind(address)?;
    tracing::info!(%address, "listening");

    loop {
        let (mut conn, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let catalog = match mechanisms {
            Some(ref list) => MechanismCatalog::parse(list),
            None => MechanismCatalog::server_catalog(&config, Some(peer.ip())),
        };
        let catalog = match catalog {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, "catalog resolution failed");
                continue;
            }
        };
        let timeout = config.timeout();

        thread::spawn(move || {
            let negotiator =
                ServerNegotiator::new(catalog, delegation).with_timeout(timeout);
            match negotiator.negotiate(&mut conn, &[]) {
                Ok(outcome) if outcome.is_accepted() => {
                    tracing::info!(
                        %peer,
                        mechanism = outcome.mechanism.as_ref().map_or("?", |m| m.id.as_str()),
                        "negotiated"
                    );
                }
                Ok(_) => tracing::info!(%peer, "rejected"),
                Err(e) => tracing::warn!(%peer, error = %e, "negotiation failed"),
            }
        });
    }
}
