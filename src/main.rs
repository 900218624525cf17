use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sam_client::{ControlChannel, Resolver, SamConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "SAM bridge client", long_about = None)]
struct Args {
    #[arg(long, help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Router SAM host (overrides config)")]
    host: Option<String>,

    #[arg(long, help = "Router SAM port (overrides config)")]
    port: Option<u16>,

    #[arg(long, default_value = "warn", help = "Log filter when RUST_LOG is unset")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handshake and print the negotiated protocol version
    Probe,
    /// Resolve a name to its base64 destination
    Lookup { name: String },
    /// Generate a new destination and print its keys
    Generate {
        #[arg(long)]
        signature_type: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let addr = config.control_addr();

    match args.command {
        Commands::Probe => {
            let channel = ControlChannel::connect(config)
                .await
                .with_context(|| format!("handshake with {addr} failed"))?;
            println!("SAM {} at {}", channel.version(), channel.router_addr());
            channel.close().await;
        }
        Commands::Lookup { name } => {
            let resolver = Resolver::connect(config)
                .await
                .with_context(|| format!("cannot reach {addr}"))?;
            let destination = resolver
                .lookup(&name)
                .await
                .with_context(|| format!("lookup of {name} failed"))?;
            println!("{}", destination.to_base64());
            println!("{}", destination.b32_address());
            resolver.close().await;
        }
        Commands::Generate { signature_type } => {
            let resolver = Resolver::connect(config)
                .await
                .with_context(|| format!("cannot reach {addr}"))?;
            let destination = resolver
                .generate_destination(signature_type)
                .await
                .context("DEST GENERATE failed")?;
            println!("address: {}", destination.b32_address());
            println!("public:  {}", destination.to_base64());
            if let Some(keys) = destination.private_keys() {
                println!("private: {keys}");
            }
            resolver.close().await;
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<SamConfig> {
    let mut config = match &args.config {
        Some(path) => SamConfig::load_from_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => SamConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}
