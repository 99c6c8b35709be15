//! Probe binary for as400-bridge
//!
//! Connects to a host with the configured retry policy, prints the first
//! screen as JSON, and disconnects.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;

use as400_bridge::config::{BridgeConfig, Credentials};
use as400_bridge::{ConnectionManager, SessionTransport, TcpSessionTransport};

fn print_help() {
    println!("as400-bridge - probe an IBM i 5250 host");
    println!();
    println!("Usage: as400-bridge [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <path> or -c <path>        Bridge config file (default: platform config dir)");
    println!("  --server <server> or -s <server>    Host to connect to");
    println!("  --port <port> or -p <port>          Port to connect to (default: 23)");
    println!("  --user <username> or -u <username>  Sign-on user");
    println!("  --password <password> or --pass     Sign-on password");
    println!("  --device <name>                     Device name to request");
    println!("  --help or -h                        Show this help message");
    println!();
    println!("Environment: AS400_BRIDGE_CONFIG, AS400_BRIDGE_HOST, AS400_BRIDGE_PORT,");
    println!("             AS400_BRIDGE_USER, AS400_BRIDGE_PASSWORD, RUST_LOG");
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    server: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    device: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| iter.next().with_context(|| format!("{name} requires a value"));
        match arg.as_str() {
            "--config" | "-c" => args.config = Some(PathBuf::from(value("--config")?)),
            "--server" | "-s" => args.server = Some(value("--server")?),
            "--port" | "-p" => {
                let port = value("--port")?;
                args.port = Some(
                    port.parse()
                        .with_context(|| format!("--port requires a numeric value, got '{port}'"))?,
                );
            }
            "--user" | "-u" => args.user = Some(value("--user")?),
            "--password" | "--pass" => args.password = Some(value("--password")?),
            "--device" => args.device = Some(value("--device")?),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => bail!("unknown option '{other}' (try --help)"),
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = BridgeConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => BridgeConfig::load_default()?,
    };

    if let Some(server) = &args.server {
        config.session.host = server.clone();
    }
    if let Some(port) = args.port {
        config.session.port = port;
    }
    if let Some(device) = &args.device {
        config.session.device_name = Some(device.clone());
    }
    if let Some(user) = &args.user {
        let password = args.password.clone().unwrap_or_default();
        config.session.credentials = Some(Credentials::new(user.clone(), password));
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let config = load_config(&args)?;
    let policy = config.retry_policy();
    let catalog = Arc::new(config.screens.clone());

    let mut manager = ConnectionManager::new(move |session| {
        TcpSessionTransport::new(session.clone(), Arc::clone(&catalog))
    });

    info!("probing {}", config.session.address());
    let session = manager
        .connect_with_retry(config.session.clone(), policy)
        .await
        .with_context(|| format!("connecting to {}", config.session.address()))?;
    let screen = session.receive().await.context("reading the first screen")?;

    println!("{}", serde_json::to_string_pretty(&screen)?);
    manager.disconnect().await;
    Ok(())
}
