//! upnp-watch
//!
//! Watches the local network for UPnP devices and prints the roster each
//! time it changes.
//!
//! ```bash
//! # Media renderers, until interrupted
//! upnp-watch
//!
//! # Everything that answers, for 30 seconds, with debug logging
//! upnp-watch --target ssdp:all --duration 30 --verbose
//!
//! # Timing from a config file
//! upnp-watch --config discovery.toml
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::sync::mpsc;
use upnp_discovery::{Device, Discovery, DiscoveryConfig, DiscoveryEvent, NetTransport};

/// Watch the network for UPnP devices
#[derive(Parser, Debug)]
#[command(name = "upnp-watch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Discovery configuration file (TOML, durations in milliseconds)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Search target, overriding the config file
    #[arg(short, long)]
    target: Option<String>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Log discovery traffic
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => DiscoveryConfig::default(),
    };
    if let Some(target) = args.target {
        config = config.with_search_target(target);
    }

    let transport = NetTransport::new(config.http_timeout)?;
    let (events, mut rx) = mpsc::unbounded_channel();
    let discovery = Discovery::new(config, transport, events)?;
    discovery.start().await?;

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(DiscoveryEvent::DevicesChanged(devices)) => print_roster(&devices),
                Some(DiscoveryEvent::MediaInfoReceived(info)) => {
                    log::debug!("Media info from {}: {}", info.device_id, info.action);
                }
                None => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    discovery.stop().await?;
    Ok(())
}

fn load_config(path: &Path) -> Result<DiscoveryConfig, Box<dyn std::error::Error>> {
    log::info!("Loading config from {:?}", path);
    let contents = std::fs::read_to_string(path)?;
    let config: DiscoveryConfig = toml::from_str(&contents)?;
    Ok(config)
}

fn print_roster(devices: &[Device]) {
    println!("{} device(s):", devices.len());
    for device in devices {
        println!(
            "  {:<36} {:<28} {}",
            device.id.as_str(),
            device.friendly_name().unwrap_or("-"),
            device.info_url
        );
        if let Some(url) = &device.media_state_url {
            println!("  {:<36} media state at {}", "", url);
        }
    }
}
