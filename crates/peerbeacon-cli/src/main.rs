//! peerbeacon CLI: announce this host, or find announcing hosts, on the
//! local network.

mod config;

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use peerbeacon_discovery::{
    local_addresses, multicast_interfaces, without_local, Broadcaster, Discoverer,
};
use peerbeacon_types::{IpVersion, Options};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "peerbeacon",
    about = "LAN peer discovery over IP multicast",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by both roles. Unset flags fall back to the config file.
#[derive(Args, Debug, Default)]
struct NetworkArgs {
    /// UDP port.
    #[arg(short, long)]
    port: Option<String>,

    /// Multicast group address.
    #[arg(short, long)]
    group: Option<String>,

    /// Use IPv6 instead of IPv4.
    #[arg(short = '6', long)]
    ipv6: bool,

    /// Payload sent with, and matched against, every announcement.
    #[arg(long)]
    payload: Option<String>,
}

impl NetworkArgs {
    fn options(&self) -> Options {
        Options {
            port: self.port.clone(),
            multicast_address: self.group.clone(),
            ip_version: self.ipv6.then_some(IpVersion::V6),
            payload: self.payload.clone().map(String::into_bytes),
            ..Options::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Announce this host until interrupted or the duration elapses.
    Broadcast {
        #[command(flatten)]
        net: NetworkArgs,

        /// Interval between announcements, in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Stop after this many milliseconds. 0 runs until interrupted.
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Listen for announcing hosts and print their addresses.
    Discover {
        #[command(flatten)]
        net: NetworkArgs,

        /// Stop after this many distinct hosts. 0 listens for the whole window.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Length of the discovery window, in milliseconds.
        #[arg(short, long)]
        time_limit_ms: Option<u64>,

        /// Leave out addresses that belong to this host.
        #[arg(long)]
        exclude_local: bool,
    },

    /// Show the interfaces multicast would use.
    Interfaces {
        /// Select IPv6 interfaces instead of IPv4.
        #[arg(short = '6', long)]
        ipv6: bool,
    },

    /// Show the addresses that belong to this host.
    LocalAddrs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = config::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &config_path {
        Some(path) => info!(path = %path.display(), "loaded config"),
        None => info!("no config file found, using defaults"),
    }

    match cli.command {
        Commands::Broadcast {
            net,
            delay_ms,
            duration_ms,
        } => {
            let options = config.discovery.merge(Options {
                broadcast_delay: delay_ms.map(Duration::from_millis),
                duration: duration_ms.map(Duration::from_millis),
                ..net.options()
            });
            broadcast(options).await?;
        }
        Commands::Discover {
            net,
            limit,
            time_limit_ms,
            exclude_local,
        } => {
            let options = config.discovery.merge(Options {
                limit,
                time_limit: time_limit_ms.map(Duration::from_millis),
                ..net.options()
            });
            discover(options, exclude_local).await?;
        }
        Commands::Interfaces { ipv6 } => {
            let version = if ipv6 { IpVersion::V6 } else { IpVersion::V4 };
            let interfaces = multicast_interfaces(version)?;
            if interfaces.is_empty() {
                eprintln!("no {version} multicast interface found");
            }
            for iface in interfaces {
                let addrs: Vec<String> = iface.addrs.iter().map(ToString::to_string).collect();
                println!("{} (index {}): {}", iface.name, iface.index, addrs.join(", "));
            }
        }
        Commands::LocalAddrs => {
            let mut addrs: Vec<String> = local_addresses().into_iter().collect();
            addrs.sort();
            for addr in addrs {
                println!("{addr}");
            }
        }
    }

    Ok(())
}

async fn broadcast(options: Options) -> anyhow::Result<()> {
    broadcast_until(&Broadcaster::new(options), tokio::signal::ctrl_c()).await
}

/// Broadcast until the run ends or `interrupt` resolves `Ok`. An `Err` from
/// `interrupt` leaves the broadcast running.
async fn broadcast_until(
    broadcaster: &Broadcaster,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> anyhow::Result<()> {
    let mut handle = broadcaster.start_async();

    let result = tokio::select! {
        result = &mut handle => result,
        Ok(()) = interrupt => {
            info!("interrupted, stopping broadcast");
            broadcaster.stop();
            handle.await
        }
    };

    result
        .context("broadcast task panicked")?
        .context("broadcast failed")
}

async fn discover(options: Options, exclude_local: bool) -> anyhow::Result<()> {
    let discoverer = Discoverer::new(options);
    let completion = discoverer.completion();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, ending discovery");
            completion.cancel();
        }
    });

    let mut peers = discoverer.discover().await.context("discovery failed")?;
    if exclude_local {
        peers = without_local(peers, &local_addresses());
    }
    peers.sort();

    if peers.is_empty() {
        eprintln!("no peers found");
    }
    for peer in peers {
        println!("{peer}");
    }
    Ok(())
}
