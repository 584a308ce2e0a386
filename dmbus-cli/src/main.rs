//! CLI for talking to a dmbus peer.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod monitor;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dmbus::proto::{self, DeviceType, DisplayQuery, Message, MsgType, Prologue, ServiceId};
use dmbus::{PollLoop, Service, ServiceConfig, SocketConnector};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "dmbus", version, about = "Client for the dmbus device-model message bus")]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    /// Log filter, e.g. `debug` or `dmbus=trace` (overrides RUST_LOG).
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and log every event until interrupted.
    Monitor(monitor::MonitorArgs),

    /// Ask the display service for one display's geometry limits.
    DisplayInfo {
        /// Display to query.
        id: u32,
    },

    /// Print the protocol fingerprint and the prologue this client sends.
    Fingerprint,
}

/// Where to connect and how to announce ourselves.
#[derive(Args)]
pub(crate) struct ConnArgs {
    /// Service to connect to (`surfman` or `input`).
    #[arg(long, global = true, default_value = "surfman")]
    service: ServiceId,

    /// Device type announced in the prologue.
    #[arg(long, global = true, default_value = "xenfb")]
    device_type: DeviceType,

    /// Local domain id announced in the prologue.
    #[arg(long, global = true, default_value_t = 0)]
    domain: u32,

    /// Peer domain (the vsock CID).
    #[arg(long, global = true, default_value_t = 0)]
    peer_domain: u32,

    /// Connect over Unix sockets in this directory instead of vsock.
    #[arg(long, global = true, value_name = "DIR")]
    unix: Option<PathBuf>,

    /// Delay between reconnection attempts.
    #[arg(long, global = true, default_value_t = 1000, value_name = "MS")]
    reconnect_ms: u64,
}

impl ConnArgs {
    pub(crate) fn config(&self) -> ServiceConfig {
        ServiceConfig::new(self.service, self.device_type)
            .local_domain(self.domain)
            .peer_domain(self.peer_domain)
            .reconnect_delay(Duration::from_millis(self.reconnect_ms))
    }

    pub(crate) fn connector(&self) -> SocketConnector {
        self.unix
            .as_ref()
            .map_or_else(SocketConnector::vsock, SocketConnector::unix)
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());
    if let Err(e) = cli.dispatch() {
        eprintln!("dmbus: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = filter.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        EnvFilter::new,
    );
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Monitor(args) => monitor::run(&args, &self.conn),
            Command::DisplayInfo { id } => display_info(&self.conn, id),
            Command::Fingerprint => fingerprint(&self.conn),
        }
    }
}

fn display_info(conn: &ConnArgs, id: u32) -> Result<()> {
    let config = conn.config();
    let mut ev = PollLoop::new();
    let mut svc = Service::connect(&config, conn.connector(), (), &mut ev)
        .with_context(|| format!("failed to connect to {}", config.peer()))?;

    svc.send(&Message::DisplayGetInfo(DisplayQuery { display_id: id }), &mut ev)?;
    let reply = svc.receive_message(MsgType::DisplayInfo, &mut ev)?;
    svc.disconnect(&mut ev);

    let Message::DisplayInfo(info) = reply else {
        bail!("unexpected reply: {reply:?}");
    };
    println!(
        "display {}: max {}x{}, stride alignment {}",
        info.display_id, info.max_xres, info.max_yres, info.align
    );
    Ok(())
}

fn fingerprint(conn: &ConnArgs) -> Result<()> {
    let prologue = Prologue::new(conn.domain, conn.device_type)?;
    println!("fingerprint: {}", hex::encode(proto::fingerprint()?));
    println!("prologue:    {}", hex::encode(prologue.to_bytes()));
    Ok(())
}
