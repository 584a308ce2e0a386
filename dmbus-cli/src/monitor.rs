//! `dmbus monitor`: stay connected and log whatever the peer sends.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use dmbus::proto::{InputConfig, Message};
use dmbus::{Handler, PollLoop, Service};
use tracing::info;

use crate::ConnArgs;

#[derive(Args)]
pub struct MonitorArgs {
    /// Stop after this many seconds instead of running until interrupted.
    #[arg(long = "for", value_name = "SECS")]
    duration: Option<u64>,

    /// Send `DeviceModelReady` once connected.
    #[arg(long)]
    ready: bool,
}

/// Logs every callback and counts them.
#[derive(Debug, Default)]
struct LogHandler {
    events: u64,
    reconnects: u64,
}

impl Handler for LogHandler {
    fn dom0_input_event(&mut self, kind: u16, code: u16, value: i32) {
        self.events += 1;
        info!(kind, code, value, "input event");
    }

    fn display_info(&mut self, display_id: u32, max_xres: u32, max_yres: u32, align: u32) {
        self.events += 1;
        info!(display_id, max_xres, max_yres, align, "display info");
    }

    fn display_edid(&mut self, display_id: u32, edid: &[u8]) {
        self.events += 1;
        info!(display_id, edid = %hex::encode(edid), "display edid");
    }

    fn input_config(&mut self, config: &InputConfig) {
        self.events += 1;
        info!(
            slot = config.slot,
            name = %config.name,
            vendor = config.vendor,
            product = config.product,
            "input config"
        );
    }

    fn input_config_reset(&mut self, slot: u8) {
        self.events += 1;
        info!(slot, "input config reset");
    }

    fn reconnected(&mut self) {
        self.reconnects += 1;
        info!(count = self.reconnects, "reconnected");
    }
}

pub fn run(args: &MonitorArgs, conn: &ConnArgs) -> Result<()> {
    let config = conn.config();
    let mut ev = PollLoop::new();
    let mut svc = Service::connect(&config, conn.connector(), LogHandler::default(), &mut ev)
        .with_context(|| format!("failed to connect to {}", config.peer()))?;

    if args.ready {
        svc.send(&Message::DeviceModelReady, &mut ev)?;
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        let remaining = match deadline {
            Some(at) => match at.checked_duration_since(Instant::now()) {
                Some(left) if !left.is_zero() => Some(left),
                _ => break,
            },
            None => None,
        };
        for event in ev.wait(remaining).context("event loop failed")? {
            svc.handle_event(event, &mut ev);
        }
    }

    let handler = svc.disconnect(&mut ev);
    info!(
        events = handler.events,
        reconnects = handler.reconnects,
        "monitor finished"
    );
    Ok(())
}
