// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Operator front end for the Pixie-16-class DAQ crate controller.
//!
//! One process, two activities: the command loop owns the terminal, the run
//! worker owns the hardware. This binary drives the scripted simulator; a
//! vendor-backed [`daq_common::interface::PixieInterface`] implementation
//! slots in at the same construction site.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use daq_common::config::CrateConfig;
use daq_common::interface::PixieInterface;
use daq_common::sim::SimInterface;
use daq_pipeline::control::{ControlState, REQUEST_QUEUE_DEPTH};
use daq_pipeline::run_worker::{RunWorker, Worker};
use daq_poll::{command_loop, sched};

#[derive(Debug, Parser)]
#[command(name = "daq-poll", about = "Run controller for a Pixie-16-class DAQ crate")]
struct Args {
    /// Start with the status bar disabled.
    #[arg(long)]
    quiet: bool,

    /// Verbose logging plus synthetic (no-I/O) file writes.
    #[arg(long)]
    debug: bool,

    /// Skip the full FPGA/DSP download on boot.
    #[arg(long)]
    fast_boot: bool,

    /// Output directory for run files.
    #[arg(long)]
    fdir: Option<String>,

    /// Run-file prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// FIFO threshold as a percentage of capacity.
    #[arg(long, default_value_t = 50.0)]
    thresh: f64,

    /// Synthetic events per FIFO poll from the simulated crate.
    #[arg(long)]
    pulser: Option<usize>,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // The status bar owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);
    sched::report_scheduler_policy();

    let config = CrateConfig::from_env();
    let mut interface = SimInterface::new(config.clone());
    if let Some(rate) = args.pulser {
        interface.set_pulser(rate, 10);
    }
    interface
        .boot(args.fast_boot)
        .context("initialization failed")?;

    let control = Arc::new(ControlState::new(config.threshold_words(args.thresh)));
    if args.quiet {
        control.toggle_quiet();
    }
    if args.debug {
        control.toggle_debug();
    }
    control.set_boot_fast(args.fast_boot);
    if let Some(dir) = args.fdir.as_deref() {
        control.set_output_dir(dir);
    }
    if let Some(prefix) = args.prefix.as_deref() {
        control.set_file_prefix(prefix);
    }

    let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let shutdown = CancellationToken::new();
    let mut worker = RunWorker::new(
        interface,
        config.clone(),
        Arc::clone(&control),
        request_rx,
        shutdown.clone(),
    )?;
    let worker_handle = tokio::spawn(async move { worker.run().await });

    let code = command_loop::run(Arc::clone(&control), requests, config).await?;

    shutdown.cancel();
    let _ = worker_handle.await;
    println!();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
