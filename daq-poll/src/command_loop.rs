// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The operator loop: stdin lines in, dispatch, terminal signals.
//!
//! Interrupt stops an active MCA run and is otherwise ignored; suspend is
//! ignored; EOF behaves like `quit`, first winding down whatever is running
//! since no further operator input can arrive.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::warn;

use daq_common::config::CrateConfig;
use daq_pipeline::control::{ControlState, RunRequest};

use crate::commands::{self, CommandContext, CommandOutcome};

/// Read and dispatch operator commands until shutdown. Returns the process
/// exit code.
pub async fn run(
    control: Arc<ControlState>,
    requests: mpsc::Sender<RunRequest>,
    config: CrateConfig,
) -> Result<i32> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut suspend = signal(SignalKind::from_raw(libc::SIGTSTP))?;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if control.await_continue() {
                        control.set_await_continue(false);
                        println!("continuing");
                        continue;
                    }
                    let ctx = CommandContext {
                        control: &control,
                        requests: &requests,
                        config: &config,
                    };
                    match commands::dispatch(&ctx, &line) {
                        Ok(CommandOutcome::Handled) => {}
                        Ok(CommandOutcome::Quit) => return Ok(0),
                        Ok(CommandOutcome::Fault) => {
                            warn!("segmentation fault requested, closing");
                            let _ = requests.try_send(RunRequest::KillAll);
                            return Ok(1);
                        }
                        Err(e) => println!("error: {:#}", e),
                    }
                }
                Ok(None) | Err(_) => {
                    if control.running() {
                        warn!("stdin closed with a run active, stopping it");
                        let _ = requests.try_send(RunRequest::StopAcq);
                        while control.running() {
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                    let _ = requests.try_send(RunRequest::KillAll);
                    return Ok(0);
                }
            },
            _ = interrupt.recv() => {
                if control.mca_running() {
                    println!("interrupt: stopping MCA run");
                    let _ = requests.try_send(RunRequest::StopAcq);
                }
            }
            _ = suspend.recv() => {}
        }
    }
}
