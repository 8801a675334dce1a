// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! The acquisition side of the DAQ controller.
//!
//! Everything the run loop owns lives here: the shared control state and the
//! operator-request channel, the spill parser with its partial-event carry,
//! the statistics aggregator, the rolling run-file writer, the UDP broadcast
//! client, the MCA histogram accumulator, and [`run_worker::RunWorker`],
//! the state machine that drives them all against a
//! [`daq_common::interface::PixieInterface`].

pub mod broadcast;
pub mod control;
pub mod hw_ops;
pub mod mca;
pub mod output_file;
pub mod run_worker;
pub mod spill;
pub mod stats;
pub mod status;

pub use control::{ControlState, HwCommand, RunRequest};
pub use run_worker::{RunState, RunWorker, Worker};
