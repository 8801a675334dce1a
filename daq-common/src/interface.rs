// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The vendor-SDK contract the acquisition core consumes.
//!
//! The core never links the native SDK directly; everything it needs from the
//! hardware goes through [`PixieInterface`]. A production build supplies a
//! vendor-backed implementation, tests use the scripted double behind the
//! `sim` feature.

use std::error::Error;
use std::fmt::{self, Display};
use std::path::Path;

/// Channel parameter names accepted by `read_channel_param` and friends.
///
/// The set mirrors the DSP variables exposed by the vendor SDK; the interface
/// implementation may accept more, these are the ones surfaced to the
/// operator for completion and parameter dumps.
pub const CHANNEL_PARAMS: &[&str] = &[
    "TRIGGER_RISETIME",
    "TRIGGER_FLATTOP",
    "TRIGGER_THRESHOLD",
    "ENERGY_RISETIME",
    "ENERGY_FLATTOP",
    "TAU",
    "TRACE_LENGTH",
    "TRACE_DELAY",
    "VOFFSET",
    "XDT",
    "BASELINE_PERCENT",
    "EMIN",
    "BINFACTOR",
    "BASELINE_AVERAGE",
    "CHANNEL_CSRA",
    "CHANNEL_CSRB",
    "BLCUT",
    "INTEGRATOR",
    "FASTTRIGBACKLEN",
    "CFDDelay",
    "CFDScale",
    "CFDThresh",
    "QDCLen0",
    "QDCLen1",
    "QDCLen2",
    "QDCLen3",
    "QDCLen4",
    "QDCLen5",
    "QDCLen6",
    "QDCLen7",
];

/// Module-level parameter names.
pub const MODULE_PARAMS: &[&str] = &[
    "MODULE_CSRA",
    "MODULE_CSRB",
    "MODULE_FORMAT",
    "MAX_EVENTS",
    "SYNCH_WAIT",
    "IN_SYNCH",
    "SLOW_FILTER_RANGE",
    "FAST_FILTER_RANGE",
    "MODULE_NUMBER",
    "TrigConfig0",
    "TrigConfig1",
    "TrigConfig2",
    "TrigConfig3",
];

/// Human-readable meaning of each CHANNEL_CSRA bit, indexed by bit position.
pub const CSRA_BIT_NAMES: &[&str] = &[
    "Fast trigger selection",
    "Module validation signal",
    "Good channel",
    "Channel validation signal",
    "Block DAQ",
    "Trigger positive polarity",
    "Channel enable veto",
    "Histogram energies",
    "Trace capture",
    "QDC sums capture",
    "CFD trigger mode",
    "Global trigger validation",
    "Raw energy sums capture",
    "Channel trigger validation",
    "Input attenuation",
    "Pileup rejection",
    "Inverse pileup rejection",
    "Energy cut mode",
    "Group trigger selection",
    "Channel veto selection",
    "Module veto selection",
    "External timestamps in record",
];

/// Per-channel input/output count rates reported by the hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelRates {
    /// Input count rate (triggers seen), Hz.
    pub input: f64,
    /// Output count rate (events written to the FIFO), Hz.
    pub output: f64,
}

/// Represents the different kinds of failures the hardware layer reports.
#[derive(Debug, PartialEq)]
pub enum HwError {
    /// Booting the modules failed. The associated `String` carries the
    /// vendor error text.
    Boot(String),
    /// A module rejected or failed an operation.
    Module { module: u16, message: String },
    /// A parameter name was not recognized by the DSP.
    UnknownParam(String),
    /// A run-control operation (start/stop/status) failed.
    RunControl(String),
    /// Host-side I/O on behalf of the hardware layer failed (e.g. writing a
    /// DSP parameter file).
    Io(String),
    /// The interface was used before a successful boot.
    NotBooted,
}

impl Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwError::Boot(msg) => write!(f, "boot failed: {}", msg),
            HwError::Module { module, message } => {
                write!(f, "module {}: {}", module, message)
            }
            HwError::UnknownParam(name) => write!(f, "unknown parameter: {}", name),
            HwError::RunControl(msg) => write!(f, "run control: {}", msg),
            HwError::Io(msg) => write!(f, "hardware-layer i/o: {}", msg),
            HwError::NotBooted => write!(f, "interface not booted"),
        }
    }
}

impl Error for HwError {}

/// The hardware operations the run controller drives.
///
/// All methods are blocking; callers own the pacing. Module indices are
/// crate-relative (0-based), not physical slot numbers.
pub trait PixieInterface: Send {
    /// Boot and synchronize every module. `fast` skips the full FPGA/DSP
    /// download where the vendor SDK supports it.
    fn boot(&mut self, fast: bool) -> Result<(), HwError>;

    fn num_modules(&self) -> usize;

    fn read_channel_param(&mut self, name: &str, module: u16, channel: u16)
        -> Result<f64, HwError>;

    fn write_channel_param(
        &mut self,
        name: &str,
        value: f64,
        module: u16,
        channel: u16,
    ) -> Result<(), HwError>;

    fn read_module_param(&mut self, name: &str, module: u16) -> Result<u32, HwError>;

    fn write_module_param(&mut self, name: &str, value: u32, module: u16) -> Result<(), HwError>;

    /// Persist the current DSP parameter set to `path`.
    fn save_dsp_parameters(&mut self, path: &Path) -> Result<(), HwError>;

    /// Run the vendor's DC-offset adjustment on one module.
    fn adjust_offsets(&mut self, module: u16) -> Result<(), HwError>;

    /// Measure the decay constant of one channel, in microseconds.
    fn find_tau(&mut self, module: u16, channel: u16) -> Result<f64, HwError>;

    /// Capture one ADC trace per channel of `module`, concatenated.
    fn acquire_traces(&mut self, module: u16) -> Result<Vec<u16>, HwError>;

    fn start_list_mode_run(&mut self) -> Result<(), HwError>;

    fn start_histogram_run(&mut self) -> Result<(), HwError>;

    fn end_run(&mut self) -> Result<(), HwError>;

    /// Whether `module` still reports an active run.
    fn run_active(&mut self, module: u16) -> Result<bool, HwError>;

    /// Clear any preset run-length the DSP would use to self-terminate a
    /// histogram run.
    fn remove_preset_run_length(&mut self) -> Result<(), HwError>;

    /// Number of words waiting in the module's list-mode FIFO.
    ///
    /// The vendor count is unsigned but travels through signed plumbing;
    /// negative values are anomalous and treated by callers as "empty but
    /// suspicious".
    fn fifo_words(&mut self, module: u16) -> Result<i64, HwError>;

    /// Read exactly `out.len()` words from the module FIFO.
    fn read_fifo(&mut self, module: u16, out: &mut [u32]) -> Result<(), HwError>;

    /// Current energy histogram of one channel.
    fn read_histogram(&mut self, module: u16, channel: u16) -> Result<Vec<u32>, HwError>;

    /// Per-channel ICR/OCR snapshot for one module.
    fn read_statistics(&mut self, module: u16) -> Result<Vec<ChannelRates>, HwError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HwError::Module {
            module: 3,
            message: "FIFO read timed out".into(),
        };
        assert_eq!(err.to_string(), "module 3: FIFO read timed out");
        assert_eq!(HwError::NotBooted.to_string(), "interface not booted");
    }

    #[test]
    fn csra_table_covers_known_bits() {
        assert!(CSRA_BIT_NAMES.len() >= 22);
        assert_eq!(CSRA_BIT_NAMES[8], "Trace capture");
    }
}
