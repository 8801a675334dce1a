// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parameter and diagnostics work executed by the run loop on behalf of the
//! operator: ranged parameter I/O, offset adjustment, tau search, CSRA bit
//! toggles, trace capture and parameter dumps.
//!
//! Every successful hardware write is followed by a DSP save so a crash
//! never loses operator tuning.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use daq_common::config::CrateConfig;
use daq_common::interface::{HwError, PixieInterface, CHANNEL_PARAMS, MODULE_PARAMS};

use crate::control::HwCommand;

/// Where the DSP parameter set lands after each successful write.
pub const DEFAULT_DSP_SET: &str = "./current.set";

/// Trace captures land here.
pub const TRACES_PATH: &str = "/tmp/traces.dat";

const TRACE_RETRIES: usize = 10;

fn module_range(range: (u16, u16), config: &CrateConfig) -> std::ops::RangeInclusive<u16> {
    let last = (config.num_modules().saturating_sub(1)) as u16;
    range.0.min(last)..=range.1.min(last)
}

fn channel_range(range: (u16, u16), config: &CrateConfig) -> std::ops::RangeInclusive<u16> {
    let last = (config.channels_per_module.saturating_sub(1)) as u16;
    range.0.min(last)..=range.1.min(last)
}

/// Run one hardware command and return the operator-facing report.
/// `dsp_set` is where writes persist the DSP parameters afterwards.
pub fn execute(
    interface: &mut dyn PixieInterface,
    config: &CrateConfig,
    command: &HwCommand,
    dsp_set: &Path,
) -> Result<String, HwError> {
    let mut report = String::new();
    match command {
        HwCommand::ReadChannelParam {
            name,
            modules,
            channels,
        } => {
            for module in module_range(*modules, config) {
                for channel in channel_range(*channels, config) {
                    let value = interface.read_channel_param(name, module, channel)?;
                    let _ = writeln!(report, "{}:{:02} {} = {}", module, channel, name, value);
                }
            }
        }
        HwCommand::WriteChannelParam {
            name,
            value,
            modules,
            channels,
        } => {
            let mut written = 0usize;
            for module in module_range(*modules, config) {
                for channel in channel_range(*channels, config) {
                    interface.write_channel_param(name, *value, module, channel)?;
                    written += 1;
                }
            }
            interface.save_dsp_parameters(dsp_set)?;
            let _ = writeln!(report, "{} = {} on {} channel(s)", name, value, written);
        }
        HwCommand::ReadModuleParam { name, modules } => {
            for module in module_range(*modules, config) {
                let value = interface.read_module_param(name, module)?;
                let _ = writeln!(report, "{} {} = {} (0x{:x})", module, name, value, value);
            }
        }
        HwCommand::WriteModuleParam {
            name,
            value,
            modules,
        } => {
            let mut written = 0usize;
            for module in module_range(*modules, config) {
                interface.write_module_param(name, *value, module)?;
                written += 1;
            }
            interface.save_dsp_parameters(dsp_set)?;
            let _ = writeln!(report, "{} = {} on {} module(s)", name, value, written);
        }
        HwCommand::AdjustOffsets { modules } => {
            for module in module_range(*modules, config) {
                interface.adjust_offsets(module)?;
                let _ = writeln!(report, "module {}: offsets adjusted", module);
            }
            interface.save_dsp_parameters(dsp_set)?;
        }
        HwCommand::FindTau { module, channel } => {
            let tau = interface.find_tau(*module, *channel)?;
            let _ = writeln!(report, "{}:{:02} tau = {:.3} us", module, channel, tau);
        }
        HwCommand::ToggleChannelCsraBit {
            modules,
            channels,
            bit,
        } => {
            for module in module_range(*modules, config) {
                for channel in channel_range(*channels, config) {
                    let old = interface.read_channel_param("CHANNEL_CSRA", module, channel)?;
                    let new = (old as u32 ^ (1u32 << bit)) as f64;
                    interface.write_channel_param("CHANNEL_CSRA", new, module, channel)?;
                    let _ = writeln!(
                        report,
                        "{}:{:02} CHANNEL_CSRA 0x{:x} -> 0x{:x}",
                        module, channel, old as u32, new as u32
                    );
                }
            }
            interface.save_dsp_parameters(dsp_set)?;
        }
        HwCommand::ToggleParamBit {
            module,
            channel,
            name,
            bit,
        } => {
            if *bit >= 64 {
                return Err(HwError::Module {
                    module: *module,
                    message: format!("parameter bit {} out of range", bit),
                });
            }
            let old = interface.read_channel_param(name, *module, *channel)?;
            let new = (old as u64 ^ (1u64 << bit)) as f64;
            interface.write_channel_param(name, new, *module, *channel)?;
            interface.save_dsp_parameters(dsp_set)?;
            let _ = writeln!(
                report,
                "{}:{:02} {} 0x{:x} -> 0x{:x}",
                module, channel, name, old as u64, new as u64
            );
        }
        HwCommand::GetTraces {
            module,
            channel,
            threshold,
        } => {
            let channels = config.channels_per_module.max(1);
            let channel = (*channel as usize).min(channels - 1);
            let mut traces = interface.acquire_traces(*module)?;
            if let Some(thresh) = threshold {
                for _ in 0..TRACE_RETRIES {
                    let per_channel = traces.len() / channels;
                    let start = (per_channel * channel).min(traces.len());
                    let slice = &traces[start..(start + per_channel).min(traces.len())];
                    if slice.iter().any(|s| u32::from(*s) > *thresh) {
                        break;
                    }
                    traces = interface.acquire_traces(*module)?;
                }
            }
            let mut bytes = Vec::with_capacity(traces.len() * 2);
            for sample in &traces {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            let mut file =
                fs::File::create(TRACES_PATH).map_err(|e| HwError::Io(e.to_string()))?;
            file.write_all(&bytes)
                .map_err(|e| HwError::Io(e.to_string()))?;
            let _ = writeln!(
                report,
                "module {}: {} samples written to {}",
                module,
                traces.len(),
                TRACES_PATH
            );
        }
        HwCommand::SaveDsp { path } => {
            interface.save_dsp_parameters(Path::new(path))?;
            let _ = writeln!(report, "DSP parameters saved to {}", path);
        }
        HwCommand::DumpParams { path } => {
            let mut out = String::new();
            for module in 0..interface.num_modules() as u16 {
                for name in MODULE_PARAMS {
                    let value = interface.read_module_param(name, module)?;
                    let _ = writeln!(out, "{} {} {}", module, name, value);
                }
                for channel in 0..config.channels_per_module as u16 {
                    for name in CHANNEL_PARAMS {
                        let value = interface.read_channel_param(name, module, channel)?;
                        let _ = writeln!(out, "{} {} {} {}", module, channel, name, value);
                    }
                }
            }
            fs::write(path, out).map_err(|e| HwError::Io(e.to_string()))?;
            let _ = writeln!(report, "parameters dumped to {}", path);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_common::sim::SimInterface;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn booted(n: usize) -> (SimInterface, CrateConfig, TempDir, PathBuf) {
        let config = CrateConfig::with_modules(n);
        let mut sim = SimInterface::new(config.clone());
        sim.boot(true).unwrap();
        let tmp = TempDir::new().unwrap();
        let dsp_set = tmp.path().join("current.set");
        (sim, config, tmp, dsp_set)
    }

    #[test]
    fn ranged_write_then_read_round_trips() {
        let (mut sim, config, _tmp, dsp_set) = booted(2);

        let write = HwCommand::WriteChannelParam {
            name: "TRIGGER_THRESHOLD".into(),
            value: 25.0,
            modules: (0, 1),
            channels: (2, 3),
        };
        execute(&mut sim, &config, &write, &dsp_set).unwrap();
        assert!(dsp_set.exists());

        let read = HwCommand::ReadChannelParam {
            name: "TRIGGER_THRESHOLD".into(),
            modules: (1, 1),
            channels: (3, 3),
        };
        let report = execute(&mut sim, &config, &read, &dsp_set).unwrap();
        assert!(report.contains("TRIGGER_THRESHOLD = 25"));
    }

    #[test]
    fn csra_toggle_is_involution() {
        let (mut sim, config, _tmp, dsp_set) = booted(1);

        let toggle = HwCommand::ToggleChannelCsraBit {
            modules: (0, 0),
            channels: (5, 5),
            bit: 8,
        };
        execute(&mut sim, &config, &toggle, &dsp_set).unwrap();
        assert_eq!(
            sim.read_channel_param("CHANNEL_CSRA", 0, 5).unwrap(),
            256.0
        );
        execute(&mut sim, &config, &toggle, &dsp_set).unwrap();
        assert_eq!(sim.read_channel_param("CHANNEL_CSRA", 0, 5).unwrap(), 0.0);
    }

    #[test]
    fn dump_params_covers_all_channels() {
        let (mut sim, config, tmp, dsp_set) = booted(1);
        sim.write_channel_param("TAU", 33.0, 0, 9).unwrap();
        let path = tmp.path().join("Fallback.set");

        let dump = HwCommand::DumpParams {
            path: path.to_string_lossy().into_owned(),
        };
        execute(&mut sim, &config, &dump, &dsp_set).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("0 9 TAU 33"));
        assert!(text.contains("0 MODULE_CSRA 0"));
    }

    #[test]
    fn param_bit_beyond_u64_is_rejected() {
        let (mut sim, config, _tmp, dsp_set) = booted(1);
        sim.write_channel_param("TAU", 33.0, 0, 0).unwrap();

        let toggle = HwCommand::ToggleParamBit {
            module: 0,
            channel: 0,
            name: "TAU".into(),
            bit: 100,
        };
        assert!(matches!(
            execute(&mut sim, &config, &toggle, &dsp_set),
            Err(HwError::Module { module: 0, .. })
        ));
        // The parameter was never touched.
        assert_eq!(sim.read_channel_param("TAU", 0, 0).unwrap(), 33.0);
    }

    #[test]
    fn unknown_param_reports_error() {
        let (mut sim, config, _tmp, dsp_set) = booted(1);
        let read = HwCommand::ReadChannelParam {
            name: "BOGUS".into(),
            modules: (0, 0),
            channels: (0, 0),
        };
        assert!(matches!(
            execute(&mut sim, &config, &read, &dsp_set),
            Err(HwError::UnknownParam(_))
        ));
    }
}
