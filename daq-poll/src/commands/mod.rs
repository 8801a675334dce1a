// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The operator command set.
//!
//! A static table maps every command name (and alias) to usage text, arity
//! bounds and a handler. Handlers validate arguments, enforce the
//! preconditions the controller guarantees (no parameter edits during a run,
//! no output re-routing while a file is open), and either mutate the shared
//! control state directly or forward a request to the run loop. They never
//! touch the hardware interface themselves.

pub mod parse;

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;

use daq_common::config::CrateConfig;
use daq_common::interface::CSRA_BIT_NAMES;
use daq_pipeline::control::{ControlState, HwCommand, RunRequest};
use daq_pipeline::hw_ops::DEFAULT_DSP_SET;
use daq_pipeline::output_file;

use self::parse::{parse_f64, parse_range, parse_u16, parse_u32, parse_u8};

/// Default target of the `dump` command.
pub const DEFAULT_FALLBACK_SET: &str = "./Fallback.set";

pub struct CommandContext<'a> {
    pub control: &'a Arc<ControlState>,
    pub requests: &'a mpsc::Sender<RunRequest>,
    pub config: &'a CrateConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Handled,
    /// Clean shutdown.
    Quit,
    /// The segmentation-fault pseudo-command: exit with failure.
    Fault,
}

type Handler = fn(&CommandContext<'_>, &[&str]) -> Result<CommandOutcome>;

pub struct CommandSpec {
    pub names: &'static [&'static str],
    pub usage: &'static str,
    pub help: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub handler: Handler,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        names: &["run"],
        usage: "run",
        help: "start acquisition with recording",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_run,
    },
    CommandSpec {
        names: &["startacq", "startvme"],
        usage: "startacq",
        help: "start acquisition without recording",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_startacq,
    },
    CommandSpec {
        names: &["timedrun"],
        usage: "timedrun <seconds>",
        help: "start a recorded run with a wall-clock deadline",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_timedrun,
    },
    CommandSpec {
        names: &["stop", "stopacq", "stopvme"],
        usage: "stop",
        help: "request a stop of the active run",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_stop,
    },
    CommandSpec {
        names: &["spill", "hup"],
        usage: "spill",
        help: "force one spill flush",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_spill,
    },
    CommandSpec {
        names: &["shm"],
        usage: "shm",
        help: "toggle chunked spill broadcast",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_shm,
    },
    CommandSpec {
        names: &["mca"],
        usage: "mca [seconds] [basename]",
        help: "start an MCA histogram run (0 = unbounded)",
        min_args: 0,
        max_args: Some(2),
        handler: cmd_mca,
    },
    CommandSpec {
        names: &["reboot"],
        usage: "reboot",
        help: "reboot the modules",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_reboot,
    },
    CommandSpec {
        names: &["fdir"],
        usage: "fdir <path>",
        help: "set the output directory",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_fdir,
    },
    CommandSpec {
        names: &["prefix"],
        usage: "prefix <name>",
        help: "set the run-file prefix",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_prefix,
    },
    CommandSpec {
        names: &["title"],
        usage: "title <text>",
        help: "set the run title",
        min_args: 1,
        max_args: None,
        handler: cmd_title,
    },
    CommandSpec {
        names: &["runnum"],
        usage: "runnum <int>",
        help: "set the next run number",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_runnum,
    },
    CommandSpec {
        names: &["stats"],
        usage: "stats <seconds>",
        help: "set the statistics dump interval",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_stats,
    },
    CommandSpec {
        names: &["thresh"],
        usage: "thresh <percent>",
        help: "set the FIFO threshold as % of capacity",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_thresh,
    },
    CommandSpec {
        names: &["debug"],
        usage: "debug",
        help: "toggle synthetic (no-I/O) file writes",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_debug,
    },
    CommandSpec {
        names: &["quiet"],
        usage: "quiet",
        help: "toggle the status bar",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_quiet,
    },
    CommandSpec {
        names: &["status"],
        usage: "status [json]",
        help: "print the control/state snapshot",
        min_args: 0,
        max_args: Some(1),
        handler: cmd_status,
    },
    CommandSpec {
        names: &["dump"],
        usage: "dump [path]",
        help: "dump all parameters to a file",
        min_args: 0,
        max_args: Some(1),
        handler: cmd_dump,
    },
    CommandSpec {
        names: &["pread"],
        usage: "pread <mod[:mod]> <chan[:chan]> <param>",
        help: "read a channel parameter",
        min_args: 3,
        max_args: Some(3),
        handler: cmd_pread,
    },
    CommandSpec {
        names: &["pwrite"],
        usage: "pwrite <mod[:mod]> <chan[:chan]> <param> <value>",
        help: "write a channel parameter",
        min_args: 4,
        max_args: Some(4),
        handler: cmd_pwrite,
    },
    CommandSpec {
        names: &["pmread"],
        usage: "pmread <mod[:mod]> <param>",
        help: "read a module parameter",
        min_args: 2,
        max_args: Some(2),
        handler: cmd_pmread,
    },
    CommandSpec {
        names: &["pmwrite"],
        usage: "pmwrite <mod[:mod]> <param> <value>",
        help: "write a module parameter",
        min_args: 3,
        max_args: Some(3),
        handler: cmd_pmwrite,
    },
    CommandSpec {
        names: &["adjust_offsets"],
        usage: "adjust_offsets <mod[:mod]>",
        help: "run the DC-offset adjustment",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_adjust_offsets,
    },
    CommandSpec {
        names: &["find_tau"],
        usage: "find_tau <mod> <chan>",
        help: "measure a channel decay constant",
        min_args: 2,
        max_args: Some(2),
        handler: cmd_find_tau,
    },
    CommandSpec {
        names: &["toggle"],
        usage: "toggle <mod[:mod]> <chan[:chan]> <csraBit>",
        help: "toggle a CHANNEL_CSRA bit",
        min_args: 3,
        max_args: Some(3),
        handler: cmd_toggle,
    },
    CommandSpec {
        names: &["toggle_bit"],
        usage: "toggle_bit <mod> <chan> <param> <bit>",
        help: "toggle one bit of a channel parameter",
        min_args: 4,
        max_args: Some(4),
        handler: cmd_toggle_bit,
    },
    CommandSpec {
        names: &["csr_test"],
        usage: "csr_test <integer>",
        help: "decode CHANNEL_CSRA flag bits",
        min_args: 1,
        max_args: Some(1),
        handler: cmd_csr_test,
    },
    CommandSpec {
        names: &["bit_test"],
        usage: "bit_test <nBits> <integer>",
        help: "show the set bits of a value",
        min_args: 2,
        max_args: Some(2),
        handler: cmd_bit_test,
    },
    CommandSpec {
        names: &["get_traces"],
        usage: "get_traces <mod> <chan> [thresh]",
        help: "capture module traces to /tmp/traces.dat",
        min_args: 2,
        max_args: Some(3),
        handler: cmd_get_traces,
    },
    CommandSpec {
        names: &["save"],
        usage: "save [path]",
        help: "save the DSP parameter set",
        min_args: 0,
        max_args: Some(1),
        handler: cmd_save,
    },
    CommandSpec {
        names: &["help", "h"],
        usage: "help",
        help: "this listing",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_help,
    },
    CommandSpec {
        names: &["quit", "exit"],
        usage: "quit",
        help: "clean shutdown (refused while a run is active)",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_quit,
    },
    CommandSpec {
        names: &["kill"],
        usage: "kill",
        help: "force shutdown, stopping any active run",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_kill,
    },
    CommandSpec {
        names: &["_SIGSEGV_"],
        usage: "_SIGSEGV_",
        help: "segmentation-fault pseudo-command",
        min_args: 0,
        max_args: Some(0),
        handler: cmd_segfault,
    },
];

pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.names.contains(&name))
}

/// Parse and run one operator line. Transient errors come back as `Err` and
/// leave all state untouched.
pub fn dispatch(ctx: &CommandContext<'_>, line: &str) -> Result<CommandOutcome> {
    let mut tokens = line.split_whitespace();
    let Some(name) = tokens.next() else {
        return Ok(CommandOutcome::Handled);
    };
    let args: Vec<&str> = tokens.collect();

    // Operator attention clears a latched run-scope error.
    ctx.control.set_had_error(false);

    let Some(spec) = find(name) else {
        bail!("unknown command '{}'", name);
    };
    if args.len() < spec.min_args {
        bail!("usage: {}", spec.usage);
    }
    if let Some(max) = spec.max_args {
        if args.len() > max {
            bail!("usage: {}", spec.usage);
        }
    }
    (spec.handler)(ctx, &args)
}

fn send(ctx: &CommandContext<'_>, request: RunRequest) -> Result<()> {
    ctx.requests
        .try_send(request)
        .map_err(|_| anyhow!("run loop is not accepting requests"))
}

fn guard_not_running(ctx: &CommandContext<'_>, what: &str) -> Result<()> {
    if ctx.control.acq_running() {
        bail!("cannot {} while acquisition is running", what);
    }
    if ctx.control.mca_running() {
        bail!("cannot {} while an MCA run is active", what);
    }
    Ok(())
}

fn guard_file_closed(ctx: &CommandContext<'_>, what: &str) -> Result<()> {
    if ctx.control.file_open() {
        bail!("cannot change {} while the output file is open", what);
    }
    Ok(())
}

fn start_acq(ctx: &CommandContext<'_>, record: bool, duration: Option<f64>) -> Result<CommandOutcome> {
    if ctx.control.acq_running() {
        bail!("acquisition already running");
    }
    if ctx.control.mca_running() {
        bail!("cannot start acquisition while an MCA run is active");
    }
    send(ctx, RunRequest::StartAcq { record, duration })?;
    Ok(CommandOutcome::Handled)
}

fn cmd_run(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    start_acq(ctx, true, None)
}

fn cmd_startacq(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    start_acq(ctx, false, None)
}

fn cmd_timedrun(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let seconds = parse_f64(args[0])?;
    if seconds <= 0.0 {
        bail!("run length must be positive");
    }
    start_acq(ctx, true, Some(seconds))
}

fn cmd_stop(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    if !ctx.control.running() {
        bail!("nothing is running");
    }
    send(ctx, RunRequest::StopAcq)?;
    Ok(CommandOutcome::Handled)
}

fn cmd_spill(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    if !ctx.control.acq_running() {
        bail!("cannot spill when acquisition is not running");
    }
    send(ctx, RunRequest::ForceSpill)?;
    Ok(CommandOutcome::Handled)
}

fn cmd_shm(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    let on = ctx.control.toggle_shm_mode();
    println!("chunked broadcast {}", if on { "on" } else { "off" });
    Ok(CommandOutcome::Handled)
}

fn cmd_mca(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    guard_not_running(ctx, "start an MCA run")?;
    // Arguments are order-insensitive when one is numeric.
    let mut seconds = 0.0;
    let mut basename: Option<String> = None;
    for arg in args {
        match parse_f64(arg) {
            Ok(value) if value >= 0.0 => seconds = value,
            _ => basename = Some((*arg).to_string()),
        }
    }
    let basename = basename.unwrap_or_else(|| ctx.control.settings().mca_basename);
    ctx.control.set_mca_basename(&basename);
    send(ctx, RunRequest::StartMca { seconds, basename })?;
    Ok(CommandOutcome::Handled)
}

fn cmd_reboot(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    guard_not_running(ctx, "reboot")?;
    send(ctx, RunRequest::Reboot)?;
    Ok(CommandOutcome::Handled)
}

fn cmd_fdir(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    guard_file_closed(ctx, "the output directory")?;
    let dir = ctx.control.set_output_dir(args[0]);
    println!("output directory: {}", dir);
    Ok(CommandOutcome::Handled)
}

fn cmd_prefix(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    guard_file_closed(ctx, "the file prefix")?;
    ctx.control.set_file_prefix(args[0]);
    println!("file prefix: {}", args[0]);
    Ok(CommandOutcome::Handled)
}

fn cmd_title(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    guard_file_closed(ctx, "the run title")?;
    let joined = args.join(" ");
    let stripped = strip_outer_quotes(&joined);
    let stored = ctx.control.set_title(stripped);
    println!("run title: {}", stored);
    Ok(CommandOutcome::Handled)
}

fn strip_outer_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &text[1..text.len() - 1];
        }
    }
    text
}

fn cmd_runnum(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    guard_file_closed(ctx, "the run number")?;
    let requested = parse_u32(args[0])?;
    let settings = ctx.control.settings();
    let mut run = requested;
    output_file::get_next_file_name(&mut run, &settings.file_prefix, &settings.output_dir, settings.format);
    if run != requested {
        println!(
            "run {} already on disk under {}; advanced to {}",
            requested, settings.output_dir, run
        );
    }
    ctx.control.set_next_run_number(run);
    Ok(CommandOutcome::Handled)
}

fn cmd_stats(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let seconds = parse_f64(args[0])?;
    if seconds <= 0.0 {
        bail!("interval must be positive");
    }
    ctx.control.set_stats_interval_secs(seconds);
    println!("stats dump interval: {} s", seconds);
    Ok(CommandOutcome::Handled)
}

fn cmd_thresh(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let percent = parse_f64(args[0])?;
    if !(0.0..=100.0).contains(&percent) {
        bail!("threshold must be 0..=100 percent");
    }
    let words = ctx.config.threshold_words(percent);
    ctx.control.set_thresh_words(words);
    println!("spill threshold: {}% = {} words", percent, words);
    Ok(CommandOutcome::Handled)
}

fn cmd_debug(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    let on = ctx.control.toggle_debug();
    println!("debug mode {}", if on { "on" } else { "off" });
    Ok(CommandOutcome::Handled)
}

fn cmd_quiet(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    let on = ctx.control.toggle_quiet();
    println!("quiet mode {}", if on { "on" } else { "off" });
    Ok(CommandOutcome::Handled)
}

fn cmd_status(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let snapshot = ctx.control.snapshot();
    if args.first() == Some(&"json") {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(CommandOutcome::Handled);
    }
    println!(
        "acq {} | mca {} | file {} | error {}",
        snapshot.acq_running, snapshot.mca_running, snapshot.file_open, snapshot.had_error
    );
    println!(
        "record {} | shm {} | quiet {} | debug {} | fast boot {}",
        snapshot.record_data, snapshot.shm_mode, snapshot.quiet, snapshot.debug, snapshot.boot_fast
    );
    println!(
        "dir {} | prefix {} | next run {} | title '{}'",
        snapshot.output_dir, snapshot.file_prefix, snapshot.next_run_number, snapshot.title
    );
    println!(
        "threshold {} words | stats every {} s",
        snapshot.threshold_words, snapshot.stats_interval_secs
    );
    Ok(CommandOutcome::Handled)
}

fn send_hw(ctx: &CommandContext<'_>, what: &str, command: HwCommand) -> Result<CommandOutcome> {
    guard_not_running(ctx, what)?;
    send(ctx, RunRequest::Hardware(command))?;
    Ok(CommandOutcome::Handled)
}

fn cmd_dump(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let path = args.first().unwrap_or(&DEFAULT_FALLBACK_SET).to_string();
    send_hw(ctx, "dump parameters", HwCommand::DumpParams { path })
}

fn cmd_pread(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let modules = parse_range(args[0])?;
    let channels = parse_range(args[1])?;
    send_hw(
        ctx,
        "read parameters",
        HwCommand::ReadChannelParam {
            name: args[2].to_string(),
            modules,
            channels,
        },
    )
}

fn cmd_pwrite(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let modules = parse_range(args[0])?;
    let channels = parse_range(args[1])?;
    let value = parse_f64(args[3])?;
    send_hw(
        ctx,
        "write parameters",
        HwCommand::WriteChannelParam {
            name: args[2].to_string(),
            value,
            modules,
            channels,
        },
    )
}

fn cmd_pmread(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let modules = parse_range(args[0])?;
    send_hw(
        ctx,
        "read parameters",
        HwCommand::ReadModuleParam {
            name: args[1].to_string(),
            modules,
        },
    )
}

fn cmd_pmwrite(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let modules = parse_range(args[0])?;
    let value = parse_u32(args[2])?;
    send_hw(
        ctx,
        "write parameters",
        HwCommand::WriteModuleParam {
            name: args[1].to_string(),
            value,
            modules,
        },
    )
}

fn cmd_adjust_offsets(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let modules = parse_range(args[0])?;
    send_hw(ctx, "adjust offsets", HwCommand::AdjustOffsets { modules })
}

fn cmd_find_tau(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let module = parse_u16(args[0])?;
    let channel = parse_u16(args[1])?;
    send_hw(ctx, "find tau", HwCommand::FindTau { module, channel })
}

fn cmd_toggle(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let modules = parse_range(args[0])?;
    let channels = parse_range(args[1])?;
    let bit = parse_u8(args[2])?;
    if usize::from(bit) >= CSRA_BIT_NAMES.len() {
        bail!("CSRA bit must be below {}", CSRA_BIT_NAMES.len());
    }
    send_hw(
        ctx,
        "toggle CSRA bits",
        HwCommand::ToggleChannelCsraBit {
            modules,
            channels,
            bit,
        },
    )
}

fn cmd_toggle_bit(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let module = parse_u16(args[0])?;
    let channel = parse_u16(args[1])?;
    let bit = parse_u8(args[3])?;
    if bit >= 64 {
        bail!("parameter bit must be below 64");
    }
    send_hw(
        ctx,
        "toggle parameter bits",
        HwCommand::ToggleParamBit {
            module,
            channel,
            name: args[2].to_string(),
            bit,
        },
    )
}

fn cmd_csr_test(_ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let value = parse_u32(args[0])?;
    println!("CHANNEL_CSRA 0x{:08x}:", value);
    for (bit, name) in CSRA_BIT_NAMES.iter().enumerate() {
        if value & (1 << bit) != 0 {
            println!("  bit {:2}: {}", bit, name);
        }
    }
    Ok(CommandOutcome::Handled)
}

fn cmd_bit_test(_ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let n_bits = parse_u8(args[0])?;
    let value = parse_u32(args[1])?;
    let set: Vec<String> = (0..u32::from(n_bits).min(32))
        .filter(|bit| value & (1 << bit) != 0)
        .map(|bit| bit.to_string())
        .collect();
    println!(
        "0x{:x} = {:0width$b}: bits [{}] set",
        value,
        value,
        set.join(", "),
        width = n_bits as usize
    );
    Ok(CommandOutcome::Handled)
}

fn cmd_get_traces(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let module = parse_u16(args[0])?;
    let channel = parse_u16(args[1])?;
    let threshold = args.get(2).map(|t| parse_u32(t)).transpose()?;
    send_hw(
        ctx,
        "capture traces",
        HwCommand::GetTraces {
            module,
            channel,
            threshold,
        },
    )
}

fn cmd_save(ctx: &CommandContext<'_>, args: &[&str]) -> Result<CommandOutcome> {
    let path = args.first().unwrap_or(&DEFAULT_DSP_SET).to_string();
    send_hw(ctx, "save parameters", HwCommand::SaveDsp { path })
}

fn cmd_help(_ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    for spec in COMMANDS {
        let aliases = if spec.names.len() > 1 {
            format!(" ({})", spec.names[1..].join(", "))
        } else {
            String::new()
        };
        println!("  {:<44} {}{}", spec.usage, spec.help, aliases);
    }
    Ok(CommandOutcome::Handled)
}

fn cmd_quit(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    if ctx.control.running() {
        bail!("a run is active; stop it first or use 'kill'");
    }
    send(ctx, RunRequest::KillAll)?;
    Ok(CommandOutcome::Quit)
}

fn cmd_kill(ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    send(ctx, RunRequest::KillAll)?;
    Ok(CommandOutcome::Quit)
}

fn cmd_segfault(_ctx: &CommandContext<'_>, _args: &[&str]) -> Result<CommandOutcome> {
    Ok(CommandOutcome::Fault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn context() -> (Arc<ControlState>, mpsc::Sender<RunRequest>, Receiver<RunRequest>, CrateConfig) {
        let control = Arc::new(ControlState::new(0));
        let (tx, rx) = mpsc::channel(16);
        let config = CrateConfig::with_modules(2);
        (control, tx, rx, config)
    }

    fn run_line(
        control: &Arc<ControlState>,
        tx: &mpsc::Sender<RunRequest>,
        config: &CrateConfig,
        line: &str,
    ) -> Result<CommandOutcome> {
        let ctx = CommandContext {
            control,
            requests: tx,
            config,
        };
        dispatch(&ctx, line)
    }

    #[test]
    fn unknown_command_is_a_transient_error() {
        let (control, tx, _rx, config) = context();
        assert!(run_line(&control, &tx, &config, "frobnicate").is_err());
    }

    #[test]
    fn run_sends_recorded_start() {
        let (control, tx, mut rx, config) = context();
        run_line(&control, &tx, &config, "run").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            RunRequest::StartAcq {
                record: true,
                duration: None
            }
        );
    }

    #[test]
    fn timedrun_carries_the_deadline() {
        let (control, tx, mut rx, config) = context();
        run_line(&control, &tx, &config, "timedrun 2.5").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            RunRequest::StartAcq {
                record: true,
                duration: Some(2.5)
            }
        );
        assert!(run_line(&control, &tx, &config, "timedrun -1").is_err());
    }

    #[test]
    fn spill_requires_a_running_acquisition() {
        let (control, tx, mut rx, config) = context();
        assert!(run_line(&control, &tx, &config, "spill").is_err());
        control.set_acq_running(true);
        run_line(&control, &tx, &config, "hup").unwrap();
        assert_eq!(rx.try_recv().unwrap(), RunRequest::ForceSpill);
    }

    #[test]
    fn run_refused_while_mca_active() {
        let (control, tx, mut rx, config) = context();
        control.set_mca_running(true);
        assert!(run_line(&control, &tx, &config, "run").is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn output_routing_locked_while_file_open() {
        let (control, tx, _rx, config) = context();
        control.set_file_open(true);
        assert!(run_line(&control, &tx, &config, "prefix x").is_err());
        assert!(run_line(&control, &tx, &config, "fdir /tmp").is_err());
        assert!(run_line(&control, &tx, &config, "runnum 5").is_err());
        assert!(run_line(&control, &tx, &config, "title t").is_err());

        control.set_file_open(false);
        run_line(&control, &tx, &config, "prefix x").unwrap();
        assert_eq!(control.settings().file_prefix, "x");
    }

    #[test]
    fn title_strips_outer_quotes() {
        let (control, tx, _rx, config) = context();
        run_line(&control, &tx, &config, "title \"a longer title\"").unwrap();
        assert_eq!(control.settings().title, "a longer title");
    }

    #[test]
    fn thresh_is_idempotent_and_bounded() {
        let (control, tx, _rx, config) = context();
        run_line(&control, &tx, &config, "thresh 50").unwrap();
        let words = control.thresh_words();
        run_line(&control, &tx, &config, "thresh 50").unwrap();
        assert_eq!(control.thresh_words(), words);
        assert_eq!(words, config.threshold_words(50.0));
        assert!(run_line(&control, &tx, &config, "thresh 101").is_err());
    }

    #[test]
    fn shm_toggle_twice_returns_to_initial() {
        let (control, tx, _rx, config) = context();
        run_line(&control, &tx, &config, "shm").unwrap();
        assert!(control.shm_mode());
        run_line(&control, &tx, &config, "shm").unwrap();
        assert!(!control.shm_mode());
    }

    #[test]
    fn mca_arguments_are_order_insensitive() {
        let (control, tx, mut rx, config) = context();
        run_line(&control, &tx, &config, "mca 10 spectra").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            RunRequest::StartMca {
                seconds: 10.0,
                basename: "spectra".into()
            }
        );
        run_line(&control, &tx, &config, "mca spectra 10").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            RunRequest::StartMca {
                seconds: 10.0,
                basename: "spectra".into()
            }
        );
    }

    #[test]
    fn param_commands_guarded_while_running() {
        let (control, tx, mut rx, config) = context();
        control.set_acq_running(true);
        assert!(run_line(&control, &tx, &config, "pread 0 0 TAU").is_err());
        assert!(run_line(&control, &tx, &config, "pwrite 0 0 TAU 40").is_err());
        assert!(rx.try_recv().is_err());

        control.set_acq_running(false);
        run_line(&control, &tx, &config, "pwrite 0:1 0:15 TAU 40").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            RunRequest::Hardware(HwCommand::WriteChannelParam {
                name: "TAU".into(),
                value: 40.0,
                modules: (0, 1),
                channels: (0, 15),
            })
        );
    }

    #[test]
    fn bit_toggles_reject_out_of_range_bits() {
        let (control, tx, mut rx, config) = context();
        assert!(run_line(&control, &tx, &config, "toggle_bit 0 0 TAU 100").is_err());
        assert!(run_line(&control, &tx, &config, "toggle 0 0 30").is_err());
        assert!(rx.try_recv().is_err());

        run_line(&control, &tx, &config, "toggle_bit 0 0 TAU 5").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            RunRequest::Hardware(HwCommand::ToggleParamBit {
                module: 0,
                channel: 0,
                name: "TAU".into(),
                bit: 5,
            })
        );
    }

    #[test]
    fn quit_refused_while_running_kill_not() {
        let (control, tx, mut rx, config) = context();
        control.set_acq_running(true);
        assert!(run_line(&control, &tx, &config, "quit").is_err());
        assert_eq!(
            run_line(&control, &tx, &config, "kill").unwrap(),
            CommandOutcome::Quit
        );
        assert_eq!(rx.try_recv().unwrap(), RunRequest::KillAll);
    }

    #[test]
    fn segfault_pseudo_command_faults() {
        let (control, tx, _rx, config) = context();
        assert_eq!(
            run_line(&control, &tx, &config, "_SIGSEGV_").unwrap(),
            CommandOutcome::Fault
        );
    }

    #[test]
    fn dispatch_clears_latched_error() {
        let (control, tx, _rx, config) = context();
        control.set_had_error(true);
        run_line(&control, &tx, &config, "status").unwrap();
        assert!(!control.had_error());
    }

    #[test]
    fn arity_violations_report_usage() {
        let (control, tx, _rx, config) = context();
        let err = run_line(&control, &tx, &config, "pread 0 0").unwrap_err();
        assert!(err.to_string().contains("usage"));
        let err = run_line(&control, &tx, &config, "bit_test 4").unwrap_err();
        assert!(err.to_string().contains("usage"));
    }
}
