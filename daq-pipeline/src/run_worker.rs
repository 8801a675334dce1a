// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The run loop: a cooperative worker owning the hardware interface, the
//! output file, the broadcast socket and the statistics.
//!
//! Each iteration absorbs pending operator requests, advances the
//! acquisition state machine, and repaints the status bar. While a list-mode
//! run is active the loop spins through drain cycles without sleeping;
//! otherwise it sleeps about a second per iteration.
//!
//! Run-scope fatals (FIFO overflow, read failure, corrupt data, write
//! failure) never terminate the loop: they latch `had_error`, request a
//! stop, and the loop returns to idle.

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use daq_common::config::CrateConfig;
use daq_common::interface::PixieInterface;

use crate::broadcast::{BroadcastClient, ControlMessage};
use crate::control::{ControlState, HwCommand, RunRequest};
use crate::hw_ops;
use crate::mca::Mca;
use crate::output_file::{FileFormat, OutputFile};
use crate::spill::{self, PartialEventStore, SpillOutcome};
use crate::stats::StatsHandler;
use crate::status;

const IDLE_SLEEP: Duration = Duration::from_secs(1);
const RESCUE_PAUSE: Duration = Duration::from_secs(1);
const MCA_STEP_PAUSE: Duration = Duration::from_secs(1);
const REBOOT_POLL: Duration = Duration::from_millis(100);
const RESCUE_TRIES: usize = 10;

/// The acquisition loop as a spawnable task.
///
/// [`RunWorker`] is the one implementor: the controller spawns `run()` on
/// the runtime, and tests select it against a `CancellationToken` so the
/// worker comes back out of the task for inspection once it exits. `run()`
/// owns its own pacing (drain cycles yield, idle iterations sleep) and
/// returns only on kill or cancellation.
pub trait Worker {
    fn run(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

/// Acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    AcqStarting,
    AcqRunning,
    AcqStopping,
    McaStarting,
    McaRunning,
    Rebooting,
    Terminated,
}

/// Requests absorbed from the channel, collapsed to idempotent flags the
/// way the state machine consumes them.
#[derive(Debug, Default)]
struct Pending {
    start_acq: Option<(bool, Option<f64>)>,
    stop: bool,
    force_spill: bool,
    reboot: bool,
    start_mca: Option<(f64, String)>,
    kill: bool,
}

pub struct RunWorker<I: PixieInterface> {
    interface: I,
    config: CrateConfig,
    control: Arc<ControlState>,
    requests: mpsc::Receiver<RunRequest>,
    shutdown: CancellationToken,

    stats: StatsHandler,
    output: OutputFile,
    broadcast: BroadcastClient,
    partials: PartialEventStore,
    spill_buffer: Vec<u32>,

    state: RunState,
    pending: Pending,
    mca: Option<Mca>,
    mca_duration: f64,
    run_deadline: Option<Instant>,
    acq_start: Instant,
    last_spill_us: u64,
}

impl<I: PixieInterface> RunWorker<I> {
    pub fn new(
        interface: I,
        config: CrateConfig,
        control: Arc<ControlState>,
        requests: mpsc::Receiver<RunRequest>,
        shutdown: CancellationToken,
    ) -> std::io::Result<Self> {
        let broadcast = BroadcastClient::new()?;
        let modules = config.num_modules();
        let channels = config.channels_per_module;
        let spill_buffer = Vec::with_capacity(config.spill_buffer_words());
        Ok(Self {
            interface,
            control,
            requests,
            shutdown,
            stats: StatsHandler::new(modules, channels),
            output: OutputFile::new(FileFormat::Ldf),
            broadcast,
            partials: PartialEventStore::new(modules),
            spill_buffer,
            state: RunState::Idle,
            pending: Pending::default(),
            mca: None,
            mca_duration: 0.0,
            run_deadline: None,
            acq_start: Instant::now(),
            last_spill_us: 0,
            config,
        })
    }

    /// Replace the output file, e.g. to lower the rollover cap in tests.
    pub fn with_output_file(mut self, output: OutputFile) -> Self {
        self.output = output;
        self
    }

    /// Aim the broadcast at a different endpoint.
    pub fn with_broadcast(mut self, broadcast: BroadcastClient) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &StatsHandler {
        &self.stats
    }

    pub fn output(&self) -> &OutputFile {
        &self.output
    }

    pub fn interface_mut(&mut self) -> &mut I {
        &mut self.interface
    }

    fn absorb(&mut self, request: RunRequest) {
        match request {
            RunRequest::StartAcq { record, duration } => {
                self.pending.start_acq = Some((record, duration));
            }
            RunRequest::StopAcq => self.pending.stop = true,
            RunRequest::ForceSpill => {
                if self.state == RunState::AcqRunning {
                    self.pending.force_spill = true;
                } else {
                    warn!("spill requested while acquisition is not running");
                }
            }
            RunRequest::Reboot => self.pending.reboot = true,
            RunRequest::StartMca { seconds, basename } => {
                self.pending.start_mca = Some((seconds, basename));
            }
            RunRequest::KillAll => self.pending.kill = true,
            RunRequest::Hardware(command) => self.exec_hw_command(command),
        }
    }

    fn absorb_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            self.absorb(request);
        }
    }

    /// Hardware parameter work runs only while nothing acquires; the command
    /// loop guards this too, the re-check covers requests that were in
    /// flight when a run started.
    fn exec_hw_command(&mut self, command: HwCommand) {
        if self.control.running() {
            warn!("hardware command ignored: a run is active");
            return;
        }
        let dsp_set = std::path::Path::new(hw_ops::DEFAULT_DSP_SET);
        match hw_ops::execute(&mut self.interface, &self.config, &command, dsp_set) {
            Ok(report) => {
                for line in report.lines() {
                    info!("{}", line);
                }
            }
            Err(e) => warn!(error = %e, "hardware command failed"),
        }
    }

    fn raise_fatal(&mut self) {
        self.control.set_had_error(true);
        self.pending.stop = true;
    }

    fn read_scalers(&mut self) {
        for module in 0..self.config.num_modules() {
            match self.interface.read_statistics(module as u16) {
                Ok(rates) => self.stats.set_xia_rates(module, &rates),
                Err(e) => warn!(module, error = %e, "scaler read failed"),
            }
        }
    }

    /// One drain of every module FIFO. `forced` skips the threshold gate
    /// (operator `spill`, stop-path flush); `rescue` additionally drops the
    /// minimum-read floor to pick up stragglers after `end_run`.
    fn drain_cycle(&mut self, forced: bool, rescue: bool) {
        let modules = self.config.num_modules();
        let thresh = self.control.thresh_words() as i64;
        let mut counts = vec![0i64; modules];
        let mut max_words = i64::MIN;

        for _attempt in 0..self.config.poll_tries {
            max_words = i64::MIN;
            for (module, count) in counts.iter_mut().enumerate() {
                match self.interface.fifo_words(module as u16) {
                    Ok(words) => {
                        *count = words;
                        max_words = max_words.max(words);
                    }
                    Err(e) => {
                        error!(module, error = %e, "FIFO word count failed");
                        self.raise_fatal();
                        return;
                    }
                }
            }
            if max_words > thresh || forced || self.pending.force_spill {
                break;
            }
        }

        let force = forced || self.pending.force_spill;
        self.pending.force_spill = false;
        if max_words <= thresh && !force {
            return;
        }

        self.spill_buffer.clear();
        for module in 0..modules {
            let header = self.spill_buffer.len();
            self.spill_buffer.push(0);
            self.spill_buffer.push(module as u32);

            let count = counts[module];
            if count < 0 {
                warn!(module, count, "negative FIFO word count, treating as empty");
                self.spill_buffer[header] = 2;
                continue;
            }
            let min_read = if rescue {
                1
            } else {
                self.config.fifo_min_read_words
            };
            if (count as usize) < min_read {
                self.spill_buffer[header] = 2;
                continue;
            }
            if count as usize >= self.config.fifo_capacity_words {
                error!(module, words = count, "hardware FIFO full, data lost");
                self.raise_fatal();
                return;
            }

            let partial = self.partials.take(module);
            let payload_start = self.spill_buffer.len();
            self.spill_buffer.extend_from_slice(&partial);
            let read_start = self.spill_buffer.len();
            self.spill_buffer.resize(read_start + count as usize, 0);
            if let Err(e) = self
                .interface
                .read_fifo(module as u16, &mut self.spill_buffer[read_start..])
            {
                error!(module, error = %e, "FIFO read failed");
                self.raise_fatal();
                return;
            }

            let expected_slot = self.config.slot(module).unwrap_or(0);
            let max_channel = (self.config.channels_per_module - 1) as u8;
            let parsed = match spill::parse_module_payload(
                &self.spill_buffer[payload_start..],
                expected_slot,
                max_channel,
            ) {
                Ok(parsed) => parsed,
                Err(corrupt) => {
                    let dump = spill::format_corruption_dump(
                        &self.spill_buffer[payload_start..],
                        &corrupt,
                    );
                    error!(module, "{}", dump);
                    self.raise_fatal();
                    return;
                }
            };

            for event in &parsed.events {
                if !event.virtual_channel {
                    self.stats.add_event(
                        module,
                        event.channel as usize,
                        u64::from(event.size_words) * 4,
                    );
                }
            }
            if let SpillOutcome::TrailingFragment { words } = parsed.outcome {
                let keep_from = self.spill_buffer.len() - words;
                let fragment = self.spill_buffer.split_off(keep_from);
                self.partials.put(module, &fragment);
            }
            self.spill_buffer[header] = (self.spill_buffer.len() - header) as u32;
        }

        let spill_us = self.acq_start.elapsed().as_micros() as u64;
        let dur_us = spill_us.saturating_sub(self.last_spill_us);
        self.last_spill_us = spill_us;
        // The operator can retune the dump interval mid-run.
        self.stats
            .set_dump_interval(self.control.stats_interval_secs());
        if self.stats.add_time(dur_us as f64 * 1e-6) {
            self.read_scalers();
            self.stats.dump();
            self.stats.clear_rates();
        }

        let total_words = self.spill_buffer.len();
        if self.control.record_data() {
            match self.output.write_words(&self.spill_buffer) {
                Ok(bytes) => debug!(words = total_words, bytes, "spill written"),
                Err(e) => {
                    error!(error = %e, "spill write failed");
                    self.raise_fatal();
                }
            }
        }
        if self.control.shm_mode() {
            if let Err(e) = self.broadcast.send_spill(&self.spill_buffer) {
                warn!(error = %e, "spill broadcast failed");
            }
        } else if let Err(e) = self.output.send_packet(&self.broadcast) {
            warn!(error = %e, "spill notification failed");
        }
    }

    fn do_start_acq(&mut self, record: bool, duration: Option<f64>) {
        if self.control.mca_running() {
            warn!("cannot start acquisition while an MCA run is active");
            return;
        }
        self.state = RunState::AcqStarting;
        self.control.set_record_data(record);

        if record {
            let settings = self.control.settings();
            let mut run = self.control.next_run_number();
            self.output.set_format(settings.format);
            self.output.set_debug_mode(self.control.debug());
            match self.output.open_new_file(
                &settings.title,
                &mut run,
                &settings.file_prefix,
                &settings.output_dir,
                false,
            ) {
                Ok(path) => {
                    info!(path = %path.display(), run, "output file opened");
                    self.control.set_next_run_number(run);
                    self.control.set_file_open(true);
                    if let Err(e) = self.broadcast.send_control(ControlMessage::OpenFile) {
                        warn!(error = %e, "open-file notification failed");
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to open output file");
                    self.control.set_had_error(true);
                    self.state = RunState::Idle;
                    return;
                }
            }
        }

        self.stats.clear();
        self.stats
            .set_dump_interval(self.control.stats_interval_secs());
        self.partials.clear_all();

        match self.interface.start_list_mode_run() {
            Ok(()) => {
                self.control.set_acq_running(true);
                self.acq_start = Instant::now();
                self.last_spill_us = 0;
                self.run_deadline = duration
                    .filter(|d| *d > 0.0)
                    .map(|d| Instant::now() + Duration::from_secs_f64(d));
                self.state = RunState::AcqRunning;
                info!(record, "list-mode run started");
            }
            Err(e) => {
                error!(error = %e, "failed to start list-mode run");
                self.control.set_had_error(true);
                self.close_output(false);
                self.state = RunState::Idle;
            }
        }
    }

    fn close_output(&mut self, advance_run: bool) {
        if self.output.is_open() {
            if let Err(e) = self.broadcast.send_control(ControlMessage::CloseFile) {
                warn!(error = %e, "close-file notification failed");
            }
            match self.output.close(false) {
                Ok(size) => info!(bytes = size, "output file closed"),
                Err(e) => {
                    error!(error = %e, "closing output file failed");
                    self.control.set_had_error(true);
                }
            }
            if advance_run {
                self.control
                    .set_next_run_number(self.control.next_run_number() + 1);
            }
        }
        self.control.set_file_open(false);
    }

    async fn do_stop_run(&mut self) {
        self.state = RunState::AcqStopping;
        info!("stopping acquisition");

        // Flush whatever the FIFOs hold before taking the run down.
        self.drain_cycle(true, false);

        if let Err(e) = self.interface.end_run() {
            error!(error = %e, "end run failed");
            self.control.set_had_error(true);
        }
        tokio::time::sleep(RESCUE_PAUSE).await;

        for _ in 0..RESCUE_TRIES {
            let mut remaining = 0i64;
            for module in 0..self.config.num_modules() {
                remaining += self
                    .interface
                    .fifo_words(module as u16)
                    .unwrap_or(0)
                    .max(0);
            }
            if remaining == 0 {
                break;
            }
            self.drain_cycle(true, true);
        }
        for module in 0..self.config.num_modules() {
            if let Ok(words) = self.interface.fifo_words(module as u16) {
                if words > 0 {
                    warn!(module, words, "module still has words after run end");
                }
            }
        }
        for (module, words) in self.partials.outstanding() {
            info!(module, words, "(partial evt) outstanding at run end");
        }
        self.partials.clear_all();

        self.read_scalers();
        self.stats.dump();
        self.stats.clear_rates();

        self.close_output(true);
        self.control.set_acq_running(false);
        self.pending.stop = false;
        self.pending.force_spill = false;
        self.run_deadline = None;
        self.state = RunState::Idle;
        info!(
            total_time_s = format_args!("{:.1}", self.stats.get_total_time()),
            "acquisition stopped"
        );
    }

    fn do_start_mca(&mut self, seconds: f64, basename: &str) {
        if self.control.acq_running() {
            warn!("cannot start MCA while acquisition is running");
            return;
        }
        self.state = RunState::McaStarting;
        if let Err(e) = self.interface.remove_preset_run_length() {
            error!(error = %e, "clearing preset run length failed");
            self.control.set_had_error(true);
            self.state = RunState::Idle;
            return;
        }
        let mca = Mca::new(basename);
        match self.interface.start_histogram_run() {
            Ok(()) => {
                info!(seconds, path = %mca.path().display(), "MCA run started");
                self.mca = Some(mca);
                self.mca_duration = seconds;
                self.control.set_mca_running(true);
                self.state = RunState::McaRunning;
            }
            Err(e) => {
                error!(error = %e, "failed to start histogram run");
                self.control.set_had_error(true);
                self.state = RunState::Idle;
            }
        }
    }

    fn end_mca(&mut self, failed: bool) {
        if let Err(e) = self.interface.end_run() {
            error!(error = %e, "ending MCA run failed");
            self.control.set_had_error(true);
        }
        if failed {
            self.control.set_had_error(true);
        }
        if let Some(mca) = self.mca.take() {
            info!(
                seconds = format_args!("{:.1}", mca.run_time_secs()),
                path = %mca.path().display(),
                "MCA run finished"
            );
        }
        self.control.set_mca_running(false);
        self.state = RunState::Idle;
    }

    async fn mca_iteration(&mut self) {
        if self.pending.start_acq.take().is_some() {
            warn!("cannot start acquisition while an MCA run is active");
        }
        if self.pending.start_mca.take().is_some() {
            warn!("MCA run already active");
        }

        let elapsed = self.mca.as_ref().map_or(0.0, Mca::run_time_secs);
        let expired = self.mca_duration > 0.0 && elapsed >= self.mca_duration;
        if self.pending.stop || expired {
            self.pending.stop = false;
            self.end_mca(false);
            return;
        }

        let step = match self.mca.as_mut() {
            Some(mca) => mca.step(&mut self.interface, &self.config),
            None => Ok(()),
        };
        if let Err(e) = step {
            error!(error = %e, "MCA step failed");
            self.end_mca(true);
            return;
        }

        let token = self.shutdown.clone();
        let received = tokio::select! {
            () = token.cancelled() => None,
            request = self.requests.recv() => request,
            () = tokio::time::sleep(MCA_STEP_PAUSE) => None,
        };
        if let Some(request) = received {
            self.absorb(request);
        }
    }

    async fn do_reboot(&mut self) {
        if self.control.running() {
            warn!("cannot reboot while a run is active");
            return;
        }
        self.state = RunState::Rebooting;
        info!("rebooting modules");
        match self.interface.boot(self.control.boot_fast()) {
            Ok(()) => {
                info!("boot complete; press Enter to continue");
                self.control.set_await_continue(true);
                while self.control.await_continue() && !self.shutdown.is_cancelled() {
                    tokio::time::sleep(REBOOT_POLL).await;
                }
            }
            Err(e) => {
                error!(error = %e, "boot failed");
                self.control.set_had_error(true);
            }
        }
        self.state = RunState::Idle;
    }

    async fn idle_wait(&mut self) {
        let token = self.shutdown.clone();
        let received = tokio::select! {
            () = token.cancelled() => None,
            request = self.requests.recv() => request,
            () = tokio::time::sleep(IDLE_SLEEP) => None,
        };
        if let Some(request) = received {
            self.absorb(request);
        }
    }

    /// Teardown: file, broadcast socket, stats, interface, in that order.
    async fn shutdown_sequence(&mut self) {
        info!("run loop shutting down");
        if self.control.acq_running() {
            self.do_stop_run().await;
        }
        if self.mca.is_some() {
            self.end_mca(false);
        }
        self.close_output(false);
        if let Err(e) = self.broadcast.send_control(ControlMessage::KillSocket) {
            warn!(error = %e, "kill-socket notification failed");
        }
        if self.stats.get_total_time() > 0.0 {
            self.stats.dump();
        }
        if let Err(e) = self.interface.end_run() {
            debug!(error = %e, "final end run");
        }
        self.state = RunState::Terminated;
        self.control.set_exited();
    }

    fn update_status_bar(&self) {
        if self.control.quiet() {
            return;
        }
        let line = status::status_line(
            self.state,
            self.output.run_number().max(1),
            self.output.size(),
            self.stats.get_total_data_rate(),
            self.stats.get_total_time(),
            self.control.had_error(),
        );
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "\r\x1b[K{}", line);
        let _ = stdout.flush();
    }
}

impl<I: PixieInterface> Worker for RunWorker<I> {
    async fn run(&mut self) {
        info!("run loop ready");
        loop {
            self.absorb_requests();
            if self.shutdown.is_cancelled() {
                self.pending.kill = true;
            }
            if self.pending.kill {
                self.shutdown_sequence().await;
                break;
            }
            if self.pending.reboot {
                self.pending.reboot = false;
                self.do_reboot().await;
                self.update_status_bar();
                continue;
            }

            match self.state {
                RunState::AcqRunning => {
                    if self.pending.start_acq.take().is_some() {
                        warn!("acquisition already running");
                    }
                    if self.pending.start_mca.take().is_some() {
                        warn!("cannot start MCA while acquisition is running");
                    }
                    let deadline_hit = self
                        .run_deadline
                        .is_some_and(|deadline| Instant::now() >= deadline);
                    if self.pending.stop || deadline_hit {
                        if deadline_hit {
                            info!("timed run deadline reached");
                        }
                        self.do_stop_run().await;
                    } else {
                        self.drain_cycle(false, false);
                        tokio::task::yield_now().await;
                    }
                }
                RunState::McaRunning => self.mca_iteration().await,
                _ => {
                    if let Some((seconds, basename)) = self.pending.start_mca.take() {
                        self.do_start_mca(seconds, &basename);
                    } else if let Some((record, duration)) = self.pending.start_acq.take() {
                        self.do_start_acq(record, duration);
                    } else {
                        // Stale stop/spill requests die in idle.
                        self.pending.stop = false;
                        self.pending.force_spill = false;
                        self.idle_wait().await;
                    }
                }
            }
            self.update_status_bar();
        }
        info!("run loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_common::event::encode_event_word;
    use daq_common::sim::SimInterface;

    fn worker_with_modules(n: usize) -> (RunWorker<SimInterface>, Arc<ControlState>) {
        let config = CrateConfig::with_modules(n);
        let mut sim = SimInterface::new(config.clone());
        sim.boot(true).unwrap();
        let control = Arc::new(ControlState::new(0));
        control.toggle_quiet(); // keep the status bar out of test output
        let (_tx, rx) = mpsc::channel(4);
        let worker = RunWorker::new(
            sim,
            config,
            Arc::clone(&control),
            rx,
            CancellationToken::new(),
        )
        .unwrap();
        (worker, control)
    }

    fn start_running(worker: &mut RunWorker<SimInterface>) {
        worker.interface_mut().start_list_mode_run().unwrap();
        worker.state = RunState::AcqRunning;
        worker.control.set_acq_running(true);
        worker.acq_start = Instant::now();
    }

    #[test]
    fn spill_framing_and_size_sum() {
        let (mut worker, control) = worker_with_modules(2);
        start_running(&mut worker);

        worker.interface_mut().queue_event(0, 1, 10);
        worker.interface_mut().queue_event(0, 2, 6);
        worker.interface_mut().queue_event(1, 0, 12);

        worker.drain_cycle(false, false);
        assert!(!control.had_error());

        let buffer = &worker.spill_buffer;
        // Per-module sections in module order, sizes include headers, and
        // the section sizes sum to the emitted word count.
        assert_eq!(buffer[0], 16 + 2);
        assert_eq!(buffer[1], 0);
        let second = buffer[0] as usize;
        assert_eq!(buffer[second], 12 + 2);
        assert_eq!(buffer[second + 1], 1);
        assert_eq!(
            buffer[0] as usize + buffer[second] as usize,
            buffer.len()
        );

        assert_eq!(worker.stats.event_count(0, 1), 1);
        assert_eq!(worker.stats.event_count(0, 2), 1);
        assert_eq!(worker.stats.event_count(1, 0), 1);
        assert_eq!(worker.stats.byte_count(1, 0), 48);
    }

    #[test]
    fn partial_event_carries_across_spills() {
        let (mut worker, control) = worker_with_modules(1);
        start_running(&mut worker);
        let slot = 2;

        // 6-word event, then an 8-word event cut 3 words short.
        worker.interface_mut().queue_event(0, 1, 6);
        let full: Vec<u32> = {
            let mut v = vec![encode_event_word(slot, 4, 8, false)];
            v.extend((1..8).map(|i| 0xAB00_0000 | i));
            v
        };
        worker.interface_mut().queue_words(0, &full[..5]);

        worker.drain_cycle(false, false);
        assert!(!control.had_error());
        assert_eq!(worker.partials.len(0), 5);
        // The emitted section kept the clean event only.
        assert_eq!(worker.spill_buffer[0], 6 + 2);
        assert_eq!(worker.stats.event_count(0, 1), 1);
        assert_eq!(worker.stats.event_count(0, 4), 0);

        // The missing 3 words arrive with the next spill.
        worker.interface_mut().queue_words(0, &full[5..]);
        worker.interface_mut().queue_event(0, 7, 9);
        worker.drain_cycle(false, false);

        assert!(!control.had_error());
        assert_eq!(worker.partials.len(0), 0);
        assert_eq!(worker.stats.event_count(0, 4), 1);
        assert_eq!(worker.stats.event_count(0, 7), 1);
        // Fragment words count toward this spill's section size.
        assert_eq!(worker.spill_buffer[0], (5 + 3 + 9) as u32 + 2);
    }

    #[test]
    fn zero_size_event_is_fatal() {
        let (mut worker, control) = worker_with_modules(1);
        start_running(&mut worker);

        worker.interface_mut().queue_event(0, 0, 8);
        worker
            .interface_mut()
            .queue_words(0, &[encode_event_word(2, 1, 0, false), 0, 0]);

        worker.drain_cycle(false, false);
        assert!(control.had_error());
        assert!(worker.pending.stop);
    }

    #[test]
    fn full_fifo_is_fatal() {
        let (mut worker, control) = worker_with_modules(1);
        start_running(&mut worker);
        let capacity = worker.config.fifo_capacity_words as i64;
        worker.interface_mut().override_fifo_count(0, Some(capacity));

        worker.drain_cycle(false, false);
        assert!(control.had_error());
        assert!(worker.pending.stop);
    }

    #[test]
    fn near_full_fifo_is_not_fatal() {
        let (mut worker, control) = worker_with_modules(1);
        start_running(&mut worker);
        // 16382 words of 7-word events, two words shy of a multiple.
        for _ in 0..2340 {
            worker.interface_mut().queue_event(0, 3, 7);
        }
        worker.interface_mut().queue_words(0, &[
            encode_event_word(2, 3, 7, false),
            1,
        ]);
        assert_eq!(worker.interface_mut().queued_words(0), 16382);

        worker.drain_cycle(false, false);
        assert!(!control.had_error());
        assert_eq!(worker.partials.len(0), 2);
    }

    #[test]
    fn negative_count_is_empty_with_warning() {
        let (mut worker, control) = worker_with_modules(1);
        start_running(&mut worker);
        worker.interface_mut().override_fifo_count(0, Some(-5));

        worker.drain_cycle(true, false);
        assert!(!control.had_error());
        assert_eq!(worker.spill_buffer, vec![2, 0]);
    }

    #[test]
    fn threshold_blocks_until_forced() {
        let (mut worker, control) = worker_with_modules(1);
        control.set_thresh_words(1000);
        start_running(&mut worker);
        worker.interface_mut().queue_event(0, 0, 100);

        worker.drain_cycle(false, false);
        assert!(worker.spill_buffer.is_empty());

        worker.pending.force_spill = true;
        worker.drain_cycle(false, false);
        assert_eq!(worker.spill_buffer[0], 102);
        assert!(!worker.pending.force_spill);
    }

    #[test]
    fn below_min_read_emits_empty_record() {
        let (mut worker, _control) = worker_with_modules(2);
        start_running(&mut worker);
        worker.interface_mut().queue_event(1, 0, 20);

        worker.drain_cycle(false, false);
        // Module 0 had nothing: bare two-word header.
        assert_eq!(worker.spill_buffer[0], 2);
        assert_eq!(worker.spill_buffer[1], 0);
        assert_eq!(worker.spill_buffer[2], 22);
    }
}
