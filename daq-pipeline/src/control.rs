// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-activity control state.
//!
//! The command loop and the run loop share exactly two things: a bounded
//! request channel (command loop sends, run loop receives) and this state
//! block of atomics plus a mutex-guarded settings struct. Every atomic has a
//! single writer — the command loop owns the sticky modes and settings, the
//! run loop owns the runtime status flags — so plain relaxed loads are
//! enough on the other side.

use std::path::MAIN_SEPARATOR;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::output_file::FileFormat;

/// Longest title an ldf-format file can carry.
pub const MAX_LDF_TITLE_LEN: usize = 80;

/// Capacity of the operator-request channel. Requests are rare and
/// idempotent; a small bound keeps a wedged run loop from hiding a backlog.
pub const REQUEST_QUEUE_DEPTH: usize = 16;

/// One operator request, sent from the command loop to the run loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RunRequest {
    StartAcq {
        record: bool,
        /// Wall-clock deadline in seconds; `None` runs until stopped.
        duration: Option<f64>,
    },
    StopAcq,
    ForceSpill,
    Reboot,
    StartMca {
        /// 0 means unbounded.
        seconds: f64,
        basename: String,
    },
    KillAll,
    /// Hardware parameter work, executed by the run loop only while idle.
    Hardware(HwCommand),
}

/// Parameter and diagnostics work forwarded to the run loop, which owns the
/// hardware interface. Ranges are inclusive `(start, stop)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum HwCommand {
    ReadChannelParam {
        name: String,
        modules: (u16, u16),
        channels: (u16, u16),
    },
    WriteChannelParam {
        name: String,
        value: f64,
        modules: (u16, u16),
        channels: (u16, u16),
    },
    ReadModuleParam {
        name: String,
        modules: (u16, u16),
    },
    WriteModuleParam {
        name: String,
        value: u32,
        modules: (u16, u16),
    },
    AdjustOffsets {
        modules: (u16, u16),
    },
    FindTau {
        module: u16,
        channel: u16,
    },
    ToggleChannelCsraBit {
        modules: (u16, u16),
        channels: (u16, u16),
        bit: u8,
    },
    ToggleParamBit {
        module: u16,
        channel: u16,
        name: String,
        bit: u8,
    },
    GetTraces {
        module: u16,
        channel: u16,
        threshold: Option<u32>,
    },
    SaveDsp {
        path: String,
    },
    DumpParams {
        path: String,
    },
}

/// Output routing and run bookkeeping the command loop edits.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Always carries a trailing separator.
    pub output_dir: String,
    pub file_prefix: String,
    pub title: String,
    pub format: FileFormat,
    pub mca_basename: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: format!(".{}", MAIN_SEPARATOR),
            file_prefix: "run".into(),
            title: String::new(),
            format: FileFormat::Ldf,
            mca_basename: "mca".into(),
        }
    }
}

/// Snapshot of the control block for the `status` command.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub acq_running: bool,
    pub mca_running: bool,
    pub file_open: bool,
    pub had_error: bool,
    pub record_data: bool,
    pub shm_mode: bool,
    pub quiet: bool,
    pub debug: bool,
    pub boot_fast: bool,
    pub output_dir: String,
    pub file_prefix: String,
    pub title: String,
    pub next_run_number: u32,
    pub threshold_words: usize,
    pub stats_interval_secs: f64,
}

/// The shared control block.
#[derive(Debug)]
pub struct ControlState {
    // Sticky modes, command loop writes.
    record_data: AtomicBool,
    shm_mode: AtomicBool,
    quiet: AtomicBool,
    debug: AtomicBool,
    boot_fast: AtomicBool,
    thresh_words: AtomicUsize,
    next_run_number: AtomicU32,
    stats_interval: AtomicU64, // f64 bits
    settings: Mutex<OutputSettings>,

    // Runtime status, run loop writes.
    acq_running: AtomicBool,
    mca_running: AtomicBool,
    file_open: AtomicBool,
    had_error: AtomicBool,
    exited: AtomicBool,
    /// Reboot handshake: run loop raises it after a boot, command loop
    /// clears it on the next input line.
    await_continue: AtomicBool,
}

impl ControlState {
    pub fn new(default_thresh_words: usize) -> Self {
        Self {
            record_data: AtomicBool::new(false),
            shm_mode: AtomicBool::new(false),
            quiet: AtomicBool::new(false),
            debug: AtomicBool::new(false),
            boot_fast: AtomicBool::new(false),
            thresh_words: AtomicUsize::new(default_thresh_words),
            next_run_number: AtomicU32::new(1),
            stats_interval: AtomicU64::new(3.0f64.to_bits()),
            settings: Mutex::new(OutputSettings::default()),
            acq_running: AtomicBool::new(false),
            mca_running: AtomicBool::new(false),
            file_open: AtomicBool::new(false),
            had_error: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            await_continue: AtomicBool::new(false),
        }
    }

    // Sticky modes.

    pub fn record_data(&self) -> bool {
        self.record_data.load(Ordering::Relaxed)
    }
    pub fn set_record_data(&self, on: bool) {
        self.record_data.store(on, Ordering::Relaxed);
    }
    pub fn shm_mode(&self) -> bool {
        self.shm_mode.load(Ordering::Relaxed)
    }
    /// Returns the new value.
    pub fn toggle_shm_mode(&self) -> bool {
        !self.shm_mode.fetch_xor(true, Ordering::Relaxed)
    }
    pub fn quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }
    pub fn toggle_quiet(&self) -> bool {
        !self.quiet.fetch_xor(true, Ordering::Relaxed)
    }
    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }
    pub fn toggle_debug(&self) -> bool {
        !self.debug.fetch_xor(true, Ordering::Relaxed)
    }
    pub fn boot_fast(&self) -> bool {
        self.boot_fast.load(Ordering::Relaxed)
    }
    pub fn set_boot_fast(&self, on: bool) {
        self.boot_fast.store(on, Ordering::Relaxed);
    }

    pub fn thresh_words(&self) -> usize {
        self.thresh_words.load(Ordering::Relaxed)
    }
    pub fn set_thresh_words(&self, words: usize) {
        self.thresh_words.store(words, Ordering::Relaxed);
    }

    pub fn next_run_number(&self) -> u32 {
        self.next_run_number.load(Ordering::Relaxed)
    }
    pub fn set_next_run_number(&self, run: u32) {
        self.next_run_number.store(run, Ordering::Relaxed);
    }

    pub fn stats_interval_secs(&self) -> f64 {
        f64::from_bits(self.stats_interval.load(Ordering::Relaxed))
    }
    pub fn set_stats_interval_secs(&self, secs: f64) {
        self.stats_interval.store(secs.to_bits(), Ordering::Relaxed);
    }

    // Settings. Poisoning only happens if a writer panicked mid-update, at
    // which point the process is already coming down; recover the data.

    pub fn settings(&self) -> OutputSettings {
        match self.settings.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_settings<R>(&self, f: impl FnOnce(&mut OutputSettings) -> R) -> R {
        match self.settings.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Set the output directory, appending a trailing separator when absent.
    pub fn set_output_dir(&self, dir: &str) -> String {
        let normalized = if dir.ends_with(MAIN_SEPARATOR) {
            dir.to_string()
        } else {
            format!("{}{}", dir, MAIN_SEPARATOR)
        };
        self.with_settings(|s| s.output_dir = normalized.clone());
        normalized
    }

    pub fn set_file_prefix(&self, prefix: &str) {
        self.with_settings(|s| s.file_prefix = prefix.to_string());
    }

    /// Set the run title. ldf output truncates silently at 80 characters;
    /// other formats keep the full text.
    pub fn set_title(&self, title: &str) -> String {
        self.with_settings(|s| {
            let mut text = title.to_string();
            if s.format == FileFormat::Ldf && text.len() > MAX_LDF_TITLE_LEN {
                text.truncate(MAX_LDF_TITLE_LEN);
            }
            s.title = text;
            s.title.clone()
        })
    }

    pub fn set_mca_basename(&self, basename: &str) {
        self.with_settings(|s| s.mca_basename = basename.to_string());
    }

    pub fn set_format(&self, format: FileFormat) {
        self.with_settings(|s| s.format = format);
    }

    // Runtime status.

    pub fn acq_running(&self) -> bool {
        self.acq_running.load(Ordering::Relaxed)
    }
    pub fn set_acq_running(&self, on: bool) {
        self.acq_running.store(on, Ordering::Relaxed);
    }
    pub fn mca_running(&self) -> bool {
        self.mca_running.load(Ordering::Relaxed)
    }
    pub fn set_mca_running(&self, on: bool) {
        self.mca_running.store(on, Ordering::Relaxed);
    }
    pub fn file_open(&self) -> bool {
        self.file_open.load(Ordering::Relaxed)
    }
    pub fn set_file_open(&self, on: bool) {
        self.file_open.store(on, Ordering::Relaxed);
    }
    pub fn had_error(&self) -> bool {
        self.had_error.load(Ordering::Relaxed)
    }
    pub fn set_had_error(&self, on: bool) {
        self.had_error.store(on, Ordering::Relaxed);
    }
    pub fn exited(&self) -> bool {
        self.exited.load(Ordering::Relaxed)
    }
    pub fn set_exited(&self) {
        self.exited.store(true, Ordering::Relaxed);
    }
    pub fn await_continue(&self) -> bool {
        self.await_continue.load(Ordering::Relaxed)
    }
    pub fn set_await_continue(&self, on: bool) {
        self.await_continue.store(on, Ordering::Relaxed);
    }

    pub fn running(&self) -> bool {
        self.acq_running() || self.mca_running()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let settings = self.settings();
        StatusSnapshot {
            acq_running: self.acq_running(),
            mca_running: self.mca_running(),
            file_open: self.file_open(),
            had_error: self.had_error(),
            record_data: self.record_data(),
            shm_mode: self.shm_mode(),
            quiet: self.quiet(),
            debug: self.debug(),
            boot_fast: self.boot_fast(),
            output_dir: settings.output_dir,
            file_prefix: settings.file_prefix,
            title: settings.title,
            next_run_number: self.next_run_number(),
            threshold_words: self.thresh_words(),
            stats_interval_secs: self.stats_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_are_involutions() {
        let control = ControlState::new(0);
        assert!(!control.shm_mode());
        assert!(control.toggle_shm_mode());
        assert!(!control.toggle_shm_mode());
        assert!(!control.shm_mode());

        control.toggle_debug();
        control.toggle_debug();
        assert!(!control.debug());

        control.toggle_quiet();
        control.toggle_quiet();
        assert!(!control.quiet());
    }

    #[test]
    fn output_dir_gets_trailing_separator() {
        let control = ControlState::new(0);
        let dir = control.set_output_dir("/tmp/x");
        assert_eq!(dir, format!("/tmp/x{}", MAIN_SEPARATOR));
        // Already-terminated stays untouched.
        let dir = control.set_output_dir(&dir);
        assert_eq!(dir, format!("/tmp/x{}", MAIN_SEPARATOR));
    }

    #[test]
    fn ldf_title_truncates_at_80() {
        let control = ControlState::new(0);
        let long = "t".repeat(81);
        assert_eq!(control.set_title(&long).len(), 80);

        control.set_format(FileFormat::Pld);
        assert_eq!(control.set_title(&long).len(), 81);
    }

    #[test]
    fn snapshot_reflects_state() {
        let control = ControlState::new(1234);
        control.set_file_prefix("test");
        control.set_acq_running(true);
        let snap = control.snapshot();
        assert!(snap.acq_running);
        assert_eq!(snap.file_prefix, "test");
        assert_eq!(snap.threshold_words, 1234);
        assert_eq!(snap.next_run_number, 1);
    }
}
