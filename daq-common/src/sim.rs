// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory hardware double.
//!
//! `SimInterface` plays back FIFO words queued by a test (or by its built-in
//! pulser) and keeps DSP parameters in a plain map, so the whole acquisition
//! pipeline runs with no hardware attached. Failure paths are scripted with
//! the `fail_*` switches.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use crate::config::CrateConfig;
use crate::event::encode_event_word;
use crate::interface::{
    ChannelRates, HwError, PixieInterface, CHANNEL_PARAMS, MODULE_PARAMS,
};

const HISTOGRAM_BINS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    None,
    ListMode,
    Histogram,
}

/// Scripted stand-in for the vendor SDK.
pub struct SimInterface {
    config: CrateConfig,
    booted: bool,
    run_mode: RunMode,
    fifo: Vec<VecDeque<u32>>,
    fifo_count_override: Vec<Option<i64>>,
    channel_params: HashMap<(u16, u16, String), f64>,
    module_params: HashMap<(u16, String), u32>,
    histograms: HashMap<(u16, u16), Vec<u32>>,
    /// Synthetic events appended per `fifo_words` poll while a list-mode run
    /// is active; channel round-robins.
    pulser_events_per_poll: usize,
    pulser_event_words: u32,
    pulser_next_channel: u16,
    /// Remaining pulser events; `None` is unbounded.
    pulser_budget: Option<usize>,
    pub fail_boot: bool,
    pub fail_next_fifo_read: bool,
    pub fail_histogram_reads: bool,
    pub fail_run_start: bool,
}

impl SimInterface {
    pub fn new(config: CrateConfig) -> Self {
        let n = config.num_modules();
        Self {
            config,
            booted: false,
            run_mode: RunMode::None,
            fifo: (0..n).map(|_| VecDeque::new()).collect(),
            fifo_count_override: vec![None; n],
            channel_params: HashMap::new(),
            module_params: HashMap::new(),
            histograms: HashMap::new(),
            pulser_events_per_poll: 0,
            pulser_event_words: 10,
            pulser_next_channel: 0,
            pulser_budget: None,
            fail_boot: false,
            fail_next_fifo_read: false,
            fail_histogram_reads: false,
            fail_run_start: false,
        }
    }

    pub fn config(&self) -> &CrateConfig {
        &self.config
    }

    /// Queue one complete synthetic event on `module`. `size_words` counts
    /// the header word; the payload is a recognizable ramp.
    pub fn queue_event(&mut self, module: u16, channel: u16, size_words: u32) {
        let slot = self.config.slot(module as usize).unwrap_or(0);
        let queue = &mut self.fifo[module as usize];
        queue.push_back(encode_event_word(slot, channel as u8, size_words, false));
        for i in 1..size_words {
            queue.push_back(0xDA7A_0000 | i);
        }
    }

    /// Queue raw words, bypassing event framing. Used to script truncated
    /// and corrupt streams.
    pub fn queue_words(&mut self, module: u16, words: &[u32]) {
        self.fifo[module as usize].extend(words.iter().copied());
    }

    /// Make `fifo_words` report a fixed count for `module` regardless of the
    /// queue, e.g. a negative count or a full-FIFO condition.
    pub fn override_fifo_count(&mut self, module: u16, count: Option<i64>) {
        self.fifo_count_override[module as usize] = count;
    }

    /// Generate `events` synthetic events per `fifo_words` poll while a
    /// list-mode run is active.
    pub fn set_pulser(&mut self, events: usize, event_words: u32) {
        self.pulser_events_per_poll = events;
        self.pulser_event_words = event_words;
    }

    /// Cap the total number of pulser events, making the stream finite.
    pub fn set_pulser_budget(&mut self, events: usize) {
        self.pulser_budget = Some(events);
    }

    pub fn set_histogram(&mut self, module: u16, channel: u16, bins: Vec<u32>) {
        self.histograms.insert((module, channel), bins);
    }

    pub fn queued_words(&self, module: u16) -> usize {
        self.fifo[module as usize].len()
    }

    fn check_booted(&self) -> Result<(), HwError> {
        if self.booted {
            Ok(())
        } else {
            Err(HwError::NotBooted)
        }
    }

    fn check_module(&self, module: u16) -> Result<(), HwError> {
        if (module as usize) < self.config.num_modules() {
            Ok(())
        } else {
            Err(HwError::Module {
                module,
                message: "no such module".into(),
            })
        }
    }

    fn check_param(name: &str, table: &[&str]) -> Result<(), HwError> {
        if table.contains(&name) {
            Ok(())
        } else {
            Err(HwError::UnknownParam(name.to_string()))
        }
    }

    fn run_pulser(&mut self, module: u16) {
        if self.pulser_events_per_poll == 0 || self.run_mode != RunMode::ListMode {
            return;
        }
        let channels = self.config.channels_per_module as u16;
        for _ in 0..self.pulser_events_per_poll {
            if let Some(budget) = self.pulser_budget.as_mut() {
                if *budget == 0 {
                    return;
                }
                *budget -= 1;
            }
            let channel = self.pulser_next_channel;
            self.pulser_next_channel = (self.pulser_next_channel + 1) % channels;
            self.queue_event(module, channel, self.pulser_event_words);
        }
    }
}

impl PixieInterface for SimInterface {
    fn boot(&mut self, _fast: bool) -> Result<(), HwError> {
        if self.fail_boot {
            return Err(HwError::Boot("simulated boot failure".into()));
        }
        self.booted = true;
        self.run_mode = RunMode::None;
        Ok(())
    }

    fn num_modules(&self) -> usize {
        self.config.num_modules()
    }

    fn read_channel_param(
        &mut self,
        name: &str,
        module: u16,
        channel: u16,
    ) -> Result<f64, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        Self::check_param(name, CHANNEL_PARAMS)?;
        Ok(self
            .channel_params
            .get(&(module, channel, name.to_string()))
            .copied()
            .unwrap_or(0.0))
    }

    fn write_channel_param(
        &mut self,
        name: &str,
        value: f64,
        module: u16,
        channel: u16,
    ) -> Result<(), HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        Self::check_param(name, CHANNEL_PARAMS)?;
        self.channel_params
            .insert((module, channel, name.to_string()), value);
        Ok(())
    }

    fn read_module_param(&mut self, name: &str, module: u16) -> Result<u32, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        Self::check_param(name, MODULE_PARAMS)?;
        Ok(self
            .module_params
            .get(&(module, name.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn write_module_param(&mut self, name: &str, value: u32, module: u16) -> Result<(), HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        Self::check_param(name, MODULE_PARAMS)?;
        self.module_params.insert((module, name.to_string()), value);
        Ok(())
    }

    fn save_dsp_parameters(&mut self, path: &Path) -> Result<(), HwError> {
        self.check_booted()?;
        let mut lines = String::new();
        let mut entries: Vec<_> = self.channel_params.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for ((module, channel, name), value) in entries {
            lines.push_str(&format!("{} {} {} {}\n", module, channel, name, value));
        }
        fs::write(path, lines).map_err(|e| HwError::Io(e.to_string()))
    }

    fn adjust_offsets(&mut self, module: u16) -> Result<(), HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        for channel in 0..self.config.channels_per_module as u16 {
            self.channel_params
                .insert((module, channel, "VOFFSET".into()), 0.0);
        }
        Ok(())
    }

    fn find_tau(&mut self, module: u16, channel: u16) -> Result<f64, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        Ok(self
            .channel_params
            .get(&(module, channel, "TAU".to_string()))
            .copied()
            .unwrap_or(50.0))
    }

    fn acquire_traces(&mut self, module: u16) -> Result<Vec<u16>, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        let len = self.config.channels_per_module * 250;
        Ok((0..len).map(|i| (i % 4096) as u16).collect())
    }

    fn start_list_mode_run(&mut self) -> Result<(), HwError> {
        self.check_booted()?;
        if self.fail_run_start {
            return Err(HwError::RunControl("simulated start failure".into()));
        }
        if self.run_mode != RunMode::None {
            return Err(HwError::RunControl("run already active".into()));
        }
        self.run_mode = RunMode::ListMode;
        Ok(())
    }

    fn start_histogram_run(&mut self) -> Result<(), HwError> {
        self.check_booted()?;
        if self.fail_run_start {
            return Err(HwError::RunControl("simulated start failure".into()));
        }
        if self.run_mode != RunMode::None {
            return Err(HwError::RunControl("run already active".into()));
        }
        self.run_mode = RunMode::Histogram;
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), HwError> {
        self.check_booted()?;
        self.run_mode = RunMode::None;
        Ok(())
    }

    fn run_active(&mut self, module: u16) -> Result<bool, HwError> {
        self.check_module(module)?;
        Ok(self.run_mode != RunMode::None)
    }

    fn remove_preset_run_length(&mut self) -> Result<(), HwError> {
        self.check_booted()
    }

    fn fifo_words(&mut self, module: u16) -> Result<i64, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        self.run_pulser(module);
        if let Some(count) = self.fifo_count_override[module as usize] {
            return Ok(count);
        }
        Ok(self.fifo[module as usize].len() as i64)
    }

    fn read_fifo(&mut self, module: u16, out: &mut [u32]) -> Result<(), HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        if self.fail_next_fifo_read {
            self.fail_next_fifo_read = false;
            return Err(HwError::Module {
                module,
                message: "simulated FIFO read failure".into(),
            });
        }
        let queue = &mut self.fifo[module as usize];
        for slot in out.iter_mut() {
            // Short queues pad with zero so a scripted count override can
            // still exercise the reader; real hardware blocks instead.
            *slot = queue.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn read_histogram(&mut self, module: u16, channel: u16) -> Result<Vec<u32>, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        if self.fail_histogram_reads {
            return Err(HwError::Module {
                module,
                message: "simulated histogram read failure".into(),
            });
        }
        Ok(self
            .histograms
            .get(&(module, channel))
            .cloned()
            .unwrap_or_else(|| vec![0; HISTOGRAM_BINS]))
    }

    fn read_statistics(&mut self, module: u16) -> Result<Vec<ChannelRates>, HwError> {
        self.check_booted()?;
        self.check_module(module)?;
        let per_channel = self.config.channels_per_module;
        Ok((0..per_channel)
            .map(|c| ChannelRates {
                input: 100.0 + c as f64,
                output: 90.0 + c as f64,
            })
            .collect())
    }
}
