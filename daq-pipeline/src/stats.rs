// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-module, per-channel acquisition statistics.
//!
//! Counters accumulate in two scopes: run totals, kept until the next run
//! starts, and interval counters, rolled every dump. `add_time` gates the
//! dump: the run loop feeds it inter-spill durations and dumps + clears the
//! interval scope whenever it reports the interval has elapsed.

use daq_common::interface::ChannelRates;
use tracing::info;

/// Default seconds between statistics dumps.
pub const DEFAULT_DUMP_INTERVAL_SECS: f64 = 3.0;

#[derive(Debug)]
pub struct StatsHandler {
    modules: usize,
    channels: usize,
    dump_interval: f64,

    total_time: f64,
    interval_time: f64,

    event_totals: Vec<Vec<u64>>,
    byte_totals: Vec<Vec<u64>>,
    interval_events: Vec<Vec<u64>>,
    interval_bytes: u64,

    xia_rates: Vec<Vec<ChannelRates>>,

    /// Bytes/s over the most recently completed interval.
    data_rate: f64,
}

impl StatsHandler {
    pub fn new(modules: usize, channels: usize) -> Self {
        Self {
            modules,
            channels,
            dump_interval: DEFAULT_DUMP_INTERVAL_SECS,
            total_time: 0.0,
            interval_time: 0.0,
            event_totals: vec![vec![0; channels]; modules],
            byte_totals: vec![vec![0; channels]; modules],
            interval_events: vec![vec![0; channels]; modules],
            interval_bytes: 0,
            xia_rates: vec![vec![ChannelRates::default(); channels]; modules],
            data_rate: 0.0,
        }
    }

    pub fn set_dump_interval(&mut self, secs: f64) {
        if secs > 0.0 {
            self.dump_interval = secs;
        }
    }

    pub fn dump_interval(&self) -> f64 {
        self.dump_interval
    }

    pub fn add_event(&mut self, module: usize, channel: usize, bytes: u64) {
        if module >= self.modules || channel >= self.channels {
            return;
        }
        self.event_totals[module][channel] += 1;
        self.byte_totals[module][channel] += bytes;
        self.interval_events[module][channel] += 1;
        self.interval_bytes += bytes;
    }

    pub fn set_xia_rates(&mut self, module: usize, rates: &[ChannelRates]) {
        if module >= self.modules {
            return;
        }
        for (slot, rate) in self.xia_rates[module].iter_mut().zip(rates) {
            *slot = *rate;
        }
    }

    /// Accumulate run time. Returns `true` exactly when the time gathered
    /// since the last interval roll has reached the dump interval.
    pub fn add_time(&mut self, secs: f64) -> bool {
        self.total_time += secs;
        self.interval_time += secs;
        self.interval_time >= self.dump_interval
    }

    pub fn get_total_time(&self) -> f64 {
        self.total_time
    }

    /// Bytes/s averaged over the last completed interval.
    pub fn get_total_data_rate(&self) -> f64 {
        self.data_rate
    }

    /// Log the interval summary. Also freezes the interval data rate used by
    /// the status bar; call `clear_rates` afterwards to open a new interval.
    pub fn dump(&mut self) {
        if self.interval_time > 0.0 {
            self.data_rate = self.interval_bytes as f64 / self.interval_time;
        }
        for module in 0..self.modules {
            let events: u64 = self.interval_events[module].iter().sum();
            let icr: f64 = self.xia_rates[module].iter().map(|r| r.input).sum();
            let ocr: f64 = self.xia_rates[module].iter().map(|r| r.output).sum();
            info!(
                module,
                events,
                icr = format_args!("{:.1}", icr),
                ocr = format_args!("{:.1}", ocr),
                "stats"
            );
        }
        info!(
            total_time_s = format_args!("{:.1}", self.total_time),
            rate_bps = format_args!("{:.0}", self.data_rate),
            "stats interval"
        );
    }

    /// Zero the interval counters and rate snapshots.
    pub fn clear_rates(&mut self) {
        self.interval_time = 0.0;
        self.interval_bytes = 0;
        for module in &mut self.interval_events {
            module.iter_mut().for_each(|c| *c = 0);
        }
        for module in &mut self.xia_rates {
            module.iter_mut().for_each(|r| *r = ChannelRates::default());
        }
    }

    /// Zero the run totals.
    pub fn clear_totals(&mut self) {
        self.total_time = 0.0;
        for module in &mut self.event_totals {
            module.iter_mut().for_each(|c| *c = 0);
        }
        for module in &mut self.byte_totals {
            module.iter_mut().for_each(|c| *c = 0);
        }
    }

    /// Full reset, used when a new run opens.
    pub fn clear(&mut self) {
        self.clear_rates();
        self.clear_totals();
        self.data_rate = 0.0;
    }

    pub fn event_count(&self, module: usize, channel: usize) -> u64 {
        self.event_totals[module][channel]
    }

    pub fn byte_count(&self, module: usize, channel: usize) -> u64 {
        self.byte_totals[module][channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_time_gates_on_interval() {
        let mut stats = StatsHandler::new(1, 16);
        stats.set_dump_interval(1.0);
        assert!(!stats.add_time(0.4));
        assert!(!stats.add_time(0.4));
        assert!(stats.add_time(0.4));
        stats.dump();
        stats.clear_rates();
        assert!(!stats.add_time(0.4));
        assert!((stats.get_total_time() - 1.6).abs() < 1e-9);
    }

    #[test]
    fn rate_averages_over_interval() {
        let mut stats = StatsHandler::new(1, 16);
        stats.set_dump_interval(2.0);
        stats.add_event(0, 0, 1000);
        stats.add_event(0, 1, 1000);
        assert!(stats.add_time(2.0));
        stats.dump();
        assert!((stats.get_total_data_rate() - 1000.0).abs() < 1e-9);
        stats.clear_rates();
        // Totals survive the interval roll.
        assert_eq!(stats.event_count(0, 0), 1);
        assert_eq!(stats.byte_count(0, 1), 1000);
    }

    #[test]
    fn clears_are_idempotent() {
        let mut stats = StatsHandler::new(2, 16);
        stats.add_event(1, 3, 64);
        stats.add_time(0.5);
        stats.clear();
        stats.clear();
        assert_eq!(stats.event_count(1, 3), 0);
        assert_eq!(stats.get_total_time(), 0.0);
        assert_eq!(stats.get_total_data_rate(), 0.0);
    }

    #[test]
    fn out_of_range_is_ignored() {
        let mut stats = StatsHandler::new(1, 16);
        stats.add_event(5, 0, 64);
        stats.add_event(0, 16, 64);
        assert_eq!(stats.event_count(0, 0), 0);
    }
}
