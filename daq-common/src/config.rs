// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crate geometry and polling configuration, fixed at initialization.

use serde::{Deserialize, Serialize};

const ENV_SLOT_MAP: &str = "DAQ_SLOT_MAP";
const ENV_FIFO_CAPACITY: &str = "DAQ_FIFO_CAPACITY_WORDS";
const ENV_FIFO_MIN_READ: &str = "DAQ_FIFO_MIN_READ_WORDS";
const ENV_POLL_TRIES: &str = "DAQ_POLL_TRIES";

/// Hardware FIFO capacity of a Pixie-16-class module, in 32-bit words.
pub const DEFAULT_FIFO_CAPACITY_WORDS: usize = 131_072;
/// Reads below this word count are not worth a bus transaction.
pub const DEFAULT_FIFO_MIN_READ_WORDS: usize = 9;
/// Tight polling attempts per drain cycle before giving up on the threshold.
pub const DEFAULT_POLL_TRIES: u32 = 100;
/// Channels per module on this hardware generation.
pub const CHANNELS_PER_MODULE: usize = 16;

pub mod parse_env {
    use std::{env, str::FromStr};

    pub fn int<T: FromStr>(name: &str) -> Option<T> {
        env::var(name).ok()?.parse::<T>().ok()
    }

    pub fn bool(name: &str) -> Option<bool> {
        let var = env::var(name).ok()?;
        Some(var == "true" || var == "1")
    }

    pub fn str_not_empty(name: &str) -> Option<String> {
        env::var(name).ok().filter(|s| !s.is_empty())
    }
}

/// Fixed geometry of the physical crate plus the FIFO polling knobs.
///
/// The slot map gives the physical slot number for each module index; its
/// length is the module count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateConfig {
    pub slots: Vec<u8>,
    pub channels_per_module: usize,
    pub fifo_capacity_words: usize,
    pub fifo_min_read_words: usize,
    pub poll_tries: u32,
}

impl Default for CrateConfig {
    fn default() -> Self {
        Self {
            slots: vec![2],
            channels_per_module: CHANNELS_PER_MODULE,
            fifo_capacity_words: DEFAULT_FIFO_CAPACITY_WORDS,
            fifo_min_read_words: DEFAULT_FIFO_MIN_READ_WORDS,
            poll_tries: DEFAULT_POLL_TRIES,
        }
    }
}

impl CrateConfig {
    /// Configuration with `n` modules occupying consecutive slots starting
    /// at slot 2, the common test-stand arrangement.
    pub fn with_modules(n: usize) -> Self {
        Self {
            slots: (0..n).map(|i| 2 + i as u8).collect(),
            ..Self::default()
        }
    }

    /// Default configuration with any `DAQ_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(map) = parse_env::str_not_empty(ENV_SLOT_MAP) {
            let slots: Vec<u8> = map
                .split(',')
                .filter_map(|s| s.trim().parse::<u8>().ok())
                .collect();
            if !slots.is_empty() {
                config.slots = slots;
            }
        }
        if let Some(words) = parse_env::int(ENV_FIFO_CAPACITY) {
            config.fifo_capacity_words = words;
        }
        if let Some(words) = parse_env::int(ENV_FIFO_MIN_READ) {
            config.fifo_min_read_words = words;
        }
        if let Some(tries) = parse_env::int(ENV_POLL_TRIES) {
            config.poll_tries = tries;
        }
        config
    }

    pub fn num_modules(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, module: usize) -> Option<u8> {
        self.slots.get(module).copied()
    }

    /// Words to preallocate for one full spill across all modules, two
    /// header words per module included.
    pub fn spill_buffer_words(&self) -> usize {
        (self.fifo_capacity_words + 2) * self.num_modules()
    }

    /// Translate an operator threshold percentage into a word count.
    pub fn threshold_words(&self, percent: f64) -> usize {
        let clamped = percent.clamp(0.0, 100.0);
        (self.fifo_capacity_words as f64 * clamped / 100.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry() {
        let config = CrateConfig::default();
        assert_eq!(config.num_modules(), 1);
        assert_eq!(config.channels_per_module, 16);
        assert_eq!(config.fifo_capacity_words, 131_072);
    }

    #[test]
    fn consecutive_slots() {
        let config = CrateConfig::with_modules(3);
        assert_eq!(config.slots, vec![2, 3, 4]);
        assert_eq!(config.slot(2), Some(4));
        assert_eq!(config.slot(3), None);
    }

    #[test]
    fn spill_buffer_reserves_headers() {
        let config = CrateConfig::with_modules(2);
        assert_eq!(config.spill_buffer_words(), (131_072 + 2) * 2);
    }

    #[test]
    fn threshold_percent_bounds() {
        let config = CrateConfig::default();
        assert_eq!(config.threshold_words(0.0), 0);
        assert_eq!(config.threshold_words(100.0), 131_072);
        assert_eq!(config.threshold_words(150.0), 131_072);
        assert_eq!(config.threshold_words(50.0), 65_536);
    }
}
