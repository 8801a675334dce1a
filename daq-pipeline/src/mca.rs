// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! MCA mode: per-channel energy histograms without list-mode streaming.
//!
//! During a histogram run the run loop periodically calls [`Mca::step`],
//! which pulls the current hardware-side histograms and rewrites the on-disk
//! snapshot. The file is replaced atomically (tmp + rename) so a consumer
//! never observes a half-written snapshot.
//!
//! On-disk layout, all little-endian: `MCA1` magic, `u32` record count, then
//! per record `mod: u16, chan: u16, bins: u32, bins × u32`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;

use daq_common::config::CrateConfig;
use daq_common::interface::PixieInterface;

const MCA_MAGIC: &[u8; 4] = b"MCA1";

#[derive(Debug)]
pub struct Mca {
    histograms: BTreeMap<(u16, u16), Vec<u32>>,
    path: PathBuf,
    started: Instant,
}

impl Mca {
    /// `basename` names the output without extension; the snapshot lands at
    /// `{basename}.dat`.
    pub fn new(basename: &str) -> Self {
        Self {
            histograms: BTreeMap::new(),
            path: PathBuf::from(format!("{}.dat", basename)),
            started: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_time_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Refresh every channel histogram from the hardware and rewrite the
    /// snapshot file.
    pub fn step(
        &mut self,
        interface: &mut dyn PixieInterface,
        config: &CrateConfig,
    ) -> anyhow::Result<()> {
        for module in 0..config.num_modules() as u16 {
            for channel in 0..config.channels_per_module as u16 {
                let bins = interface
                    .read_histogram(module, channel)
                    .with_context(|| format!("histogram read {}:{}", module, channel))?;
                self.histograms.insert((module, channel), bins);
            }
        }
        self.write_snapshot()
            .with_context(|| format!("writing {}", self.path.display()))
    }

    fn write_snapshot(&self) -> std::io::Result<()> {
        let tmp = self.path.with_extension("dat.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(MCA_MAGIC)?;
            file.write_all(&(self.histograms.len() as u32).to_le_bytes())?;
            for ((module, channel), bins) in &self.histograms {
                file.write_all(&module.to_le_bytes())?;
                file.write_all(&channel.to_le_bytes())?;
                file.write_all(&(bins.len() as u32).to_le_bytes())?;
                let mut bytes = Vec::with_capacity(bins.len() * 4);
                for bin in bins {
                    bytes.extend_from_slice(&bin.to_le_bytes());
                }
                file.write_all(&bytes)?;
            }
            file.flush()?;
        }
        fs::rename(&tmp, &self.path)
    }
}
