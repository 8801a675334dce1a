// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Status-bar line rendered by the run loop after every iteration.

use crate::run_worker::RunState;

/// Render `bytes` with a binary unit suffix.
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// One line for the terminal status bar.
pub fn status_line(
    state: RunState,
    run_number: u32,
    file_size: u64,
    rate_bps: f64,
    total_time_secs: f64,
    had_error: bool,
) -> String {
    let tag = match state {
        RunState::Idle => "IDLE",
        RunState::AcqStarting => "START",
        RunState::AcqRunning => "ACQ",
        RunState::AcqStopping => "STOP",
        RunState::McaStarting => "MCA START",
        RunState::McaRunning => "MCA",
        RunState::Rebooting => "REBOOT",
        RunState::Terminated => "DONE",
    };
    let mut line = format!(
        "[{}] run {:3} | {:>10} | {:>10}/s | {:7.1} s",
        tag,
        run_number,
        human_bytes(file_size as f64),
        human_bytes(rate_bps),
        total_time_secs,
    );
    if had_error {
        line.push_str(" [ERROR]");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_units() {
        assert_eq!(human_bytes(512.0), "512 B");
        assert_eq!(human_bytes(2048.0), "2.00 KiB");
        assert_eq!(human_bytes(3.0 * 1024.0 * 1024.0), "3.00 MiB");
    }

    #[test]
    fn error_marker_is_appended() {
        let line = status_line(RunState::AcqRunning, 4, 1024, 0.0, 12.0, true);
        assert!(line.starts_with("[ACQ]"));
        assert!(line.ends_with("[ERROR]"));
    }

    #[test]
    fn idle_line_has_no_error_marker() {
        let line = status_line(RunState::Idle, 1, 0, 0.0, 0.0, false);
        assert!(!line.contains("[ERROR]"));
    }
}
