// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Startup probe of the OS scheduling policy. Batch scheduling is the usual
//! arrangement for the polling loop on shared DAQ hosts; anything else is
//! worth a line in the log. The probe never changes the policy.

use tracing::{info, warn};

pub fn report_scheduler_policy() {
    // SAFETY: sched_getscheduler only reads kernel state for pid 0 (self).
    let policy = unsafe { libc::sched_getscheduler(0) };
    match policy {
        libc::SCHED_BATCH => info!("scheduler policy: batch"),
        libc::SCHED_OTHER => info!("scheduler policy: standard"),
        other => warn!(policy = other, "unexpected scheduler policy"),
    }
}
