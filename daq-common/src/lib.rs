// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Shared contracts for the Pixie-16-class DAQ crate controller: the hardware
//! interface consumed by the acquisition pipeline, the event-word layout, and
//! crate configuration.

pub mod config;
pub mod event;
pub mod interface;
#[cfg(feature = "sim")]
pub mod sim;
