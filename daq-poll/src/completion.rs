// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Completion tables consumed by the terminal input widget: command names
//! for the first token, parameter names where a command expects one.

use daq_common::interface::{CHANNEL_PARAMS, MODULE_PARAMS};

use crate::commands::COMMANDS;

/// Commands whose arguments include a channel parameter name, with the
/// argument position (0-based, after the command itself).
const CHANNEL_PARAM_ARG: &[(&str, usize)] =
    &[("pread", 2), ("pwrite", 2), ("toggle_bit", 2)];
const MODULE_PARAM_ARG: &[(&str, usize)] = &[("pmread", 1), ("pmwrite", 1)];

fn matches_for<'a>(table: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let mut out: Vec<String> = table
        .filter(|name| name.starts_with(prefix))
        .map(str::to_string)
        .collect();
    out.sort();
    out
}

/// Completion candidates for a partially typed line.
pub fn complete(line: &str) -> Vec<String> {
    let ends_with_space = line.ends_with(' ');
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.len() {
        0 => matches_for(COMMANDS.iter().flat_map(|c| c.names.iter().copied()), ""),
        1 if !ends_with_space => matches_for(
            COMMANDS.iter().flat_map(|c| c.names.iter().copied()),
            tokens[0],
        ),
        _ => {
            let command = tokens[0];
            // Position of the argument being typed.
            let arg_index = if ends_with_space {
                tokens.len() - 1
            } else {
                tokens.len() - 2
            };
            let prefix = if ends_with_space {
                ""
            } else {
                tokens[tokens.len() - 1]
            };
            if CHANNEL_PARAM_ARG.contains(&(command, arg_index)) {
                matches_for(CHANNEL_PARAMS.iter().copied(), prefix)
            } else if MODULE_PARAM_ARG.contains(&(command, arg_index)) {
                matches_for(MODULE_PARAMS.iter().copied(), prefix)
            } else {
                Vec::new()
            }
        }
    }
}
