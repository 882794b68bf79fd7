// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared defaults for the component runtime and the graph driver.
//!
//! # Channel Capacity Guidelines
//!
//! Event channels are measured in events, not bytes. A component raises a
//! handful of events per command or per track, so modest capacities suffice.
//! A full channel drops the event with a warning instead of stalling the
//! processing context.

/// Default capacity of the graph-wide component event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Headers allocated per tunnel when neither endpoint asks for more.
pub const DEFAULT_TUNNEL_BUFFER_COUNT: u32 = 4;

/// How often the driver polls components whose I/O watcher is active.
pub const DEFAULT_IO_POLL_INTERVAL_MS: u64 = 10;

/// Upper bound on routing passes in one [`crate::Graph::pump`] call.
///
/// A pass that moves no header ends the pump early; the bound only matters
/// for processors that keep releasing headers without consuming input.
pub const MAX_PUMP_PASSES: usize = 10_000;

/// Default sample rate pushed onto decoder and renderer before the first
/// decoded frame reveals the real one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

pub const DEFAULT_CHANNELS: u32 = 2;
