// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-level telemetry lifecycle: ordered startup, the optional
//! forwarding agent, and flush-before-exit shutdown.

pub mod agent;
mod controller;

pub use agent::{AgentState, ForwardingAgent};
pub use controller::{ShutdownReport, Telemetry};
