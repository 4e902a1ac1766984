// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle of a metrics or trace provider.
///
/// `Building` is the builder; `build()` yields a `Running` provider;
/// `shutdown()` moves it through `Disposing` to `Disposed`. No state is ever
/// re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Building,
    Running,
    Disposing,
    Disposed,
}

impl ProviderState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Building => 0,
            Self::Running => 1,
            Self::Disposing => 2,
            Self::Disposed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Building,
            1 => Self::Running,
            2 => Self::Disposing,
            _ => Self::Disposed,
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Running => write!(f, "running"),
            Self::Disposing => write!(f, "disposing"),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}

/// Atomically updated [`ProviderState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ProviderState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> ProviderState {
        ProviderState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ProviderState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`. Returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: ProviderState, to: ProviderState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
