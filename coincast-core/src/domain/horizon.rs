//! Fixed forecast horizons and their damped extrapolation multipliers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A forecast distance for which a price is predicted and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    H24,
    H48,
    D3,
    D7,
}

impl Horizon {
    pub const ALL: [Horizon; 4] = [Horizon::H24, Horizon::H48, Horizon::D3, Horizon::D7];

    /// Days ahead of the observation this horizon targets.
    pub fn days(self) -> u32 {
        match self {
            Horizon::H24 => 1,
            Horizon::H48 => 2,
            Horizon::D3 => 3,
            Horizon::D7 => 7,
        }
    }

    /// Multiplier applied to the shortest-horizon change.
    ///
    /// Grows slower than the day count, so long horizons are damped relative
    /// to naive `days * delta` extrapolation.
    pub fn multiplier(self) -> f64 {
        match self {
            Horizon::H24 => 1.0,
            Horizon::H48 => 1.5,
            Horizon::D3 => 2.0,
            Horizon::D7 => 3.0,
        }
    }

    pub fn from_days(days: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.days() == days)
    }

    /// Column suffix used by the store (`price_24h`, `mae_3d`, ...).
    pub fn label(self) -> &'static str {
        match self {
            Horizon::H24 => "24h",
            Horizon::H48 => "48h",
            Horizon::D3 => "3d",
            Horizon::D7 => "7d",
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
